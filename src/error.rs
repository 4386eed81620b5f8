use thiserror::Error;

use crate::swap::SwapStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("amount too low: {amount} < minimum {min}")]
    AmountTooLow { amount: u64, min: u64 },
    #[error("amount too high: {amount} > maximum {max}")]
    AmountTooHigh { amount: u64, max: u64 },
    #[error("recipientAddress is required for {direction}")]
    MissingRecipient { direction: String },
    #[error("sourceAddress is required for {direction}")]
    MissingSourceAddress { direction: String },
    #[error("invalid starknet address: {0}")]
    InvalidAddress(String),
    #[error("unsupported token: {0}")]
    UnsupportedToken(String),
    #[error("payoutInvoice is required for {direction}")]
    MissingPayoutInvoice { direction: String },
    #[error("invalid lightning invoice: {0}")]
    InvalidInvoice(String),
    #[error("amount {amount} does not cover fees of {fees}")]
    AmountBelowFees { amount: u64, fees: u64 },
    #[error("deposit not accepted: {0}")]
    DepositNotAccepted(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Failure reported by an external collaborator (Lightning node, settlement network).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrationError {
    #[error("transient integration failure: {0}")]
    Transient(String),
    #[error("integration rejected operation: {0}")]
    Permanent(String),
}

impl IntegrationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, IntegrationError::Transient(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("authentication required")]
    MissingToken,
    #[error("invalid bearer token")]
    InvalidToken,
}

#[derive(Debug, Error)]
pub enum SwapError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("swap not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Authentication(#[from] AuthError),
    #[error("swap {0} is not owned by caller")]
    Forbidden(String),
    #[error(transparent)]
    Integration(#[from] IntegrationError),
    #[error("swap {swap_id} expired")]
    Expired { swap_id: String },
    #[error("invalid transition for swap {swap_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        swap_id: String,
        from: SwapStatus,
        to: SwapStatus,
    },
    #[error("payment mismatch for swap {swap_id}: {reason}")]
    PaymentMismatch { swap_id: String, reason: String },
    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

pub type SwapResult<T> = Result<T, SwapError>;
