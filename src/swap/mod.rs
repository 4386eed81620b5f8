pub mod driver;
pub mod quote;
pub mod service;
pub mod store;
pub mod validate;
pub mod watch;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::StarknetToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapDirection {
    LnToStarknet,
    StarknetToLn,
}

impl SwapDirection {
    /// True when value moves onto the settlement network.
    pub fn into_settlement(self) -> bool {
        matches!(self, SwapDirection::LnToStarknet)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SwapDirection::LnToStarknet => "LN_TO_STARKNET",
            SwapDirection::StarknetToLn => "STARKNET_TO_LN",
        }
    }
}

impl fmt::Display for SwapDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapStatus {
    Pending,
    InvoiceGenerated,
    PaymentReceived,
    Bridging,
    Completed,
    Failed,
    Expired,
}

impl SwapStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SwapStatus::Completed | SwapStatus::Failed | SwapStatus::Expired
        )
    }

    fn rank(self) -> u8 {
        match self {
            SwapStatus::Pending => 0,
            SwapStatus::InvoiceGenerated => 1,
            SwapStatus::PaymentReceived => 2,
            SwapStatus::Bridging => 3,
            SwapStatus::Completed | SwapStatus::Failed | SwapStatus::Expired => 4,
        }
    }

    /// Transitions only move forward along the happy path, or into
    /// `Failed`/`Expired` from any non-terminal state.
    pub fn can_transition_to(self, next: SwapStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            SwapStatus::Failed | SwapStatus::Expired => true,
            _ => next.rank() > self.rank(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SwapStatus::Pending => "PENDING",
            SwapStatus::InvoiceGenerated => "INVOICE_GENERATED",
            SwapStatus::PaymentReceived => "PAYMENT_RECEIVED",
            SwapStatus::Bridging => "BRIDGING",
            SwapStatus::Completed => "COMPLETED",
            SwapStatus::Failed => "FAILED",
            SwapStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<SwapStatus> {
        Some(match s {
            "PENDING" => SwapStatus::Pending,
            "INVOICE_GENERATED" => SwapStatus::InvoiceGenerated,
            "PAYMENT_RECEIVED" => SwapStatus::PaymentReceived,
            "BRIDGING" => SwapStatus::Bridging,
            "COMPLETED" => SwapStatus::Completed,
            "FAILED" => SwapStatus::Failed,
            "EXPIRED" => SwapStatus::Expired,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapSpeed {
    Instant,
    Normal,
}

impl SwapSpeed {
    pub fn as_str(self) -> &'static str {
        match self {
            SwapSpeed::Instant => "instant",
            SwapSpeed::Normal => "normal",
        }
    }

    pub fn parse(s: &str) -> Option<SwapSpeed> {
        match s {
            "instant" => Some(SwapSpeed::Instant),
            "normal" => Some(SwapSpeed::Normal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
    pub direction: SwapDirection,
    pub amount: u64,
    #[serde(default)]
    pub target_token: Option<String>,
    #[serde(default)]
    pub recipient_address: Option<String>,
    /// Starknet account the `STARKNET_TO_LN` deposit is sent from.
    #[serde(default)]
    pub source_address: Option<String>,
    #[serde(default)]
    pub speed: Option<SwapSpeed>,
    /// BOLT11 invoice the service pays out to, for `STARKNET_TO_LN`.
    #[serde(default)]
    pub payout_invoice: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapQuote {
    pub input_amount: u64,
    pub output_amount: String,
    pub exchange_rate: f64,
    pub estimated_fee: u64,
    pub network_fee: u64,
    pub service_fee: u64,
    pub minimum_amount: u64,
    pub maximum_amount: u64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    pub direction: SwapDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_reserve_amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wbtc_amount: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightningInvoice {
    pub payment_request: String,
    pub payment_hash: String,
    pub amount: u64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapTransaction {
    pub id: String,
    pub owner: String,
    pub status: SwapStatus,
    pub direction: SwapDirection,
    pub input_amount: u64,
    pub output_amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_token: Option<StarknetToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<SwapSpeed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lightning_invoice: Option<LightningInvoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payout_invoice: Option<String>,
    /// Settlement-network transaction: the transfer to the recipient, or the
    /// caller's deposit for `STARKNET_TO_LN`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lightning_payment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_preimage: Option<String>,
    #[serde(default, skip_serializing)]
    pub idempotency_key: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SwapTransaction {
    pub fn output_amount_sat(&self) -> anyhow::Result<u64> {
        self.output_amount
            .parse()
            .map_err(|e| anyhow::anyhow!("parse output_amount {}: {e}", self.output_amount))
    }
}
