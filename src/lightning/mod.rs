pub mod invoice;
pub mod ldk;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::IntegrationError;
use crate::swap::LightningInvoice;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentStatus {
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub amount_sat: Option<u64>,
    pub payment_id: Option<String>,
}

impl PaymentStatus {
    pub fn unpaid() -> Self {
        Self {
            is_paid: false,
            paid_at: None,
            amount_sat: None,
            payment_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutStatus {
    Pending,
    Succeeded { preimage_hex: String },
    Failed(String),
}

/// Lightning node operations the swap lifecycle depends on.
#[async_trait]
pub trait LightningBackend: Send + Sync {
    async fn create_invoice(
        &self,
        amount_sat: u64,
        description: String,
        expiry_secs: u32,
    ) -> Result<LightningInvoice, IntegrationError>;

    /// Status of an inbound payment, looked up by payment hash (hex).
    async fn payment_status(&self, payment_hash: &str) -> Result<PaymentStatus, IntegrationError>;

    /// Pays a BOLT11 invoice. `amount_sat` is only used for invoices without an amount.
    async fn pay_invoice(
        &self,
        bolt11: &str,
        amount_sat: Option<u64>,
    ) -> Result<String, IntegrationError>;

    async fn payout_status(&self, payment_id: &str) -> Result<PayoutStatus, IntegrationError>;
}
