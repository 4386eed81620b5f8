pub mod rpc;

use async_trait::async_trait;

use crate::error::IntegrationError;

/// `starknet_keccak("Transfer")`, the ERC-20 transfer event selector.
pub const TRANSFER_SELECTOR: &str =
    "0x99cd8bde557814842a3121e8ddfd433a539b8c9f14bf31ebf108d12e6196e9";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementTransfer {
    /// Swap id; lets the relayer drop duplicate submissions.
    pub reference: String,
    pub token_address: String,
    pub recipient: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTransfer {
    pub token_address: String,
    pub from: String,
    pub to: String,
    pub amount: u128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementStatus {
    /// Not yet visible or not yet accepted on L2.
    Pending,
    Finalized,
    Reverted(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementReceipt {
    pub status: SettlementStatus,
    pub transfers: Vec<TokenTransfer>,
}

impl SettlementReceipt {
    pub fn pending() -> Self {
        Self {
            status: SettlementStatus::Pending,
            transfers: Vec::new(),
        }
    }

    /// Sum of `token` transferred to `recipient` in this transaction.
    pub fn amount_received(&self, token_address: &str, recipient: &str) -> u128 {
        self.sum_transfers(token_address, None, recipient)
    }

    /// Like [`Self::amount_received`], counting only transfers sent by `sender`.
    pub fn amount_received_from(&self, token_address: &str, sender: &str, recipient: &str) -> u128 {
        self.sum_transfers(token_address, Some(sender), recipient)
    }

    fn sum_transfers(&self, token_address: &str, sender: Option<&str>, recipient: &str) -> u128 {
        let token = normalize_felt(token_address);
        let sender = sender.map(normalize_felt);
        let recipient = normalize_felt(recipient);
        self.transfers
            .iter()
            .filter(|t| {
                normalize_felt(&t.token_address) == token
                    && normalize_felt(&t.to) == recipient
                    && sender.as_ref().is_none_or(|s| normalize_felt(&t.from) == *s)
            })
            .fold(0u128, |acc, t| acc.saturating_add(t.amount))
    }

    pub fn sent_by(&self, sender: &str) -> bool {
        let sender = normalize_felt(sender);
        self.transfers.iter().any(|t| normalize_felt(&t.from) == sender)
    }
}

/// Settlement-network operations the swap lifecycle depends on.
#[async_trait]
pub trait SettlementBackend: Send + Sync {
    /// Account that receives deposits for `STARKNET_TO_LN` swaps.
    fn deposit_address(&self) -> &str;

    async fn submit_transfer(
        &self,
        transfer: &SettlementTransfer,
    ) -> Result<String, IntegrationError>;

    async fn transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<SettlementReceipt, IntegrationError>;
}

pub fn is_valid_address(address: &str) -> bool {
    let Some(digits) = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
    else {
        return false;
    };
    !digits.is_empty() && digits.len() <= 64 && digits.chars().all(|c| c.is_ascii_hexdigit())
}

/// Lowercase, `0x`-prefixed, without leading zeros.
pub fn normalize_felt(value: &str) -> String {
    let digits = value
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X")
        .trim_start_matches('0')
        .to_ascii_lowercase();
    if digits.is_empty() {
        "0x0".to_string()
    } else {
        format!("0x{digits}")
    }
}

pub fn felt_to_u128(value: &str) -> Option<u128> {
    let normalized = normalize_felt(value);
    u128::from_str_radix(&normalized[2..], 16).ok()
}
