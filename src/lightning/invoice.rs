use std::str::FromStr as _;

use anyhow::Result;
use bitcoin::hashes::{Hash as _, sha256};
use chrono::{DateTime, Utc};
use lightning_invoice::Bolt11Invoice;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInvoice {
    pub payment_hash: [u8; 32],
    pub amount_msat: Option<u64>,
    pub expires_at: DateTime<Utc>,
}

impl DecodedInvoice {
    pub fn payment_hash_hex(&self) -> String {
        hex::encode(self.payment_hash)
    }

    pub fn amount_sat(&self) -> Option<u64> {
        self.amount_msat.map(|msat| msat / 1000)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

fn parse(invoice: &str) -> Result<Bolt11Invoice> {
    Bolt11Invoice::from_str(invoice.trim())
        .map_err(|e| anyhow::anyhow!("parse BOLT11 invoice: {e:?}"))
}

pub fn decode_bolt11(invoice: &str) -> Result<DecodedInvoice> {
    let invoice = parse(invoice)?;
    let expires_after_epoch = invoice
        .duration_since_epoch()
        .checked_add(invoice.expiry_time())
        .ok_or_else(|| anyhow::anyhow!("invoice expiry overflow"))?;
    let expires_at = DateTime::<Utc>::from_timestamp(
        i64::try_from(expires_after_epoch.as_secs())?,
        expires_after_epoch.subsec_nanos(),
    )
    .ok_or_else(|| anyhow::anyhow!("invoice expiry out of range"))?;

    Ok(DecodedInvoice {
        payment_hash: invoice.payment_hash().to_byte_array(),
        amount_msat: invoice.amount_milli_satoshis(),
        expires_at,
    })
}

/// Checks that `preimage_hex` hashes to `payment_hash_hex`.
pub fn preimage_matches(preimage_hex: &str, payment_hash_hex: &str) -> bool {
    let Ok(preimage) = hex::decode(preimage_hex) else {
        return false;
    };
    let hash = sha256::Hash::hash(&preimage);
    hex::encode(hash.to_byte_array()).eq_ignore_ascii_case(payment_hash_hex.trim_start_matches("0x"))
}

/// Payment hashes arrive as bare hex or `0x`-prefixed; compare them case-insensitively.
pub fn normalize_payment_hash(hash: &str) -> String {
    hash.trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X")
        .to_ascii_lowercase()
}
