use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::UserId;
use crate::config::{Network, StarknetToken};
use crate::error::{SwapError, SwapResult};
use crate::lightning::invoice::normalize_payment_hash;
use crate::swap::driver::{PaymentConfirmation, SwapDriver};
use crate::swap::quote::{GasReserveInfo, build_quote, gas_reserve};
use crate::swap::validate::validate_quote_request;
use crate::swap::{SwapQuote, SwapRequest, SwapStatus, SwapTransaction};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentVerification {
    pub payment_hash: String,
    pub is_paid: bool,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub symbol: StarknetToken,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicConfig {
    pub network: Network,
    pub min_swap_amount: u64,
    pub max_swap_amount: u64,
    pub gas_reserve_percentage: u64,
    pub enable_auto_gas_reserve: bool,
    pub supported_tokens: Vec<TokenInfo>,
    pub default_token: StarknetToken,
    pub service_fee_bps: u64,
    pub lightning_network_fee: u64,
    pub onchain_network_fee: u64,
    pub quote_ttl_secs: u64,
}

/// Request-facing operations. Status changes are delegated to [`SwapDriver`].
#[derive(Clone)]
pub struct SwapService {
    driver: Arc<SwapDriver>,
}

impl SwapService {
    pub fn new(driver: Arc<SwapDriver>) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &Arc<SwapDriver> {
        &self.driver
    }

    pub fn quote(&self, request: &SwapRequest) -> SwapResult<SwapQuote> {
        let cfg = self.driver.config();
        let validated = validate_quote_request(request, cfg)?;
        Ok(build_quote(
            validated.amount,
            validated.direction,
            cfg,
            self.driver.clock.now(),
        )?)
    }

    pub fn gas_reserve(&self, amount: u64) -> GasReserveInfo {
        gas_reserve(amount, self.driver.config())
    }

    /// Creates the record and starts watching it in the background.
    pub async fn create_swap(
        &self,
        owner: &UserId,
        request: &SwapRequest,
        idempotency_key: Option<String>,
    ) -> SwapResult<SwapTransaction> {
        let record = self
            .driver
            .create_swap(owner, request, idempotency_key)
            .await?;
        if !record.status.is_terminal() {
            self.driver.spawn_watch(&record.id);
        }
        Ok(record)
    }

    pub fn get_swap(&self, swap_id: &str) -> SwapResult<SwapTransaction> {
        self.driver
            .store()
            .get(swap_id)?
            .ok_or_else(|| SwapError::NotFound(swap_id.to_string()))
    }

    /// Same as [`Self::get_swap`], but records owned by someone else read as missing.
    pub fn get_swap_for_user(&self, owner: &UserId, swap_id: &str) -> SwapResult<SwapTransaction> {
        let record = self.get_swap(swap_id)?;
        if record.owner != owner.as_str() {
            return Err(SwapError::Forbidden(swap_id.to_string()));
        }
        Ok(record)
    }

    pub fn list_swaps_for_user(&self, owner: &UserId) -> SwapResult<Vec<SwapTransaction>> {
        Ok(self.driver.store().list_by_owner(owner.as_str())?)
    }

    /// Asks the Lightning node whether `payment_hash` is settled. A settled
    /// payment for a swap still waiting on its invoice is confirmed right away.
    pub async fn verify_payment(&self, payment_hash: &str) -> SwapResult<PaymentVerification> {
        let payment_hash = normalize_payment_hash(payment_hash);
        let status = self
            .driver
            .with_retry("payment status", &payment_hash, || {
                self.driver.lightning.payment_status(&payment_hash)
            })
            .await?;

        if status.is_paid
            && let Some(record) = self.driver.store().find_by_payment_hash(&payment_hash)?
            && record.status == SwapStatus::InvoiceGenerated
        {
            let confirmation = PaymentConfirmation {
                payment_hash: payment_hash.clone(),
                amount_sat: status.amount_sat,
                paid_at: status.paid_at,
                payment_id: status.payment_id.clone(),
            };
            match self.driver.confirm_payment(&record.id, &confirmation).await {
                Ok(_) => {}
                // The watcher or a concurrent call got there first.
                Err(SwapError::InvalidTransition { .. }) => {}
                Err(err) => {
                    tracing::warn!(
                        swap_id = %record.id,
                        error = %err,
                        "payment verified but swap not advanced"
                    );
                }
            }
        }

        Ok(PaymentVerification {
            payment_hash,
            is_paid: status.is_paid,
            paid_at: status.paid_at,
        })
    }

    pub async fn submit_deposit(
        &self,
        owner: &UserId,
        swap_id: &str,
        tx_hash: &str,
    ) -> SwapResult<SwapTransaction> {
        let record = self.driver.submit_deposit(swap_id, owner, tx_hash).await?;
        self.driver.spawn_watch(&record.id);
        Ok(record)
    }

    pub fn public_config(&self) -> PublicConfig {
        let cfg = self.driver.config();
        PublicConfig {
            network: cfg.network,
            min_swap_amount: cfg.min_swap_amount,
            max_swap_amount: cfg.max_swap_amount,
            gas_reserve_percentage: cfg.gas_reserve_percent,
            enable_auto_gas_reserve: cfg.enable_auto_gas_reserve,
            supported_tokens: cfg
                .tokens
                .iter()
                .map(|(symbol, address)| TokenInfo {
                    symbol: *symbol,
                    address: address.clone(),
                })
                .collect(),
            default_token: cfg.default_token,
            service_fee_bps: cfg.service_fee_bps,
            lightning_network_fee: cfg.lightning_network_fee_sat,
            onchain_network_fee: cfg.onchain_network_fee_sat,
            quote_ttl_secs: cfg.quote_ttl_secs,
        }
    }
}
