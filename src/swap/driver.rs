use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::{DashMap, DashSet};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::auth::UserId;
use crate::clock::Clock;
use crate::config::SwapConfig;
use crate::error::{IntegrationError, SwapError, SwapResult, ValidationError};
use crate::lightning::invoice::{normalize_payment_hash, preimage_matches};
use crate::lightning::{LightningBackend, PayoutStatus};
use crate::starknet::{
    SettlementBackend, SettlementStatus, SettlementTransfer, is_valid_address, normalize_felt,
};
use crate::swap::quote::compute_fees;
use crate::swap::store::{InsertOutcome, SwapStore};
use crate::swap::validate::validate_swap_request;
use crate::swap::{SwapDirection, SwapRequest, SwapStatus, SwapTransaction};

pub const INVOICE_EXPIRED: &str = "Lightning invoice has expired";
pub const DEPOSIT_WINDOW_ELAPSED: &str = "deposit was not submitted before the swap expired";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfirmation {
    pub payment_hash: String,
    pub amount_sat: Option<u64>,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_id: Option<String>,
}

/// Owns every status change of a swap record.
///
/// Transitions for one swap id run under that id's async mutex, so at most
/// one is in flight per record while unrelated swaps proceed in parallel.
pub struct SwapDriver {
    pub(crate) cfg: Arc<SwapConfig>,
    pub(crate) store: Arc<dyn SwapStore>,
    pub(crate) lightning: Arc<dyn LightningBackend>,
    pub(crate) settlement: Arc<dyn SettlementBackend>,
    pub(crate) clock: Arc<dyn Clock>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    pub(crate) watching: DashSet<String>,
}

pub(crate) struct SwapGuard<'a> {
    driver: &'a SwapDriver,
    swap_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SwapGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.driver
            .locks
            .remove_if(&self.swap_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl SwapDriver {
    pub fn new(
        cfg: Arc<SwapConfig>,
        store: Arc<dyn SwapStore>,
        lightning: Arc<dyn LightningBackend>,
        settlement: Arc<dyn SettlementBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cfg,
            store,
            lightning,
            settlement,
            clock,
            locks: DashMap::new(),
            watching: DashSet::new(),
        }
    }

    pub fn config(&self) -> &SwapConfig {
        &self.cfg
    }

    pub fn store(&self) -> &Arc<dyn SwapStore> {
        &self.store
    }

    /// Serializes work on one swap. The lock entry is dropped with the last
    /// guard, so ids nobody is working on do not accumulate.
    pub(crate) async fn lock_swap(&self, swap_id: &str) -> SwapGuard<'_> {
        let lock = self
            .locks
            .entry(swap_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        SwapGuard {
            driver: self,
            swap_id: swap_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Number of swap ids with a lock currently held or awaited.
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }

    pub(crate) fn load(&self, swap_id: &str) -> SwapResult<SwapTransaction> {
        self.store
            .get(swap_id)?
            .ok_or_else(|| SwapError::NotFound(swap_id.to_string()))
    }

    /// Moves a record to `to`, applying `apply` in the same atomic update.
    pub(crate) fn transition<F>(
        &self,
        swap_id: &str,
        to: SwapStatus,
        mut apply: F,
    ) -> SwapResult<SwapTransaction>
    where
        F: FnMut(&mut SwapTransaction),
    {
        let now = self.clock.now();
        let record = self.store.update(swap_id, &mut |record| {
            if !record.status.can_transition_to(to) {
                return Err(SwapError::InvalidTransition {
                    swap_id: record.id.clone(),
                    from: record.status,
                    to,
                });
            }
            record.status = to;
            record.updated_at = now.max(record.updated_at);
            apply(record);
            Ok(())
        })?;

        tracing::info!(swap_id = %swap_id, status = ?to, "swap transition");
        Ok(record)
    }

    /// Calls `op`, retrying transient failures with exponential backoff.
    pub(crate) async fn with_retry<T, F, Fut>(
        &self,
        what: &str,
        swap_id: &str,
        mut op: F,
    ) -> Result<T, IntegrationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, IntegrationError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.cfg.monitor.max_retries => {
                    let delay = self
                        .cfg
                        .monitor
                        .retry_base_delay
                        .saturating_mul(2u32.saturating_pow(attempt));
                    tracing::warn!(
                        swap_id = %swap_id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "{what} failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub async fn create_swap(
        &self,
        owner: &UserId,
        request: &SwapRequest,
        idempotency_key: Option<String>,
    ) -> SwapResult<SwapTransaction> {
        let validated = validate_swap_request(request, &self.cfg)?;

        if let Some(key) = idempotency_key.as_deref()
            && let Some(existing) = self.store.find_by_idempotency_key(owner.as_str(), key)?
        {
            tracing::info!(swap_id = %existing.id, "idempotent swap creation replayed");
            return Ok(existing);
        }

        let fees = compute_fees(validated.amount, validated.direction, &self.cfg)?;
        let now = self.clock.now();
        let swap_id = Uuid::new_v4().to_string();

        let mut record = SwapTransaction {
            id: swap_id.clone(),
            owner: owner.as_str().to_string(),
            status: SwapStatus::Pending,
            direction: validated.direction,
            input_amount: validated.amount,
            output_amount: fees.output_amount.to_string(),
            target_token: Some(validated.target_token),
            recipient_address: validated.recipient_address.clone(),
            source_address: validated.source_address.as_deref().map(normalize_felt),
            speed: validated.speed,
            lightning_invoice: None,
            payout_invoice: None,
            transaction_hash: None,
            lightning_payment_id: None,
            payment_preimage: None,
            idempotency_key,
            created_at: now,
            updated_at: now,
            expires_at: None,
            error: None,
        };

        match validated.direction {
            SwapDirection::LnToStarknet => {
                let invoice = self
                    .with_retry("create invoice", &swap_id, || {
                        self.lightning.create_invoice(
                            validated.amount,
                            format!("Swap {swap_id} to Starknet"),
                            self.cfg.invoice_expiry_secs,
                        )
                    })
                    .await?;
                record.status = SwapStatus::InvoiceGenerated;
                record.expires_at = Some(invoice.expires_at);
                record.lightning_invoice = Some(invoice);
            }
            SwapDirection::StarknetToLn => {
                let payout = validated
                    .payout_invoice
                    .as_ref()
                    .ok_or_else(|| ValidationError::MissingPayoutInvoice {
                        direction: validated.direction.to_string(),
                    })?;
                if payout.decoded.is_expired_at(now) {
                    return Err(ValidationError::InvalidInvoice(INVOICE_EXPIRED.into()).into());
                }
                if let Some(amount_sat) = payout.decoded.amount_sat()
                    && amount_sat != fees.output_amount
                {
                    return Err(ValidationError::InvalidInvoice(format!(
                        "invoice amount {amount_sat} does not match swap output {}",
                        fees.output_amount
                    ))
                    .into());
                }
                let window = now + Duration::seconds(i64::from(self.cfg.invoice_expiry_secs));
                record.expires_at = Some(window.min(payout.decoded.expires_at));
                record.payout_invoice = Some(payout.bolt11.clone());
            }
        }

        match self.store.insert(&record)? {
            InsertOutcome::Inserted => {
                tracing::info!(
                    swap_id = %record.id,
                    owner = %record.owner,
                    direction = %record.direction,
                    input_amount = record.input_amount,
                    output_amount = %record.output_amount,
                    status = ?record.status,
                    "swap created"
                );
                Ok(record)
            }
            InsertOutcome::Existing(existing) => {
                tracing::info!(swap_id = %existing.id, "idempotent swap creation raced, returning existing");
                Ok(existing)
            }
        }
    }

    /// Handles a payment-settled signal for a swap's invoice.
    pub async fn confirm_payment(
        &self,
        swap_id: &str,
        confirmation: &PaymentConfirmation,
    ) -> SwapResult<SwapTransaction> {
        let _guard = self.lock_swap(swap_id).await;
        self.confirm_payment_locked(swap_id, confirmation)
    }

    pub(crate) fn confirm_payment_locked(
        &self,
        swap_id: &str,
        confirmation: &PaymentConfirmation,
    ) -> SwapResult<SwapTransaction> {
        let record = self.load(swap_id)?;
        let invoice = record
            .lightning_invoice
            .as_ref()
            .ok_or_else(|| SwapError::PaymentMismatch {
                swap_id: swap_id.to_string(),
                reason: "swap has no lightning invoice".into(),
            })?;

        if normalize_payment_hash(&confirmation.payment_hash)
            != normalize_payment_hash(&invoice.payment_hash)
        {
            return Err(SwapError::PaymentMismatch {
                swap_id: swap_id.to_string(),
                reason: format!("payment hash {} does not match invoice", confirmation.payment_hash),
            });
        }

        match confirmation.amount_sat {
            Some(paid) if paid >= invoice.amount => {}
            Some(paid) => {
                return Err(SwapError::PaymentMismatch {
                    swap_id: swap_id.to_string(),
                    reason: format!("paid {paid} sat, invoice requires {}", invoice.amount),
                });
            }
            None => {
                return Err(SwapError::PaymentMismatch {
                    swap_id: swap_id.to_string(),
                    reason: "payment amount unknown".into(),
                });
            }
        }

        let paid_at = confirmation.paid_at.unwrap_or_else(|| self.clock.now());
        if paid_at >= invoice.expires_at {
            self.transition(swap_id, SwapStatus::Expired, |r| {
                r.error = Some(INVOICE_EXPIRED.to_string());
            })?;
            return Err(SwapError::Expired {
                swap_id: swap_id.to_string(),
            });
        }

        let payment_id = confirmation.payment_id.clone();
        self.transition(swap_id, SwapStatus::PaymentReceived, |r| {
            r.lightning_payment_id = payment_id.clone();
        })
    }

    /// Records the caller's settlement-network deposit for a `STARKNET_TO_LN` swap.
    pub async fn submit_deposit(
        &self,
        swap_id: &str,
        owner: &UserId,
        tx_hash: &str,
    ) -> SwapResult<SwapTransaction> {
        let _guard = self.lock_swap(swap_id).await;

        let record = self.load(swap_id)?;
        if record.owner != owner.as_str() {
            return Err(SwapError::Forbidden(swap_id.to_string()));
        }
        if record.direction != SwapDirection::StarknetToLn {
            return Err(ValidationError::DepositNotAccepted(format!(
                "{} swaps do not take deposits",
                record.direction
            ))
            .into());
        }
        if record.status != SwapStatus::Pending {
            return Err(ValidationError::DepositNotAccepted(format!(
                "swap is {}",
                record.status.as_str()
            ))
            .into());
        }
        if record.transaction_hash.is_some() {
            return Err(
                ValidationError::DepositNotAccepted("deposit already submitted".into()).into(),
            );
        }
        if !is_valid_address(tx_hash) {
            return Err(ValidationError::DepositNotAccepted(format!(
                "invalid transaction hash: {tx_hash}"
            ))
            .into());
        }
        let tx_hash = normalize_felt(tx_hash);
        if let Some(other) = self.store.find_by_transaction_hash(&tx_hash)? {
            return Err(ValidationError::DepositNotAccepted(format!(
                "transaction already used by swap {}",
                other.id
            ))
            .into());
        }

        let now = self.clock.now();
        let updated = self.store.update(swap_id, &mut |r| {
            if r.status != SwapStatus::Pending || r.transaction_hash.is_some() {
                return Err(
                    ValidationError::DepositNotAccepted("deposit already submitted".into()).into(),
                );
            }
            r.transaction_hash = Some(tx_hash.clone());
            r.updated_at = now.max(r.updated_at);
            Ok(())
        })?;

        tracing::info!(swap_id = %swap_id, tx_hash = %tx_hash, "deposit submitted");
        Ok(updated)
    }

    /// Verifies a submitted deposit on chain. `Ok(None)` means there is nothing
    /// to credit yet: no deposit, not final, or sent by someone else.
    pub async fn confirm_deposit(&self, swap_id: &str) -> SwapResult<Option<SwapTransaction>> {
        let _guard = self.lock_swap(swap_id).await;
        let record = self.load(swap_id)?;
        if record.direction != SwapDirection::StarknetToLn || record.status != SwapStatus::Pending {
            return Err(SwapError::InvalidTransition {
                swap_id: record.id.clone(),
                from: record.status,
                to: SwapStatus::PaymentReceived,
            });
        }
        self.confirm_deposit_locked(&record).await
    }

    pub(crate) async fn confirm_deposit_locked(
        &self,
        record: &SwapTransaction,
    ) -> SwapResult<Option<SwapTransaction>> {
        let Some(tx_hash) = record.transaction_hash.as_deref() else {
            return Ok(None);
        };
        let receipt = match self
            .with_retry("deposit receipt", &record.id, || {
                self.settlement.transaction_receipt(tx_hash)
            })
            .await
        {
            Ok(receipt) => receipt,
            Err(err) => return self.fail_locked(&record.id, &err.to_string()).map(Some),
        };

        match receipt.status {
            SettlementStatus::Pending => Ok(None),
            SettlementStatus::Reverted(reason) => self
                .fail_locked(&record.id, &format!("deposit reverted: {reason}"))
                .map(Some),
            SettlementStatus::Finalized => {
                let Some(source) = record.source_address.as_deref() else {
                    return self
                        .fail_locked(&record.id, "swap has no deposit source address")
                        .map(Some);
                };
                if !receipt.sent_by(source) {
                    return self.release_deposit(record, tx_hash, source);
                }
                let token = record.target_token.unwrap_or(self.cfg.default_token);
                let token_address = self.cfg.token_address(token).unwrap_or_default();
                let received = receipt.amount_received_from(
                    token_address,
                    source,
                    self.settlement.deposit_address(),
                );
                if received < u128::from(record.input_amount) {
                    return self
                        .fail_locked(
                            &record.id,
                            &format!(
                                "deposit of {received} {token} is below swap amount {}",
                                record.input_amount
                            ),
                        )
                        .map(Some);
                }
                self.transition(&record.id, SwapStatus::PaymentReceived, |_| {})
                    .map(Some)
            }
        }
    }

    /// Detaches a deposit that was not sent by the swap's source account, so
    /// the transaction stays claimable by the swap it belongs to.
    fn release_deposit(
        &self,
        record: &SwapTransaction,
        tx_hash: &str,
        source: &str,
    ) -> SwapResult<Option<SwapTransaction>> {
        let cause = format!("deposit {tx_hash} was not sent from {source}");
        let now = self.clock.now();
        self.store.update(&record.id, &mut |r| {
            if r.status != SwapStatus::Pending {
                return Err(SwapError::InvalidTransition {
                    swap_id: r.id.clone(),
                    from: r.status,
                    to: SwapStatus::PaymentReceived,
                });
            }
            r.transaction_hash = None;
            r.error = Some(cause.clone());
            r.updated_at = now.max(r.updated_at);
            Ok(())
        })?;
        tracing::warn!(swap_id = %record.id, tx_hash = %tx_hash, "deposit rejected: foreign sender");
        Ok(None)
    }

    /// Starts moving value to the destination network.
    pub async fn begin_bridging(&self, swap_id: &str) -> SwapResult<SwapTransaction> {
        let _guard = self.lock_swap(swap_id).await;
        let record = self.load(swap_id)?;
        self.begin_bridging_locked(&record).await
    }

    pub(crate) async fn begin_bridging_locked(
        &self,
        record: &SwapTransaction,
    ) -> SwapResult<SwapTransaction> {
        if record.status != SwapStatus::PaymentReceived {
            return Err(SwapError::InvalidTransition {
                swap_id: record.id.clone(),
                from: record.status,
                to: SwapStatus::Bridging,
            });
        }
        let output_amount = record.output_amount_sat()?;

        match record.direction {
            SwapDirection::LnToStarknet => {
                let token = record.target_token.unwrap_or(self.cfg.default_token);
                let (Some(token_address), Some(recipient)) = (
                    self.cfg.token_address(token),
                    record.recipient_address.as_deref(),
                ) else {
                    return self.fail_locked(&record.id, "swap has no settlement destination");
                };
                let transfer = SettlementTransfer {
                    reference: record.id.clone(),
                    token_address: token_address.to_string(),
                    recipient: recipient.to_string(),
                    amount: output_amount,
                };
                match self
                    .with_retry("submit settlement transfer", &record.id, || {
                        self.settlement.submit_transfer(&transfer)
                    })
                    .await
                {
                    Ok(tx_hash) => {
                        let tx_hash = normalize_felt(&tx_hash);
                        self.transition(&record.id, SwapStatus::Bridging, |r| {
                            r.transaction_hash = Some(tx_hash.clone());
                        })
                    }
                    Err(err) => self.fail_locked(&record.id, &err.to_string()),
                }
            }
            SwapDirection::StarknetToLn => {
                let Some(bolt11) = record.payout_invoice.as_deref() else {
                    return self.fail_locked(&record.id, "swap has no payout invoice");
                };
                let amountless = crate::lightning::invoice::decode_bolt11(bolt11)
                    .map(|d| d.amount_msat.is_none())
                    .unwrap_or(false);
                let amount = amountless.then_some(output_amount);
                match self
                    .with_retry("pay payout invoice", &record.id, || {
                        self.lightning.pay_invoice(bolt11, amount)
                    })
                    .await
                {
                    Ok(payment_id) => self.transition(&record.id, SwapStatus::Bridging, |r| {
                        r.lightning_payment_id = Some(payment_id.clone());
                    }),
                    Err(err) => self.fail_locked(&record.id, &err.to_string()),
                }
            }
        }
    }

    /// Checks whether the bridging leg has settled. `Ok(None)` means still in flight.
    pub async fn poll_bridging(&self, swap_id: &str) -> SwapResult<Option<SwapTransaction>> {
        let _guard = self.lock_swap(swap_id).await;
        let record = self.load(swap_id)?;
        if record.status != SwapStatus::Bridging {
            return Err(SwapError::InvalidTransition {
                swap_id: record.id.clone(),
                from: record.status,
                to: SwapStatus::Completed,
            });
        }
        self.poll_bridging_locked(&record).await
    }

    pub(crate) async fn poll_bridging_locked(
        &self,
        record: &SwapTransaction,
    ) -> SwapResult<Option<SwapTransaction>> {
        match record.direction {
            SwapDirection::LnToStarknet => {
                let Some(tx_hash) = record.transaction_hash.as_deref() else {
                    return self
                        .fail_locked(&record.id, "bridging without settlement transaction")
                        .map(Some);
                };
                let receipt = match self
                    .with_retry("settlement receipt", &record.id, || {
                        self.settlement.transaction_receipt(tx_hash)
                    })
                    .await
                {
                    Ok(receipt) => receipt,
                    Err(err) => return self.fail_locked(&record.id, &err.to_string()).map(Some),
                };
                match receipt.status {
                    SettlementStatus::Pending => Ok(None),
                    SettlementStatus::Finalized => self
                        .transition(&record.id, SwapStatus::Completed, |_| {})
                        .map(Some),
                    SettlementStatus::Reverted(reason) => self
                        .fail_locked(&record.id, &format!("settlement reverted: {reason}"))
                        .map(Some),
                }
            }
            SwapDirection::StarknetToLn => {
                let Some(payment_id) = record.lightning_payment_id.as_deref() else {
                    return self
                        .fail_locked(&record.id, "bridging without lightning payment")
                        .map(Some);
                };
                let status = match self
                    .with_retry("payout status", &record.id, || {
                        self.lightning.payout_status(payment_id)
                    })
                    .await
                {
                    Ok(status) => status,
                    Err(err) => return self.fail_locked(&record.id, &err.to_string()).map(Some),
                };
                match status {
                    PayoutStatus::Pending => Ok(None),
                    PayoutStatus::Failed(reason) => self
                        .fail_locked(&record.id, &format!("lightning payout failed: {reason}"))
                        .map(Some),
                    PayoutStatus::Succeeded { preimage_hex } => {
                        let expected_hash = record
                            .payout_invoice
                            .as_deref()
                            .and_then(|b| crate::lightning::invoice::decode_bolt11(b).ok())
                            .map(|d| d.payment_hash_hex());
                        if let Some(expected_hash) = expected_hash
                            && !preimage_matches(&preimage_hex, &expected_hash)
                        {
                            return self
                                .fail_locked(&record.id, "payout preimage does not match invoice")
                                .map(Some);
                        }
                        self.transition(&record.id, SwapStatus::Completed, |r| {
                            r.payment_preimage = Some(preimage_hex.clone());
                        })
                        .map(Some)
                    }
                }
            }
        }
    }

    /// Expires a swap whose deadline passed before funds arrived.
    /// Returns `Ok(None)` when nothing was due.
    pub async fn expire_if_due(&self, swap_id: &str) -> SwapResult<Option<SwapTransaction>> {
        let _guard = self.lock_swap(swap_id).await;
        let record = self.load(swap_id)?;
        self.expire_if_due_locked(&record)
    }

    pub(crate) fn expire_if_due_locked(
        &self,
        record: &SwapTransaction,
    ) -> SwapResult<Option<SwapTransaction>> {
        let Some(expires_at) = record.expires_at else {
            return Ok(None);
        };
        if self.clock.now() < expires_at {
            return Ok(None);
        }

        let cause = match record.status {
            SwapStatus::InvoiceGenerated => INVOICE_EXPIRED,
            // A submitted deposit is followed through even past the window.
            SwapStatus::Pending if record.transaction_hash.is_none() => DEPOSIT_WINDOW_ELAPSED,
            _ => return Ok(None),
        };

        self.transition(&record.id, SwapStatus::Expired, |r| {
            r.error = Some(cause.to_string());
        })
        .map(Some)
    }

    pub async fn fail(&self, swap_id: &str, cause: &str) -> SwapResult<SwapTransaction> {
        let _guard = self.lock_swap(swap_id).await;
        self.fail_locked(swap_id, cause)
    }

    pub(crate) fn fail_locked(&self, swap_id: &str, cause: &str) -> SwapResult<SwapTransaction> {
        tracing::warn!(swap_id = %swap_id, cause = %cause, "swap failed");
        self.transition(swap_id, SwapStatus::Failed, |r| {
            r.error = Some(cause.to_string());
        })
    }
}
