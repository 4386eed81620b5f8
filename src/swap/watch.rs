use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;

use crate::error::{SwapError, SwapResult};
use crate::swap::driver::{PaymentConfirmation, SwapDriver};
use crate::swap::{SwapDirection, SwapStatus, SwapTransaction};

pub const WATCH_TIMED_OUT: &str = "swap did not complete before the watch deadline";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The record moved to a new non-terminal status.
    Advanced,
    /// Nothing changed; poll again later.
    Waiting,
    Terminal(SwapStatus),
}

impl StepOutcome {
    fn from_record(record: &SwapTransaction) -> Self {
        if record.status.is_terminal() {
            StepOutcome::Terminal(record.status)
        } else {
            StepOutcome::Advanced
        }
    }
}

impl SwapDriver {
    /// Runs one poll of the external systems for `swap_id` and applies
    /// whatever transition they allow.
    pub async fn step(&self, swap_id: &str) -> SwapResult<StepOutcome> {
        let _guard = self.lock_swap(swap_id).await;

        let record = self.load(swap_id)?;
        if record.status.is_terminal() {
            return Ok(StepOutcome::Terminal(record.status));
        }
        // An invoice paid before its expiry still counts when observed late,
        // so the node is asked first.
        if record.status != SwapStatus::InvoiceGenerated
            && let Some(expired) = self.expire_if_due_locked(&record)?
        {
            return Ok(StepOutcome::Terminal(expired.status));
        }

        match record.status {
            SwapStatus::InvoiceGenerated => self.poll_incoming_payment(&record).await,
            SwapStatus::Pending => match record.direction {
                SwapDirection::StarknetToLn => Ok(self
                    .confirm_deposit_locked(&record)
                    .await?
                    .as_ref()
                    .map_or(StepOutcome::Waiting, StepOutcome::from_record)),
                SwapDirection::LnToStarknet => Ok(StepOutcome::Waiting),
            },
            SwapStatus::PaymentReceived => self
                .begin_bridging_locked(&record)
                .await
                .map(|r| StepOutcome::from_record(&r)),
            SwapStatus::Bridging => Ok(self
                .poll_bridging_locked(&record)
                .await?
                .as_ref()
                .map_or(StepOutcome::Waiting, StepOutcome::from_record)),
            SwapStatus::Completed | SwapStatus::Failed | SwapStatus::Expired => {
                Ok(StepOutcome::Terminal(record.status))
            }
        }
    }

    async fn poll_incoming_payment(&self, record: &SwapTransaction) -> SwapResult<StepOutcome> {
        let Some(invoice) = record.lightning_invoice.as_ref() else {
            return self
                .fail_locked(&record.id, "swap has no lightning invoice")
                .map(|r| StepOutcome::from_record(&r));
        };
        let status = match self
            .with_retry("payment status", &record.id, || {
                self.lightning.payment_status(&invoice.payment_hash)
            })
            .await
        {
            Ok(status) => status,
            Err(err) => {
                return self
                    .fail_locked(&record.id, &err.to_string())
                    .map(|r| StepOutcome::from_record(&r));
            }
        };
        if !status.is_paid {
            return Ok(match self.expire_if_due_locked(record)? {
                Some(expired) => StepOutcome::Terminal(expired.status),
                None => StepOutcome::Waiting,
            });
        }

        let confirmation = PaymentConfirmation {
            payment_hash: invoice.payment_hash.clone(),
            amount_sat: status.amount_sat,
            paid_at: status.paid_at,
            payment_id: status.payment_id,
        };
        match self.confirm_payment_locked(&record.id, &confirmation) {
            Ok(r) => Ok(StepOutcome::from_record(&r)),
            Err(SwapError::Expired { .. }) => Ok(StepOutcome::Terminal(SwapStatus::Expired)),
            Err(SwapError::PaymentMismatch { reason, .. }) => self
                .fail_locked(&record.id, &reason)
                .map(|r| StepOutcome::from_record(&r)),
            Err(err) => Err(err),
        }
    }

    /// Gives up on a swap that outlived its watch deadline.
    async fn abandon(&self, swap_id: &str) -> SwapResult<SwapStatus> {
        let _guard = self.lock_swap(swap_id).await;

        let record = self.load(swap_id)?;
        if record.status.is_terminal() {
            return Ok(record.status);
        }
        let awaiting_funds = match record.status {
            SwapStatus::InvoiceGenerated => true,
            SwapStatus::Pending => record.transaction_hash.is_none(),
            _ => false,
        };
        let record = if awaiting_funds {
            self.transition(swap_id, SwapStatus::Expired, |r| {
                r.error = Some(WATCH_TIMED_OUT.to_string());
            })?
        } else {
            self.fail_locked(swap_id, WATCH_TIMED_OUT)?
        };
        Ok(record.status)
    }

    /// Polls `swap_id` until it reaches a terminal state or its watch
    /// deadline (`created_at + watch_timeout`) passes.
    pub async fn watch(&self, swap_id: &str) -> SwapResult<SwapStatus> {
        let record = self.load(swap_id)?;
        let timeout = chrono::Duration::from_std(self.cfg.monitor.watch_timeout)
            .unwrap_or(chrono::Duration::MAX);
        let deadline = record
            .created_at
            .checked_add_signed(timeout)
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC);

        let mut interval = self.cfg.monitor.poll_interval;
        loop {
            if self.clock.now() >= deadline {
                tracing::warn!(swap_id = %swap_id, "watch deadline reached");
                return self.abandon(swap_id).await;
            }

            match self.step(swap_id).await {
                Ok(StepOutcome::Terminal(status)) => return Ok(status),
                Ok(StepOutcome::Advanced) => interval = self.cfg.monitor.poll_interval,
                Ok(StepOutcome::Waiting) => {}
                Err(SwapError::NotFound(id)) => return Err(SwapError::NotFound(id)),
                Err(err) => {
                    tracing::warn!(swap_id = %swap_id, error = %err, "swap poll failed");
                }
            }

            tokio::time::sleep(interval).await;
            interval = next_interval(interval, self.cfg.monitor.max_poll_interval);
        }
    }

    /// Starts a background watcher unless one is already running for `swap_id`.
    pub fn spawn_watch(self: &Arc<Self>, swap_id: &str) -> Option<JoinHandle<()>> {
        if !self.watching.insert(swap_id.to_string()) {
            return None;
        }
        let driver = Arc::clone(self);
        let swap_id = swap_id.to_string();
        Some(tokio::spawn(async move {
            match driver.watch(&swap_id).await {
                Ok(status) => {
                    tracing::info!(swap_id = %swap_id, status = ?status, "swap watch finished");
                }
                Err(err) => {
                    tracing::error!(swap_id = %swap_id, error = %err, "swap watch aborted");
                }
            }
            driver.watching.remove(&swap_id);
        }))
    }

    /// Re-attaches watchers to every non-terminal record, e.g. after a restart.
    pub fn resume_watches(self: &Arc<Self>) -> Result<usize> {
        let active = self.store.list_active()?;
        let mut resumed = 0usize;
        for record in &active {
            if self.spawn_watch(&record.id).is_some() {
                resumed += 1;
            }
        }
        tracing::info!(resumed, "resumed swap watchers");
        Ok(resumed)
    }

    pub fn is_watching(&self, swap_id: &str) -> bool {
        self.watching.contains(swap_id)
    }
}

fn next_interval(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

