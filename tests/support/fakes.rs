use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use anyhow::Result;
use async_trait::async_trait;
use bitcoin::hashes::{Hash as _, sha256};
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use chrono::{DateTime, Duration, TimeZone as _, Utc};
use lightning_invoice::{Currency, InvoiceBuilder, PaymentSecret};

use ln_starknet_swap::auth::{StaticTokenAuthenticator, UserId};
use ln_starknet_swap::clock::{Clock as _, ManualClock};
use ln_starknet_swap::config::{MonitorConfig, StarknetToken, SwapConfig};
use ln_starknet_swap::error::IntegrationError;
use ln_starknet_swap::http::{AppState, router};
use ln_starknet_swap::lightning::invoice::normalize_payment_hash;
use ln_starknet_swap::lightning::{LightningBackend, PaymentStatus, PayoutStatus};
use ln_starknet_swap::starknet::{
    SettlementBackend, SettlementReceipt, SettlementStatus, SettlementTransfer, TokenTransfer,
    normalize_felt,
};
use ln_starknet_swap::swap::driver::SwapDriver;
use ln_starknet_swap::swap::service::SwapService;
use ln_starknet_swap::swap::store::{MemorySwapStore, SwapStore};
use ln_starknet_swap::swap::{LightningInvoice, SwapDirection, SwapRequest};

pub const DEPOSIT_ADDRESS: &str =
    "0x0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
pub const RECIPIENT: &str = "0x04a3b2c1d0e9f8a7b6c5d4e3f2a1b0c9d8e7f6a5b4c3d2e1f0a9b8c7d6e5f4a3";
/// Account `STARKNET_TO_LN` test swaps deposit from.
pub const DEPOSITOR: &str = "0x05c0ffee00000000000000000000000000000000000000000000000000000001";
pub const ALICE_TOKEN: &str = "alice-token";
pub const BOB_TOKEN: &str = "bob-token";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0)
        .single()
        .expect("valid start time")
}

pub fn alice() -> UserId {
    UserId("user-alice".to_string())
}

pub fn bob() -> UserId {
    UserId("user-bob".to_string())
}

/// Config with retry and poll delays short enough for tests.
pub fn test_config() -> SwapConfig {
    SwapConfig {
        monitor: MonitorConfig {
            poll_interval: StdDuration::from_millis(10),
            max_poll_interval: StdDuration::from_millis(50),
            watch_timeout: StdDuration::from_secs(2 * 60 * 60),
            max_retries: 3,
            retry_base_delay: StdDuration::from_millis(1),
        },
        ..SwapConfig::default()
    }
}

pub fn ln_to_starknet(amount: u64) -> SwapRequest {
    SwapRequest {
        direction: SwapDirection::LnToStarknet,
        amount,
        target_token: None,
        recipient_address: Some(RECIPIENT.to_string()),
        source_address: None,
        speed: None,
        payout_invoice: None,
    }
}

pub fn starknet_to_ln(amount: u64, payout_invoice: &str) -> SwapRequest {
    SwapRequest {
        direction: SwapDirection::StarknetToLn,
        amount,
        target_token: Some("WBTC".to_string()),
        recipient_address: None,
        source_address: Some(DEPOSITOR.to_string()),
        speed: None,
        payout_invoice: Some(payout_invoice.to_string()),
    }
}

pub struct SignedInvoice {
    pub bolt11: String,
    pub payment_hash_hex: String,
    pub preimage_hex: String,
}

/// Builds a signed regtest BOLT11 invoice created at `created_at`.
pub fn signed_invoice(
    amount_msat: Option<u64>,
    created_at: DateTime<Utc>,
    expiry: StdDuration,
    seed: u8,
) -> Result<SignedInvoice> {
    let preimage = [seed; 32];
    let payment_hash = sha256::Hash::hash(&preimage);
    let private_key = SecretKey::from_slice(&[0x42; 32])?;
    let secp = Secp256k1::new();

    let builder = InvoiceBuilder::new(Currency::Regtest)
        .description("payout".to_string())
        .payment_hash(payment_hash)
        .payment_secret(PaymentSecret([seed; 32]))
        .duration_since_epoch(StdDuration::from_secs(u64::try_from(created_at.timestamp())?))
        .expiry_time(expiry)
        .min_final_cltv_expiry_delta(144);

    let invoice = match amount_msat {
        Some(msat) => builder
            .amount_milli_satoshis(msat)
            .build_signed(|hash| secp.sign_ecdsa_recoverable(hash, &private_key)),
        None => builder.build_signed(|hash| secp.sign_ecdsa_recoverable(hash, &private_key)),
    }
    .map_err(|e| anyhow::anyhow!("build invoice: {e:?}"))?;

    Ok(SignedInvoice {
        bolt11: invoice.to_string(),
        payment_hash_hex: hex::encode(payment_hash.to_byte_array()),
        preimage_hex: hex::encode(preimage),
    })
}

#[derive(Default)]
struct LightningState {
    invoices: Vec<LightningInvoice>,
    payments: HashMap<String, PaymentStatus>,
    payouts: HashMap<String, PayoutStatus>,
    paid: Vec<(String, Option<u64>)>,
    create_invoice_errors: VecDeque<IntegrationError>,
    payment_status_errors: VecDeque<IntegrationError>,
    pay_invoice_errors: VecDeque<IntegrationError>,
    payment_status_calls: usize,
}

/// In-process Lightning node. Invoices are opaque strings with real hashes.
pub struct FakeLightning {
    clock: Arc<ManualClock>,
    state: Mutex<LightningState>,
}

impl FakeLightning {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            state: Mutex::new(LightningState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LightningState> {
        self.state.lock().expect("lightning state poisoned")
    }

    pub fn mark_paid(&self, payment_hash: &str, amount_sat: u64, paid_at: DateTime<Utc>) {
        self.state().payments.insert(
            normalize_payment_hash(payment_hash),
            PaymentStatus {
                is_paid: true,
                paid_at: Some(paid_at),
                amount_sat: Some(amount_sat),
                payment_id: Some(format!("inbound-{payment_hash}")),
            },
        );
    }

    pub fn set_payout(&self, payment_id: &str, status: PayoutStatus) {
        self.state().payouts.insert(payment_id.to_string(), status);
    }

    pub fn fail_create_invoice(&self, err: IntegrationError) {
        self.state().create_invoice_errors.push_back(err);
    }

    pub fn fail_payment_status(&self, err: IntegrationError, times: usize) {
        let mut state = self.state();
        for _ in 0..times {
            state.payment_status_errors.push_back(err.clone());
        }
    }

    pub fn fail_pay_invoice(&self, err: IntegrationError) {
        self.state().pay_invoice_errors.push_back(err);
    }

    pub fn invoices(&self) -> Vec<LightningInvoice> {
        self.state().invoices.clone()
    }

    pub fn paid_invoices(&self) -> Vec<(String, Option<u64>)> {
        self.state().paid.clone()
    }

    pub fn payment_status_calls(&self) -> usize {
        self.state().payment_status_calls
    }
}

#[async_trait]
impl LightningBackend for FakeLightning {
    async fn create_invoice(
        &self,
        amount_sat: u64,
        description: String,
        expiry_secs: u32,
    ) -> Result<LightningInvoice, IntegrationError> {
        let mut state = self.state();
        if let Some(err) = state.create_invoice_errors.pop_front() {
            return Err(err);
        }
        let n = state.invoices.len();
        let hash = sha256::Hash::hash(format!("invoice-{n}").as_bytes());
        let invoice = LightningInvoice {
            payment_request: format!("lnbcrt{amount_sat}fake{n}"),
            payment_hash: hex::encode(hash.to_byte_array()),
            amount: amount_sat,
            expires_at: self.clock.now() + Duration::seconds(i64::from(expiry_secs)),
            description: Some(description),
        };
        state.invoices.push(invoice.clone());
        Ok(invoice)
    }

    async fn payment_status(&self, payment_hash: &str) -> Result<PaymentStatus, IntegrationError> {
        let mut state = self.state();
        state.payment_status_calls += 1;
        if let Some(err) = state.payment_status_errors.pop_front() {
            return Err(err);
        }
        Ok(state
            .payments
            .get(&normalize_payment_hash(payment_hash))
            .cloned()
            .unwrap_or_else(PaymentStatus::unpaid))
    }

    async fn pay_invoice(
        &self,
        bolt11: &str,
        amount_sat: Option<u64>,
    ) -> Result<String, IntegrationError> {
        let mut state = self.state();
        if let Some(err) = state.pay_invoice_errors.pop_front() {
            return Err(err);
        }
        let payment_id = format!("payout-{}", state.paid.len());
        state.paid.push((bolt11.to_string(), amount_sat));
        state
            .payouts
            .insert(payment_id.clone(), PayoutStatus::Pending);
        Ok(payment_id)
    }

    async fn payout_status(&self, payment_id: &str) -> Result<PayoutStatus, IntegrationError> {
        self.state()
            .payouts
            .get(payment_id)
            .cloned()
            .ok_or_else(|| IntegrationError::Permanent(format!("unknown payment {payment_id}")))
    }
}

#[derive(Default)]
struct SettlementState {
    transfers: Vec<SettlementTransfer>,
    receipts: HashMap<String, SettlementReceipt>,
    submit_errors: VecDeque<IntegrationError>,
}

/// In-process settlement network. Receipts stay pending until set.
pub struct FakeSettlement {
    state: Mutex<SettlementState>,
}

impl Default for FakeSettlement {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSettlement {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SettlementState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SettlementState> {
        self.state.lock().expect("settlement state poisoned")
    }

    pub fn transfers(&self) -> Vec<SettlementTransfer> {
        self.state().transfers.clone()
    }

    pub fn set_receipt(&self, tx_hash: &str, receipt: SettlementReceipt) {
        self.state().receipts.insert(normalize_felt(tx_hash), receipt);
    }

    pub fn finalize(&self, tx_hash: &str) {
        self.set_receipt(
            tx_hash,
            SettlementReceipt {
                status: SettlementStatus::Finalized,
                transfers: Vec::new(),
            },
        );
    }

    /// Finalized receipt carrying a `token` transfer of `amount` from
    /// [`DEPOSITOR`] into the deposit account.
    pub fn finalize_deposit(&self, tx_hash: &str, token: StarknetToken, amount: u128) {
        self.finalize_deposit_from(tx_hash, DEPOSITOR, token, amount);
    }

    pub fn finalize_deposit_from(
        &self,
        tx_hash: &str,
        from: &str,
        token: StarknetToken,
        amount: u128,
    ) {
        self.set_receipt(
            tx_hash,
            SettlementReceipt {
                status: SettlementStatus::Finalized,
                transfers: vec![TokenTransfer {
                    token_address: token.mainnet_address().to_string(),
                    from: from.to_string(),
                    to: DEPOSIT_ADDRESS.to_string(),
                    amount,
                }],
            },
        );
    }

    pub fn fail_submit(&self, err: IntegrationError, times: usize) {
        let mut state = self.state();
        for _ in 0..times {
            state.submit_errors.push_back(err.clone());
        }
    }
}

#[async_trait]
impl SettlementBackend for FakeSettlement {
    fn deposit_address(&self) -> &str {
        DEPOSIT_ADDRESS
    }

    async fn submit_transfer(
        &self,
        transfer: &SettlementTransfer,
    ) -> Result<String, IntegrationError> {
        let mut state = self.state();
        if let Some(err) = state.submit_errors.pop_front() {
            return Err(err);
        }
        state.transfers.push(transfer.clone());
        Ok(format!("0x{:x}", 0xabc000 + state.transfers.len()))
    }

    async fn transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<SettlementReceipt, IntegrationError> {
        Ok(self
            .state()
            .receipts
            .get(&normalize_felt(tx_hash))
            .cloned()
            .unwrap_or_else(SettlementReceipt::pending))
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub lightning: Arc<FakeLightning>,
    pub settlement: Arc<FakeSettlement>,
    pub store: Arc<dyn SwapStore>,
    pub driver: Arc<SwapDriver>,
}

impl Harness {
    pub fn new(cfg: SwapConfig) -> Self {
        Self::with_store(cfg, Arc::new(MemorySwapStore::new()))
    }

    pub fn with_store(cfg: SwapConfig, store: Arc<dyn SwapStore>) -> Self {
        let clock = Arc::new(ManualClock::new(start_time()));
        let lightning = Arc::new(FakeLightning::new(clock.clone()));
        let settlement = Arc::new(FakeSettlement::new());
        let driver = Arc::new(SwapDriver::new(
            Arc::new(cfg),
            store.clone(),
            lightning.clone(),
            settlement.clone(),
            clock.clone(),
        ));
        Self {
            clock,
            lightning,
            settlement,
            store,
            driver,
        }
    }

    pub fn service(&self) -> SwapService {
        SwapService::new(self.driver.clone())
    }

    pub fn app(&self) -> axum::Router {
        let auth = StaticTokenAuthenticator::new();
        auth.add_token(ALICE_TOKEN, alice().0);
        auth.add_token(BOB_TOKEN, bob().0);
        router(AppState {
            service: self.service(),
            auth: Arc::new(auth),
        })
    }
}
