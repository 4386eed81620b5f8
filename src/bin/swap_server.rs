use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser as _;
use ln_starknet_swap::auth::StaticTokenAuthenticator;
use ln_starknet_swap::clock::SystemClock;
use ln_starknet_swap::config::{
    MonitorConfig, Network, StarknetToken, SwapConfig, parse_token_address,
};
use ln_starknet_swap::http::{AppState, router};
use ln_starknet_swap::lightning::ldk::LdkLightningClient;
use ln_starknet_swap::starknet::is_valid_address;
use ln_starknet_swap::starknet::rpc::StarknetRpcClient;
use ln_starknet_swap::swap::driver::SwapDriver;
use ln_starknet_swap::swap::service::SwapService;
use ln_starknet_swap::swap::store::{MemorySwapStore, SqliteSwapStore, SwapStore};

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, env = "SWAP_LISTEN_ADDR", default_value = "127.0.0.1:8080")]
    listen_addr: String,

    /// SQLite database file. Records are kept in memory when unset.
    #[arg(long, env = "SWAP_STORE_PATH")]
    store_path: Option<PathBuf>,

    #[arg(long, env = "SWAP_LDK_REST_ADDR")]
    ldk_rest_addr: String,

    #[arg(long, env = "SWAP_STARKNET_RPC_URL")]
    starknet_rpc_url: String,

    #[arg(long, env = "SWAP_RELAYER_URL")]
    relayer_url: String,

    /// Treasury account that receives STARKNET_TO_LN deposits.
    #[arg(long, env = "SWAP_DEPOSIT_ADDRESS")]
    deposit_address: String,

    /// Comma separated `TOKEN:USER_ID` pairs.
    #[arg(long, env = "SWAP_API_TOKENS", value_delimiter = ',')]
    api_tokens: Vec<String>,

    #[arg(long, env = "SWAP_NETWORK", value_enum, default_value_t = Network::Testnet)]
    network: Network,

    #[arg(long, env = "SWAP_MIN_AMOUNT", default_value_t = 10_000)]
    min_swap_amount: u64,

    #[arg(long, env = "SWAP_MAX_AMOUNT", default_value_t = 100_000_000)]
    max_swap_amount: u64,

    #[arg(long, env = "SWAP_SERVICE_FEE_BPS", default_value_t = 100)]
    service_fee_bps: u64,

    #[arg(long, env = "SWAP_LIGHTNING_NETWORK_FEE", default_value_t = 100)]
    lightning_network_fee_sat: u64,

    #[arg(long, env = "SWAP_ONCHAIN_NETWORK_FEE", default_value_t = 5_000)]
    onchain_network_fee_sat: u64,

    #[arg(long, env = "SWAP_GAS_RESERVE_PERCENT", default_value_t = 2)]
    gas_reserve_percent: u64,

    #[arg(long, env = "SWAP_DISABLE_AUTO_GAS_RESERVE")]
    disable_auto_gas_reserve: bool,

    #[arg(long, env = "SWAP_QUOTE_TTL_SECS", default_value_t = 300)]
    quote_ttl_secs: u64,

    #[arg(long, env = "SWAP_INVOICE_EXPIRY_SECS", default_value_t = 3600)]
    invoice_expiry_secs: u32,

    #[arg(long, env = "SWAP_DEFAULT_TOKEN", default_value = "WBTC")]
    default_token: StarknetToken,

    /// `SYMBOL=0xADDRESS` contract override, repeatable.
    #[arg(long = "token-address", env = "SWAP_TOKEN_ADDRESSES", value_delimiter = ',', value_parser = parse_token_address)]
    token_addresses: Vec<(StarknetToken, String)>,

    #[arg(long, env = "SWAP_POLL_INTERVAL_SECS", default_value_t = 2)]
    poll_interval_secs: u64,

    #[arg(long, env = "SWAP_MAX_POLL_INTERVAL_SECS", default_value_t = 30)]
    max_poll_interval_secs: u64,

    #[arg(long, env = "SWAP_WATCH_TIMEOUT_SECS", default_value_t = 7200)]
    watch_timeout_secs: u64,

    #[arg(long, env = "SWAP_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    #[arg(long, env = "SWAP_RETRY_BASE_DELAY_SECS", default_value_t = 5)]
    retry_base_delay_secs: u64,

    #[arg(long, env = "SWAP_HTTP_TIMEOUT_SECS", default_value_t = 15)]
    http_timeout_secs: u64,
}

impl Args {
    fn swap_config(&self) -> Result<SwapConfig> {
        let mut cfg = SwapConfig {
            network: self.network,
            min_swap_amount: self.min_swap_amount,
            max_swap_amount: self.max_swap_amount,
            service_fee_bps: self.service_fee_bps,
            lightning_network_fee_sat: self.lightning_network_fee_sat,
            onchain_network_fee_sat: self.onchain_network_fee_sat,
            gas_reserve_percent: self.gas_reserve_percent,
            enable_auto_gas_reserve: !self.disable_auto_gas_reserve,
            quote_ttl_secs: self.quote_ttl_secs,
            invoice_expiry_secs: self.invoice_expiry_secs,
            default_token: self.default_token,
            monitor: MonitorConfig {
                poll_interval: Duration::from_secs(self.poll_interval_secs),
                max_poll_interval: Duration::from_secs(self.max_poll_interval_secs),
                watch_timeout: Duration::from_secs(self.watch_timeout_secs),
                max_retries: self.max_retries,
                retry_base_delay: Duration::from_secs(self.retry_base_delay_secs),
            },
            ..SwapConfig::for_network(self.network)
        };
        for (token, address) in &self.token_addresses {
            cfg.tokens.insert(*token, address.clone());
        }
        cfg.validate().context("validate swap config")?;
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    ln_starknet_swap::logging::init().ok();

    let args = Args::parse();
    let listen_addr: SocketAddr = args.listen_addr.parse().context("parse listen_addr")?;
    let cfg = args.swap_config()?;

    anyhow::ensure!(
        is_valid_address(&args.deposit_address),
        "invalid deposit_address: {}",
        args.deposit_address
    );

    let store: Arc<dyn SwapStore> = match &args.store_path {
        Some(path) => Arc::new(SqliteSwapStore::open(path.clone()).context("open sqlite store")?),
        None => {
            tracing::warn!("no store_path set, swaps will not survive a restart");
            Arc::new(MemorySwapStore::new())
        }
    };

    let auth = StaticTokenAuthenticator::from_pairs(&args.api_tokens).context("parse api_tokens")?;
    if auth.is_empty() {
        tracing::warn!("no api tokens configured, authenticated endpoints will reject every caller");
    }

    let lightning = LdkLightningClient::new(args.ldk_rest_addr.clone());
    let settlement = StarknetRpcClient::new(
        args.starknet_rpc_url.clone(),
        args.relayer_url.clone(),
        args.deposit_address.clone(),
        Duration::from_secs(args.http_timeout_secs),
    )
    .context("create starknet client")?;

    tracing::info!(
        network = %cfg.network,
        min_swap_amount = cfg.min_swap_amount,
        max_swap_amount = cfg.max_swap_amount,
        tokens = cfg.tokens.len(),
        "swap config loaded"
    );

    let driver = Arc::new(SwapDriver::new(
        Arc::new(cfg),
        store,
        Arc::new(lightning),
        Arc::new(settlement),
        Arc::new(SystemClock),
    ));
    driver.resume_watches().context("resume swap watchers")?;

    let app = router(AppState {
        service: SwapService::new(driver),
        auth: Arc::new(auth),
    });

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("bind {listen_addr}"))?;
    tracing::info!(%listen_addr, "starting swap HTTP server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve HTTP")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
