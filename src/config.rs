use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => f.write_str("mainnet"),
            Network::Testnet => f.write_str("testnet"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StarknetToken {
    Wbtc,
    Usdc,
    Usdt,
}

impl StarknetToken {
    pub const ALL: [StarknetToken; 3] = [StarknetToken::Wbtc, StarknetToken::Usdc, StarknetToken::Usdt];

    pub fn symbol(self) -> &'static str {
        match self {
            StarknetToken::Wbtc => "WBTC",
            StarknetToken::Usdc => "USDC",
            StarknetToken::Usdt => "USDT",
        }
    }

    /// Built-in contract address on `network`. Testnet deployments vary, so
    /// they must be configured explicitly.
    pub fn default_address(self, network: Network) -> Option<&'static str> {
        match network {
            Network::Mainnet => Some(self.mainnet_address()),
            Network::Testnet => None,
        }
    }

    // Starknet mainnet ERC-20 contracts.
    pub fn mainnet_address(self) -> &'static str {
        match self {
            StarknetToken::Wbtc => {
                "0x03fe2b97c1fd336e750087d68b9b867997fd64a2661ff3ca5a7c771641e8e7ac"
            }
            StarknetToken::Usdc => {
                "0x053c91253bc9682c04929ca02ed00b3e423f6710d2ee7e0d5ebb06f3ecf368a8"
            }
            StarknetToken::Usdt => {
                "0x068f5c6a61780768455de69077e07e89787839bf8166decfbf92b645209c0fb8"
            }
        }
    }
}

impl fmt::Display for StarknetToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for StarknetToken {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "WBTC" => Ok(StarknetToken::Wbtc),
            "USDC" => Ok(StarknetToken::Usdc),
            "USDT" => Ok(StarknetToken::Usdt),
            other => anyhow::bail!("unknown token: {other}"),
        }
    }
}

/// Polling and retry knobs for the lifecycle watcher.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub max_poll_interval: Duration,
    /// Hard wall-clock cap on watching a single swap.
    pub watch_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_poll_interval: Duration::from_secs(30),
            watch_timeout: Duration::from_secs(2 * 60 * 60),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SwapConfig {
    pub network: Network,
    pub min_swap_amount: u64,
    pub max_swap_amount: u64,
    pub service_fee_bps: u64,
    pub lightning_network_fee_sat: u64,
    pub onchain_network_fee_sat: u64,
    pub gas_reserve_percent: u64,
    pub enable_auto_gas_reserve: bool,
    pub quote_ttl_secs: u64,
    pub invoice_expiry_secs: u32,
    pub default_token: StarknetToken,
    pub tokens: BTreeMap<StarknetToken, String>,
    pub monitor: MonitorConfig,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self::for_network(Network::Mainnet)
    }
}

impl SwapConfig {
    /// Defaults for `network`, with the built-in token contracts it has.
    pub fn for_network(network: Network) -> Self {
        Self {
            network,
            min_swap_amount: 10_000,
            max_swap_amount: 100_000_000,
            service_fee_bps: 100,
            lightning_network_fee_sat: 100,
            onchain_network_fee_sat: 5_000,
            gas_reserve_percent: 2,
            enable_auto_gas_reserve: true,
            quote_ttl_secs: 5 * 60,
            invoice_expiry_secs: 3600,
            default_token: StarknetToken::Wbtc,
            tokens: StarknetToken::ALL
                .into_iter()
                .filter_map(|t| Some((t, t.default_address(network)?.to_string())))
                .collect(),
            monitor: MonitorConfig::default(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.min_swap_amount > 0, "min_swap_amount must be > 0");
        anyhow::ensure!(
            self.min_swap_amount <= self.max_swap_amount,
            "min_swap_amount must be <= max_swap_amount: min={} max={}",
            self.min_swap_amount,
            self.max_swap_amount
        );
        anyhow::ensure!(
            self.service_fee_bps <= 10_000,
            "service_fee_bps must be <= 10000"
        );
        anyhow::ensure!(
            self.gas_reserve_percent <= 100,
            "gas_reserve_percent must be <= 100"
        );
        anyhow::ensure!(self.quote_ttl_secs > 0, "quote_ttl_secs must be > 0");
        anyhow::ensure!(
            self.invoice_expiry_secs > 0,
            "invoice_expiry_secs must be > 0"
        );
        anyhow::ensure!(
            !self.tokens.is_empty(),
            "no token contracts configured for {}, pass --token-address SYMBOL=0x..",
            self.network
        );
        anyhow::ensure!(
            self.tokens.contains_key(&self.default_token),
            "default token {} has no contract address",
            self.default_token
        );
        anyhow::ensure!(
            self.monitor.max_poll_interval >= self.monitor.poll_interval,
            "max_poll_interval must be >= poll_interval"
        );
        Ok(())
    }

    pub fn token_address(&self, token: StarknetToken) -> Option<&str> {
        self.tokens.get(&token).map(String::as_str)
    }
}

/// Parses `SYMBOL=0xADDRESS` overrides given on the command line.
pub fn parse_token_address(s: &str) -> anyhow::Result<(StarknetToken, String)> {
    let (symbol, address) = s
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("expected SYMBOL=ADDRESS, got {s}"))?;
    let token: StarknetToken = symbol.trim().parse()?;
    let address = address.trim();
    anyhow::ensure!(
        crate::starknet::is_valid_address(address),
        "invalid starknet address for {token}: {address}"
    );
    Ok((token, address.to_string()))
}
