use chrono::{DateTime, Duration, Utc};

use crate::config::SwapConfig;
use crate::error::ValidationError;
use crate::swap::{SwapDirection, SwapQuote};

// Placeholder until a price source is wired in.
pub const EXCHANGE_RATE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub service_fee: u64,
    pub network_fee: u64,
    pub total_fee: u64,
    pub net_amount: u64,
    pub gas_reserve: Option<u64>,
    pub output_amount: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasReserveInfo {
    pub reserve_amount: u64,
    pub percentage: u64,
    pub wbtc_amount: u64,
}

pub fn network_fee(direction: SwapDirection, cfg: &SwapConfig) -> u64 {
    match direction {
        SwapDirection::LnToStarknet => cfg.lightning_network_fee_sat,
        SwapDirection::StarknetToLn => cfg.onchain_network_fee_sat,
    }
}

/// Integer fee arithmetic with floor division throughout.
pub fn compute_fees(
    amount: u64,
    direction: SwapDirection,
    cfg: &SwapConfig,
) -> Result<FeeBreakdown, ValidationError> {
    let service_fee = mul_div_floor(amount, cfg.service_fee_bps, 10_000);
    let network_fee = network_fee(direction, cfg);
    let total_fee = service_fee.saturating_add(network_fee);

    let net_amount = amount
        .checked_sub(total_fee)
        .ok_or(ValidationError::AmountBelowFees {
            amount,
            fees: total_fee,
        })?;

    let gas_reserve = (direction.into_settlement() && cfg.enable_auto_gas_reserve)
        .then(|| mul_div_floor(net_amount, cfg.gas_reserve_percent, 100));
    let output_amount = net_amount.saturating_sub(gas_reserve.unwrap_or(0));

    Ok(FeeBreakdown {
        service_fee,
        network_fee,
        total_fee,
        net_amount,
        gas_reserve,
        output_amount,
    })
}

pub fn build_quote(
    amount: u64,
    direction: SwapDirection,
    cfg: &SwapConfig,
    now: DateTime<Utc>,
) -> Result<SwapQuote, ValidationError> {
    let fees = compute_fees(amount, direction, cfg)?;
    let quote_ttl = Duration::seconds(i64::try_from(cfg.quote_ttl_secs).unwrap_or(i64::MAX));

    Ok(SwapQuote {
        input_amount: amount,
        output_amount: fees.output_amount.to_string(),
        exchange_rate: EXCHANGE_RATE,
        estimated_fee: fees.total_fee,
        network_fee: fees.network_fee,
        service_fee: fees.service_fee,
        minimum_amount: cfg.min_swap_amount,
        maximum_amount: cfg.max_swap_amount,
        expires_at: now + quote_ttl,
        direction,
        gas_reserve_amount: fees.gas_reserve.map(|r| r.to_string()),
        wbtc_amount: fees.gas_reserve.map(|_| fees.output_amount.to_string()),
    })
}

pub fn gas_reserve(amount: u64, cfg: &SwapConfig) -> GasReserveInfo {
    let reserve_amount = mul_div_floor(amount, cfg.gas_reserve_percent, 100);
    GasReserveInfo {
        reserve_amount,
        percentage: cfg.gas_reserve_percent,
        wbtc_amount: amount - reserve_amount,
    }
}

fn mul_div_floor(value: u64, numerator: u64, denominator: u64) -> u64 {
    let wide = u128::from(value) * u128::from(numerator) / u128::from(denominator);
    // numerator <= denominator is enforced by SwapConfig::validate
    u64::try_from(wide).unwrap_or(u64::MAX)
}
