use crate::config::{StarknetToken, SwapConfig};
use crate::error::ValidationError;
use crate::lightning::invoice::{DecodedInvoice, decode_bolt11};
use crate::starknet::is_valid_address;
use crate::swap::{SwapDirection, SwapRequest, SwapSpeed};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub direction: SwapDirection,
    pub amount: u64,
    pub target_token: StarknetToken,
    pub recipient_address: Option<String>,
    pub source_address: Option<String>,
    pub speed: Option<SwapSpeed>,
    pub payout_invoice: Option<PayoutInvoice>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutInvoice {
    pub bolt11: String,
    pub decoded: DecodedInvoice,
}

/// Checks shared by quotes and swap creation. Pure: no I/O, no clock.
pub fn validate_quote_request(
    req: &SwapRequest,
    cfg: &SwapConfig,
) -> Result<ValidatedRequest, ValidationError> {
    if req.amount < cfg.min_swap_amount {
        return Err(ValidationError::AmountTooLow {
            amount: req.amount,
            min: cfg.min_swap_amount,
        });
    }
    if req.amount > cfg.max_swap_amount {
        return Err(ValidationError::AmountTooHigh {
            amount: req.amount,
            max: cfg.max_swap_amount,
        });
    }

    let recipient_address = optional_address(req.recipient_address.as_deref())?;
    if req.direction.into_settlement() && recipient_address.is_none() {
        return Err(ValidationError::MissingRecipient {
            direction: req.direction.to_string(),
        });
    }
    let source_address = optional_address(req.source_address.as_deref())?;

    // Unset token falls back to the primary wrapped asset. For STARKNET_TO_LN
    // this is the token the caller deposits.
    let target_token = match req.target_token.as_deref().map(str::trim) {
        Some(symbol) if !symbol.is_empty() => symbol
            .parse::<StarknetToken>()
            .ok()
            .filter(|t| cfg.token_address(*t).is_some())
            .ok_or_else(|| ValidationError::UnsupportedToken(symbol.to_string()))?,
        _ => cfg.default_token,
    };

    Ok(ValidatedRequest {
        direction: req.direction,
        amount: req.amount,
        target_token,
        recipient_address,
        source_address,
        speed: req.speed,
        payout_invoice: None,
    })
}

/// Quote checks plus the payout invoice `STARKNET_TO_LN` swaps need.
pub fn validate_swap_request(
    req: &SwapRequest,
    cfg: &SwapConfig,
) -> Result<ValidatedRequest, ValidationError> {
    let mut validated = validate_quote_request(req, cfg)?;

    if req.direction == SwapDirection::StarknetToLn {
        // Deposits are credited only when they come from this account.
        if validated.source_address.is_none() {
            return Err(ValidationError::MissingSourceAddress {
                direction: req.direction.to_string(),
            });
        }
        let bolt11 = req
            .payout_invoice
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ValidationError::MissingPayoutInvoice {
                direction: req.direction.to_string(),
            })?;
        let decoded =
            decode_bolt11(bolt11).map_err(|e| ValidationError::InvalidInvoice(format!("{e:#}")))?;
        validated.payout_invoice = Some(PayoutInvoice {
            bolt11: bolt11.to_string(),
            decoded,
        });
    }

    Ok(validated)
}

fn optional_address(address: Option<&str>) -> Result<Option<String>, ValidationError> {
    match address.map(str::trim) {
        Some(addr) if !addr.is_empty() => {
            if !is_valid_address(addr) {
                return Err(ValidationError::InvalidAddress(addr.to_string()));
            }
            Ok(Some(addr.to_string()))
        }
        _ => Ok(None),
    }
}
