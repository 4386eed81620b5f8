use anyhow::Result;

use ln_starknet_swap::config::{Network, StarknetToken, SwapConfig, parse_token_address};

const TESTNET_WBTC: &str = "0x00452bd5c0512a61df7c7be8cfea5e4f893cb40e126bdc40aee6054db955129e";

#[test]
fn mainnet_defaults_carry_token_contracts() -> Result<()> {
    let cfg = SwapConfig::default();
    assert_eq!(cfg.network, Network::Mainnet);
    assert_eq!(cfg.tokens.len(), StarknetToken::ALL.len());
    assert_eq!(
        cfg.token_address(StarknetToken::Usdc),
        Some(StarknetToken::Usdc.mainnet_address())
    );
    cfg.validate()?;
    Ok(())
}

#[test]
fn testnet_requires_token_overrides() -> Result<()> {
    let mut cfg = SwapConfig::for_network(Network::Testnet);
    assert!(cfg.tokens.is_empty());
    assert_eq!(cfg.token_address(StarknetToken::Wbtc), None);
    let err = cfg.validate().unwrap_err();
    assert!(err.to_string().contains("--token-address"), "{err}");

    let (token, address) = parse_token_address(&format!("wbtc={TESTNET_WBTC}"))?;
    assert_eq!(token, StarknetToken::Wbtc);
    cfg.tokens.insert(token, address);
    cfg.validate()?;
    assert_eq!(cfg.token_address(StarknetToken::Wbtc), Some(TESTNET_WBTC));
    Ok(())
}

#[test]
fn token_overrides_are_checked() {
    assert!(parse_token_address("WBTC").is_err());
    assert!(parse_token_address("DOGE=0x1").is_err());
    assert!(parse_token_address("USDT=not-hex").is_err());
}
