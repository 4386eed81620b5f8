pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod lightning;
pub mod logging;
pub mod starknet;
pub mod swap;
