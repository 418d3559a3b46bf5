pub mod core;
pub mod exchanges;

pub use crate::core::{
    config::{ConfigError, Credentials, Environment, ExchangeConfig},
    errors::{ErrorCategory, ExchangeError},
    traits::{handler_fn, Callback, MessageHandler, StreamSpec},
    types::*,
};
pub use exchanges::binance_coinm::{build_connector, BinanceCoinMConnector, CoinMStream};
