pub mod builder; // ExchangeConfig → concrete connector
pub mod codec; // impl WsCodec (combined-stream dialect)
pub mod connector; // REST wrapper + subscription multiplexer
pub mod errors; // error code → category table
pub mod rest; // thin typed wrapper around RestClient
pub mod subscriptions; // stream kinds → channel names
pub mod types; // request parameter enums
pub mod user_data; // listen key keep-alive

pub use builder::{
    build_connector, build_connector_with_streams, build_rest_client, rest_base_url, ws_base_url,
    BinanceCoinMLiveConnector, EXCHANGE_NAME,
};
pub use codec::BinanceCoinMCodec;
pub use connector::BinanceCoinMConnector;
pub use errors::BINANCE_COINM_ERROR_CODES;
pub use rest::BinanceCoinMRestClient;
pub use subscriptions::CoinMStream;
pub use types::*;
pub use user_data::{listen_key_from, ListenKeyKeepAlive, LISTEN_KEY_KEEPALIVE};
