use crate::core::config::{Environment, ExchangeConfig};
use crate::core::errors::ExchangeError;
use crate::core::kernel::{
    HmacSigner, MultiplexerConfig, RestClientBuilder, RestClientConfig, RestExecutor,
    SessionFactory, SubscriptionMultiplexer, TungsteniteWs, WsConfig,
};
use crate::exchanges::binance_coinm::codec::BinanceCoinMCodec;
use crate::exchanges::binance_coinm::connector::BinanceCoinMConnector;
use crate::exchanges::binance_coinm::errors::BINANCE_COINM_ERROR_CODES;
use crate::exchanges::binance_coinm::rest::TIME_ENDPOINT;
use std::sync::Arc;

pub const EXCHANGE_NAME: &str = "binance_coinm";

const REST_URL: &str = "https://dapi.binance.com";
const TESTNET_REST_URL: &str = "https://testnet.binancefuture.com";
const WS_URL: &str = "wss://dstream.binance.com/stream";
const TESTNET_WS_URL: &str = "wss://dstream.binancefuture.com/stream";

pub type BinanceCoinMLiveConnector = BinanceCoinMConnector<RestExecutor, TungsteniteWs>;

pub fn rest_base_url(config: &ExchangeConfig) -> String {
    config.base_url.clone().unwrap_or_else(|| {
        match config.environment {
            Environment::Production => REST_URL,
            Environment::Testnet => TESTNET_REST_URL,
        }
        .to_string()
    })
}

pub fn ws_base_url(config: &ExchangeConfig) -> String {
    config.ws_url.clone().unwrap_or_else(|| {
        match config.environment {
            Environment::Production => WS_URL,
            Environment::Testnet => TESTNET_WS_URL,
        }
        .to_string()
    })
}

/// REST executor for COIN-M, signed when the config carries credentials.
pub fn build_rest_client(config: &ExchangeConfig) -> Result<RestExecutor, ExchangeError> {
    let rest_config = RestClientConfig::new(rest_base_url(config), EXCHANGE_NAME.to_string())
        .with_timeout(30)
        .with_max_retries(3)
        .with_recv_window(config.recv_window_ms)
        .with_time_endpoint(TIME_ENDPOINT)
        .with_error_codes(BINANCE_COINM_ERROR_CODES);

    let mut rest_builder = RestClientBuilder::new(rest_config);

    // Add authentication if credentials are provided
    if let Some(credentials) = config.credentials() {
        rest_builder = rest_builder.with_signer(Arc::new(HmacSigner::from_credentials(credentials)));
    }

    rest_builder.build()
}

/// Build a connector with default stream settings.
pub fn build_connector(config: ExchangeConfig) -> Result<BinanceCoinMLiveConnector, ExchangeError> {
    build_connector_with_streams(config, MultiplexerConfig::new(EXCHANGE_NAME))
}

/// Build a connector with custom multiplexer and socket settings.
pub fn build_connector_with_streams(
    config: ExchangeConfig,
    streams: MultiplexerConfig,
) -> Result<BinanceCoinMLiveConnector, ExchangeError> {
    let rest = build_rest_client(&config)?;

    let ws_url = ws_base_url(&config);
    let ws_config: WsConfig = streams.ws.clone();
    let factory: SessionFactory<TungsteniteWs> = Arc::new(move || {
        TungsteniteWs::new(ws_url.clone(), EXCHANGE_NAME.to_string()).with_config(ws_config.clone())
    });
    let multiplexer = SubscriptionMultiplexer::new(streams, Arc::new(BinanceCoinMCodec), factory);

    Ok(BinanceCoinMConnector::new(rest, multiplexer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_selection() {
        let production = ExchangeConfig::read_only();
        assert_eq!(rest_base_url(&production), "https://dapi.binance.com");
        assert_eq!(ws_base_url(&production), "wss://dstream.binance.com/stream");

        let testnet = ExchangeConfig::read_only().testnet(true);
        assert_eq!(rest_base_url(&testnet), "https://testnet.binancefuture.com");
        assert_eq!(ws_base_url(&testnet), "wss://dstream.binancefuture.com/stream");

        let custom = ExchangeConfig::read_only()
            .base_url("http://127.0.0.1:9000".to_string())
            .ws_url("ws://127.0.0.1:9001/stream".to_string());
        assert_eq!(rest_base_url(&custom), "http://127.0.0.1:9000");
        assert_eq!(ws_base_url(&custom), "ws://127.0.0.1:9001/stream");
    }

    #[tokio::test]
    async fn test_build_connector_signer_follows_credentials() {
        let public = build_connector(ExchangeConfig::read_only()).unwrap();
        assert!(!public.rest.inner().has_signer());

        let signed = build_connector(ExchangeConfig::new("key".to_string(), "secret".to_string()))
            .unwrap();
        assert!(signed.rest.inner().has_signer());
        assert_eq!(
            signed.rest.inner().config().recv_window_ms,
            crate::core::config::DEFAULT_RECV_WINDOW_MS
        );
    }
}
