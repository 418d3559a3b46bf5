/// Transport kernel shared by exchange modules
///
/// Exchange-agnostic plumbing for both REST and WebSocket traffic. Exchange
/// modules plug in a [`Signer`], a [`WsCodec`] and an
/// [`ErrorCodeTable`](crate::core::errors::ErrorCodeTable); everything else
/// lives here.
///
/// # REST
/// - [`RestExecutor`]: sign, rate-limit, send, classify, retry
/// - [`RateGovernor`]: rolling-window weight budget plus order quota
/// - [`HttpTransport`]: the byte-moving seam, `reqwest` by default
///
/// # WebSocket
/// - [`SubscriptionMultiplexer`]: spreads channels across connections
/// - [`ConnectionHandle`]: one socket, reconnect and resubscribe
/// - [`MessageRouter`]: channel name to ordered handlers
/// - [`WsSession`]: the socket seam, `tokio-tungstenite` by default
///
/// ## REST-only usage
/// ```rust,no_run
/// use coinmx::core::kernel::*;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let rest_config = RestClientConfig::new(
///     "https://dapi.binance.com".to_string(),
///     "binance_coinm".to_string(),
/// )
/// .with_time_endpoint("/dapi/v1/time");
/// let signer = Arc::new(HmacSigner::new("api_key", "secret_key"));
/// let rest = RestClientBuilder::new(rest_config)
///     .with_signer(signer)
///     .build()?;
///
/// let response = rest.execute(RestRequest::get("/dapi/v1/ping")).await?;
/// assert_eq!(response.status_code, 200);
/// # Ok(())
/// # }
/// ```
pub mod codec;
pub mod connection;
pub mod multiplexer;
pub mod rate_limit;
pub mod rest;
pub mod router;
pub mod signer;
pub mod ws;

// Re-export key types for convenience
pub use codec::{InboundFrame, WsCodec};
pub use connection::{ConnectionCommand, ConnectionHandle, ConnectionStatsSnapshot};
pub use multiplexer::{MultiplexerConfig, SessionFactory, SubscriptionMultiplexer};
pub use rate_limit::{RateGovernor, RateGovernorConfig};
pub use rest::{
    HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, RestClient, RestClientBuilder,
    RestClientConfig, RestExecutor, RestRequest, RestResponse,
};
pub use router::{ControlEvent, MessageRouter, RouteOutcome};
pub use signer::{HmacSigner, SignatureResult, Signer, API_KEY_HEADER};
pub use ws::{TungsteniteWs, WsConfig, WsSession};
