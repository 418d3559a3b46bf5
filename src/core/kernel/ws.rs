use crate::core::errors::ExchangeError;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use nonzero_ext::nonzero;
use rand::Rng;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, instrument};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connection configuration
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// A connection with no inbound frame (pongs included) for this long is dead.
    pub read_timeout_ms: u64,
    /// Client ping interval in milliseconds
    pub ping_interval_ms: u64,
    /// First reconnection delay in milliseconds
    pub reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Channels per SUBSCRIBE/UNSUBSCRIBE frame
    pub subscribe_batch_size: usize,
    /// Outbound control frames allowed per second
    pub control_frames_per_second: NonZeroU32,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            read_timeout_ms: 90_000,
            ping_interval_ms: 30_000,
            reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            subscribe_batch_size: 1,
            control_frames_per_second: nonzero!(5u32),
        }
    }
}

impl WsConfig {
    pub fn with_read_timeout(mut self, read_timeout_ms: u64) -> Self {
        self.read_timeout_ms = read_timeout_ms;
        self
    }

    pub fn with_ping_interval(mut self, ping_interval_ms: u64) -> Self {
        self.ping_interval_ms = ping_interval_ms;
        self
    }

    pub fn with_reconnect_backoff(mut self, initial_ms: u64, max_ms: u64, multiplier: f64) -> Self {
        self.reconnect_delay_ms = initial_ms;
        self.max_reconnect_delay_ms = max_ms;
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_subscribe_batch_size(mut self, batch_size: usize) -> Self {
        self.subscribe_batch_size = batch_size.max(1);
        self
    }

    pub fn with_control_frames_per_second(mut self, rate: NonZeroU32) -> Self {
        self.control_frames_per_second = rate;
        self
    }

    /// Backoff before reconnect attempt `attempt` (0-based), capped and jittered.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let exp = self.backoff_multiplier.powi(attempt.min(32) as i32);
        let capped = (self.reconnect_delay_ms as f64 * exp).min(self.max_reconnect_delay_ms as f64);
        let jittered = capped * rand::thread_rng().gen_range(0.5..=1.0);
        Duration::from_millis(jittered as u64)
    }
}

/// WebSocket session trait - pure transport layer
///
/// One session is one physical socket. Reconnection policy lives in the
/// connection manager, which calls `connect` again on the same session.
#[async_trait]
pub trait WsSession: Send + 'static {
    /// Connect to the WebSocket
    async fn connect(&mut self) -> Result<(), ExchangeError>;

    /// Send a raw message
    async fn send_raw(&mut self, msg: Message) -> Result<(), ExchangeError>;

    /// Receive the next raw message, pings and pongs included.
    ///
    /// `None` means the stream ended.
    async fn next_raw(&mut self) -> Option<Result<Message, ExchangeError>>;

    /// Close the connection
    async fn close(&mut self) -> Result<(), ExchangeError>;

    /// Check if the connection is alive
    fn is_connected(&self) -> bool;
}

/// `tokio-tungstenite` socket. Pings are answered here and still handed to
/// the caller, since any inbound frame counts as liveness.
pub struct TungsteniteWs {
    url: String,
    exchange_name: String,
    config: WsConfig,
    sink: Option<SplitSink<WsStream, Message>>,
    source: Option<SplitStream<WsStream>>,
}

impl TungsteniteWs {
    pub fn new(url: String, exchange_name: String) -> Self {
        Self {
            url,
            exchange_name,
            config: WsConfig::default(),
            sink: None,
            source: None,
        }
    }

    pub fn with_config(mut self, config: WsConfig) -> Self {
        self.config = config;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn drop_socket(&mut self) {
        self.sink = None;
        self.source = None;
    }

    fn not_connected() -> ExchangeError {
        ExchangeError::ConnectionClosed("WebSocket not connected".to_string())
    }
}

#[async_trait]
impl WsSession for TungsteniteWs {
    #[instrument(skip(self), fields(exchange = %self.exchange_name, url = %self.url))]
    async fn connect(&mut self) -> Result<(), ExchangeError> {
        self.drop_socket();
        let limit = Duration::from_millis(self.config.connect_timeout_ms);
        let (stream, _response) = match tokio::time::timeout(limit, connect_async(self.url.as_str())).await {
            Err(_) => {
                return Err(ExchangeError::ConnectionTimeout(format!(
                    "no handshake within {}ms",
                    self.config.connect_timeout_ms
                )))
            }
            Ok(Err(e)) => {
                return Err(ExchangeError::TransportError(format!("WebSocket handshake failed: {}", e)))
            }
            Ok(Ok(connected)) => connected,
        };

        let (sink, source) = stream.split();
        self.sink = Some(sink);
        self.source = Some(source);
        debug!("socket open");
        Ok(())
    }

    async fn send_raw(&mut self, msg: Message) -> Result<(), ExchangeError> {
        let sink = self.sink.as_mut().ok_or_else(Self::not_connected)?;
        if let Err(e) = sink.send(msg).await {
            self.drop_socket();
            return Err(ExchangeError::TransportError(format!("WebSocket send failed: {}", e)));
        }
        Ok(())
    }

    async fn next_raw(&mut self) -> Option<Result<Message, ExchangeError>> {
        let Some(source) = self.source.as_mut() else {
            return Some(Err(Self::not_connected()));
        };

        // tungstenite queues the pong for an inbound ping and flushes it on the next read or write.
        match source.next().await {
            Some(Ok(frame)) => Some(Ok(frame)),
            Some(Err(e)) => {
                self.drop_socket();
                Some(Err(ExchangeError::TransportError(format!("WebSocket read failed: {}", e))))
            }
            None => {
                self.drop_socket();
                None
            }
        }
    }

    #[instrument(skip(self), fields(exchange = %self.exchange_name))]
    async fn close(&mut self) -> Result<(), ExchangeError> {
        if let Some(sink) = self.sink.as_mut() {
            let _ = sink.send(Message::Close(None)).await;
        }
        self.drop_socket();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.sink.is_some()
    }
}
