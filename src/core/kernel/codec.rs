use crate::core::errors::ExchangeError;
use crate::core::types::StreamMessage;
use tokio_tungstenite::tungstenite::Message;

/// What a decoded inbound text frame turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Payload for a subscribed channel.
    Data(StreamMessage),
    /// Positive answer to a SUBSCRIBE/UNSUBSCRIBE request.
    SubscriptionAck { id: u64 },
    /// The server rejected a control request.
    ServerError {
        id: Option<u64>,
        code: i64,
        message: String,
    },
    /// Valid JSON that fits none of the above.
    Unrecognized(String),
}

/// Codec trait for handling exchange-specific WebSocket message encoding/decoding
///
/// Implementations are stateless; request ids are supplied by the caller so a
/// connection can correlate acks with the frames it sent.
pub trait WsCodec: Send + Sync + 'static {
    /// Encode a subscription request into a WebSocket message
    fn encode_subscription(&self, channels: &[String], id: u64) -> Result<Message, ExchangeError>;

    /// Encode an unsubscription request into a WebSocket message
    fn encode_unsubscription(&self, channels: &[String], id: u64)
        -> Result<Message, ExchangeError>;

    /// Decode a text or binary data frame.
    ///
    /// Control frames (ping, pong, close) never reach the codec; they are
    /// handled by the router.
    fn decode_message(&self, message: Message) -> Result<InboundFrame, ExchangeError>;
}
