use crate::core::errors::ExchangeError;
use crate::core::kernel::{InboundFrame, WsCodec};
use crate::core::types::StreamMessage;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

/// Combined-stream (`/stream`) dialect of the COIN-M market data socket.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinanceCoinMCodec;

impl BinanceCoinMCodec {
    fn control_frame(method: &str, channels: &[String], id: u64) -> Message {
        Message::Text(
            json!({
                "method": method,
                "params": channels,
                "id": id
            })
            .to_string(),
        )
    }
}

impl WsCodec for BinanceCoinMCodec {
    fn encode_subscription(&self, channels: &[String], id: u64) -> Result<Message, ExchangeError> {
        if channels.is_empty() {
            return Err(ExchangeError::InvalidSubscription(
                "no channels to subscribe".to_string(),
            ));
        }
        Ok(Self::control_frame("SUBSCRIBE", channels, id))
    }

    fn encode_unsubscription(
        &self,
        channels: &[String],
        id: u64,
    ) -> Result<Message, ExchangeError> {
        if channels.is_empty() {
            return Err(ExchangeError::InvalidSubscription(
                "no channels to unsubscribe".to_string(),
            ));
        }
        Ok(Self::control_frame("UNSUBSCRIBE", channels, id))
    }

    fn decode_message(&self, message: Message) -> Result<InboundFrame, ExchangeError> {
        let text = match message {
            Message::Text(text) => text,
            Message::Binary(data) => String::from_utf8(data).map_err(|e| {
                ExchangeError::DeserializationError(format!(
                    "Invalid UTF-8 in binary message: {}",
                    e
                ))
            })?,
            other => {
                return Err(ExchangeError::DeserializationError(format!(
                    "not a data frame: {:?}",
                    other
                )))
            }
        };

        let mut value: Value = serde_json::from_str(&text).map_err(|e| {
            ExchangeError::DeserializationError(format!("Failed to parse JSON: {}", e))
        })?;

        // Combined stream envelope
        if let Some(stream) = value.get("stream").and_then(Value::as_str) {
            let stream = stream.to_string();
            let data = value.get_mut("data").map(Value::take).ok_or_else(|| {
                ExchangeError::DeserializationError(
                    "Missing data field in stream message".to_string(),
                )
            })?;
            return Ok(InboundFrame::Data(StreamMessage { stream, data }));
        }

        let id = value.get("id").and_then(Value::as_u64);

        if let Some(error) = value.get("error") {
            return Ok(InboundFrame::ServerError {
                id,
                code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: error
                    .get("msg")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }

        if let (Some(id), Some(_)) = (id, value.get("result")) {
            return Ok(InboundFrame::SubscriptionAck { id });
        }

        Ok(InboundFrame::Unrecognized(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(message: Message) -> Value {
        serde_json::from_str(&message.into_text().unwrap()).unwrap()
    }

    #[test]
    fn test_encode_subscription() {
        let frame = BinanceCoinMCodec
            .encode_subscription(&["btcusd_perp@aggTrade".to_string()], 7)
            .unwrap();
        assert_eq!(
            text(frame),
            json!({"method": "SUBSCRIBE", "params": ["btcusd_perp@aggTrade"], "id": 7})
        );

        let frame = BinanceCoinMCodec
            .encode_unsubscription(&["a".to_string(), "b".to_string()], 8)
            .unwrap();
        assert_eq!(
            text(frame),
            json!({"method": "UNSUBSCRIBE", "params": ["a", "b"], "id": 8})
        );
        assert!(BinanceCoinMCodec.encode_subscription(&[], 1).is_err());
    }

    #[test]
    fn test_decode_stream_envelope() {
        let frame = BinanceCoinMCodec
            .decode_message(Message::Text(
                r#"{"stream":"btcusd_perp@markPrice","data":{"e":"markPriceUpdate","p":"11794.15"}}"#
                    .to_string(),
            ))
            .unwrap();
        assert_eq!(
            frame,
            InboundFrame::Data(StreamMessage {
                stream: "btcusd_perp@markPrice".to_string(),
                data: json!({"e": "markPriceUpdate", "p": "11794.15"}),
            })
        );
    }

    #[test]
    fn test_decode_control_frames() {
        assert_eq!(
            BinanceCoinMCodec
                .decode_message(Message::Text(r#"{"result":null,"id":3}"#.to_string()))
                .unwrap(),
            InboundFrame::SubscriptionAck { id: 3 }
        );
        assert_eq!(
            BinanceCoinMCodec
                .decode_message(Message::Text(
                    r#"{"error":{"code":2,"msg":"Invalid request"},"id":4}"#.to_string()
                ))
                .unwrap(),
            InboundFrame::ServerError {
                id: Some(4),
                code: 2,
                message: "Invalid request".to_string()
            }
        );
        assert!(matches!(
            BinanceCoinMCodec
                .decode_message(Message::Text(r#"{"hello":1}"#.to_string()))
                .unwrap(),
            InboundFrame::Unrecognized(_)
        ));
        assert!(BinanceCoinMCodec
            .decode_message(Message::Text("nope".to_string()))
            .is_err());
    }
}
