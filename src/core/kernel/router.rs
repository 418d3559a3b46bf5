use crate::core::kernel::codec::{InboundFrame, WsCodec};
use crate::core::traits::Callback;
use crate::core::types::StreamMessage;
use futures_util::FutureExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};

/// Non-data frames, handed back to the connection that read them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    Ack { id: u64 },
    ServerError {
        id: Option<u64>,
        code: i64,
        message: String,
    },
    /// Ping or pong.
    Heartbeat,
    /// Close frame from the server.
    Disconnect,
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Queued on the channel's dispatcher.
    Dispatched,
    /// Data for a channel nobody registered.
    Miss(String),
    Control(ControlEvent),
}

struct Route {
    handlers: Arc<RwLock<Vec<Callback>>>,
    queue: mpsc::UnboundedSender<StreamMessage>,
}

/// Maps channel names to ordered handler lists.
///
/// Every channel gets its own dispatcher task, so payloads on one channel are
/// handled strictly in arrival order while a slow handler only delays its own
/// channel. Routes are keyed on the channel string alone.
pub struct MessageRouter {
    codec: Arc<dyn WsCodec>,
    routes: RwLock<HashMap<String, Route>>,
    misses: AtomicU64,
    dispatched: AtomicU64,
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("routes", &self.routes.read().len())
            .field("misses", &self.routing_misses())
            .finish_non_exhaustive()
    }
}

impl MessageRouter {
    pub fn new(codec: Arc<dyn WsCodec>) -> Self {
        Self {
            codec,
            routes: RwLock::new(HashMap::new()),
            misses: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
        }
    }

    /// Append `callbacks` to `channel`, creating the route if needed.
    ///
    /// Returns `true` when the route is new. Must be called inside a Tokio
    /// runtime because a new route spawns its dispatcher.
    pub fn register(&self, channel: &str, callbacks: Vec<Callback>) -> bool {
        let mut routes = self.routes.write();
        if let Some(route) = routes.get(channel) {
            route.handlers.write().extend(callbacks);
            return false;
        }

        let handlers = Arc::new(RwLock::new(callbacks));
        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_dispatcher(channel.to_string(), handlers.clone(), rx));
        routes.insert(channel.to_string(), Route { handlers, queue });
        true
    }

    /// Drop the route; its dispatcher finishes the queued payloads and exits.
    pub fn remove(&self, channel: &str) -> bool {
        self.routes.write().remove(channel).is_some()
    }

    pub fn clear(&self) {
        self.routes.write().clear();
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.routes.read().contains_key(channel)
    }

    pub fn channels(&self) -> Vec<String> {
        self.routes.read().keys().cloned().collect()
    }

    pub fn handler_count(&self, channel: &str) -> usize {
        self.routes
            .read()
            .get(channel)
            .map_or(0, |route| route.handlers.read().len())
    }

    /// Data frames that arrived for unregistered channels.
    pub fn routing_misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Classify one raw frame and queue data payloads on their channel.
    pub fn route(&self, message: Message) -> RouteOutcome {
        match message {
            Message::Ping(_) | Message::Pong(_) => RouteOutcome::Control(ControlEvent::Heartbeat),
            Message::Close(frame) => {
                debug!(?frame, "server closed the stream");
                RouteOutcome::Control(ControlEvent::Disconnect)
            }
            Message::Frame(_) => RouteOutcome::Control(ControlEvent::Ignored),
            raw @ (Message::Text(_) | Message::Binary(_)) => match self.codec.decode_message(raw) {
                Ok(InboundFrame::Data(message)) => self.dispatch(message),
                Ok(InboundFrame::SubscriptionAck { id }) => {
                    trace!(id, "subscription acknowledged");
                    RouteOutcome::Control(ControlEvent::Ack { id })
                }
                Ok(InboundFrame::ServerError { id, code, message }) => {
                    warn!(?id, code, %message, "server rejected control frame");
                    RouteOutcome::Control(ControlEvent::ServerError { id, code, message })
                }
                Ok(InboundFrame::Unrecognized(text)) => {
                    debug!(%text, "unrecognized frame");
                    RouteOutcome::Control(ControlEvent::Ignored)
                }
                Err(e) => {
                    warn!(error = %e, "failed to decode frame");
                    RouteOutcome::Control(ControlEvent::Ignored)
                }
            },
        }
    }

    /// Queue an already-decoded payload.
    pub fn dispatch(&self, message: StreamMessage) -> RouteOutcome {
        let routes = self.routes.read();
        match routes.get(&message.stream) {
            Some(route) => {
                if route.queue.send(message).is_err() {
                    error!("dispatcher for channel is gone");
                }
                self.dispatched.fetch_add(1, Ordering::Relaxed);
                RouteOutcome::Dispatched
            }
            None => {
                let misses = self.misses.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(channel = %message.stream, misses, "routing miss");
                RouteOutcome::Miss(message.stream)
            }
        }
    }
}

async fn run_dispatcher(
    channel: String,
    handlers: Arc<RwLock<Vec<Callback>>>,
    mut rx: mpsc::UnboundedReceiver<StreamMessage>,
) {
    while let Some(message) = rx.recv().await {
        let snapshot: Vec<Callback> = handlers.read().clone();
        for handler in snapshot {
            if AssertUnwindSafe(handler.on_message(&message))
                .catch_unwind()
                .await
                .is_err()
            {
                error!(channel = %channel, "message handler panicked");
            }
        }
    }
    trace!(channel = %channel, "dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ExchangeError;
    use crate::core::traits::handler_fn;
    use serde_json::json;

    struct JsonCodec;

    impl WsCodec for JsonCodec {
        fn encode_subscription(&self, _: &[String], _: u64) -> Result<Message, ExchangeError> {
            Ok(Message::Text(String::new()))
        }

        fn encode_unsubscription(&self, _: &[String], _: u64) -> Result<Message, ExchangeError> {
            Ok(Message::Text(String::new()))
        }

        fn decode_message(&self, message: Message) -> Result<InboundFrame, ExchangeError> {
            let text = message.into_text().map_err(|e| ExchangeError::Other(e.to_string()))?;
            Ok(InboundFrame::Data(serde_json::from_str(&text)?))
        }
    }

    fn data(stream: &str, n: u64) -> Message {
        Message::Text(json!({"stream": stream, "data": {"n": n}}).to_string())
    }

    #[tokio::test]
    async fn test_callbacks_run_in_order() {
        let router = MessageRouter::new(Arc::new(JsonCodec));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let first = tx.clone();
        let second = tx;
        assert!(router.register(
            "a",
            vec![handler_fn(move |m| {
                let tx = first.clone();
                async move {
                    let _ = tx.send(("first", m.data["n"].as_u64()));
                }
            })]
        ));
        assert!(!router.register(
            "a",
            vec![handler_fn(move |m| {
                let tx = second.clone();
                async move {
                    let _ = tx.send(("second", m.data["n"].as_u64()));
                }
            })]
        ));
        assert_eq!(router.handler_count("a"), 2);

        assert_eq!(router.route(data("a", 1)), RouteOutcome::Dispatched);
        assert_eq!(router.route(data("a", 2)), RouteOutcome::Dispatched);

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(rx.recv().await.unwrap());
        }
        assert_eq!(
            seen,
            vec![
                ("first", Some(1)),
                ("second", Some(1)),
                ("first", Some(2)),
                ("second", Some(2)),
            ]
        );
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_kill_channel() {
        let router = MessageRouter::new(Arc::new(JsonCodec));
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.register(
            "a",
            vec![
                handler_fn(|m| async move {
                    if m.data["n"] == 1 {
                        panic!("boom");
                    }
                }),
                handler_fn(move |m| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send(m.data["n"].as_u64());
                    }
                }),
            ],
        );
        router.route(data("a", 1));
        router.route(data("a", 2));
        assert_eq!(rx.recv().await.unwrap(), Some(1));
        assert_eq!(rx.recv().await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_unknown_channel_counts_miss() {
        let router = MessageRouter::new(Arc::new(JsonCodec));
        assert_eq!(router.route(data("nobody", 1)), RouteOutcome::Miss("nobody".to_string()));
        assert_eq!(router.routing_misses(), 1);

        router.register("a", Vec::new());
        assert!(router.remove("a"));
        assert_eq!(router.route(data("a", 1)), RouteOutcome::Miss("a".to_string()));
        assert_eq!(router.routing_misses(), 2);
    }

    #[tokio::test]
    async fn test_control_frames() {
        let router = MessageRouter::new(Arc::new(JsonCodec));
        assert_eq!(
            router.route(Message::Ping(vec![1])),
            RouteOutcome::Control(ControlEvent::Heartbeat)
        );
        assert_eq!(
            router.route(Message::Close(None)),
            RouteOutcome::Control(ControlEvent::Disconnect)
        );
        assert_eq!(
            router.route(Message::Text("not json".to_string())),
            RouteOutcome::Control(ControlEvent::Ignored)
        );
    }
}
