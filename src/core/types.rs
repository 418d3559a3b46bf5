use crate::core::errors::ExchangeError;
use crate::core::traits::{Callback, StreamSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// One routed payload from the combined-stream envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    pub stream: String,
    pub data: Value,
}

/// A stream plus the handlers that want its payloads.
///
/// Identity is the channel name: two descriptors naming the same channel are
/// merged into one subscription with their callbacks concatenated.
#[derive(Clone)]
pub struct SubscriptionDescriptor {
    stream: Arc<dyn StreamSpec>,
    callbacks: Vec<Callback>,
}

impl SubscriptionDescriptor {
    pub fn new(stream: impl StreamSpec + 'static) -> Self {
        Self {
            stream: Arc::new(stream),
            callbacks: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_callback(mut self, callback: Callback) -> Self {
        self.callbacks.push(callback);
        self
    }

    #[must_use]
    pub fn with_callbacks(mut self, callbacks: impl IntoIterator<Item = Callback>) -> Self {
        self.callbacks.extend(callbacks);
        self
    }

    pub fn channel_name(&self) -> String {
        self.stream.channel_name()
    }

    pub fn validate(&self) -> Result<(), ExchangeError> {
        self.stream.validate()
    }

    pub fn stream(&self) -> &dyn StreamSpec {
        self.stream.as_ref()
    }

    pub fn callbacks(&self) -> &[Callback] {
        &self.callbacks
    }

    pub(crate) fn into_callbacks(self) -> Vec<Callback> {
        self.callbacks
    }
}

impl fmt::Debug for SubscriptionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionDescriptor")
            .field("stream", &self.stream)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

/// Lifecycle of one physical WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

impl ConnectionState {
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Reconnecting => write!(f, "Reconnecting"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// HTTP verb of a REST call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
