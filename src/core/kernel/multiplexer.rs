use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::WsCodec;
use crate::core::kernel::connection::{ConnectionHandle, ConnectionStatsSnapshot};
use crate::core::kernel::router::MessageRouter;
use crate::core::kernel::ws::{WsConfig, WsSession};
use crate::core::traits::Callback;
use crate::core::types::{ConnectionState, SubscriptionDescriptor};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// Streams one connection may carry.
pub const DEFAULT_MAX_STREAMS_PER_CONNECTION: usize = 200;

#[derive(Debug, Clone)]
pub struct MultiplexerConfig {
    pub max_streams_per_connection: usize,
    pub ws: WsConfig,
    /// Exchange name for logging and tracing
    pub exchange_name: String,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            max_streams_per_connection: DEFAULT_MAX_STREAMS_PER_CONNECTION,
            ws: WsConfig::default(),
            exchange_name: "exchange".to_string(),
        }
    }
}

impl MultiplexerConfig {
    pub fn new(exchange_name: impl Into<String>) -> Self {
        Self {
            exchange_name: exchange_name.into(),
            ..Self::default()
        }
    }

    pub fn with_max_streams_per_connection(mut self, max_streams: usize) -> Self {
        self.max_streams_per_connection = max_streams.max(1);
        self
    }

    pub fn with_ws_config(mut self, ws: WsConfig) -> Self {
        self.ws = ws;
        self
    }
}

/// Builds a fresh, unconnected session for each new connection.
pub type SessionFactory<W> = Arc<dyn Fn() -> W + Send + Sync>;

#[derive(Default)]
struct Registry {
    connections: Vec<Arc<ConnectionHandle>>,
    /// channel -> index into `connections`
    assignments: HashMap<String, usize>,
    closed: bool,
}

/// Spreads subscriptions over as many connections as the per-connection
/// stream limit requires and keeps every channel on exactly one of them.
///
/// The registry lock is held for a whole `compose`/`unsubscribe`/`close`, so
/// concurrent calls can never assign a channel twice.
pub struct SubscriptionMultiplexer<W: WsSession> {
    config: MultiplexerConfig,
    factory: SessionFactory<W>,
    codec: Arc<dyn WsCodec>,
    router: Arc<MessageRouter>,
    registry: Mutex<Registry>,
}

impl<W: WsSession> std::fmt::Debug for SubscriptionMultiplexer<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionMultiplexer")
            .field("config", &self.config)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

impl<W: WsSession> SubscriptionMultiplexer<W> {
    pub fn new(config: MultiplexerConfig, codec: Arc<dyn WsCodec>, factory: SessionFactory<W>) -> Self {
        let router = Arc::new(MessageRouter::new(codec.clone()));
        Self {
            config,
            factory,
            codec,
            router,
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn config(&self) -> &MultiplexerConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// Add a batch of subscriptions.
    ///
    /// Every descriptor is validated before anything changes. Descriptors for
    /// the same channel (in this batch or an earlier one) are merged: their
    /// callbacks are appended and no new subscribe frame is sent. Returns the
    /// channels that were newly subscribed.
    #[instrument(skip(self, descriptors), fields(exchange = %self.config.exchange_name, count = descriptors.len()))]
    pub async fn compose(
        &self,
        descriptors: Vec<SubscriptionDescriptor>,
    ) -> Result<Vec<String>, ExchangeError> {
        for descriptor in &descriptors {
            descriptor.validate()?;
            if descriptor.channel_name().is_empty() {
                return Err(ExchangeError::InvalidSubscription(format!(
                    "empty channel name for {:?}",
                    descriptor.stream()
                )));
            }
        }

        let mut registry = self.registry.lock().await;
        if registry.closed {
            return Err(ExchangeError::ConnectionClosed(
                "subscription multiplexer is closed".to_string(),
            ));
        }

        let mut merged: Vec<(String, Vec<Callback>)> = Vec::new();
        for descriptor in descriptors {
            let channel = descriptor.channel_name();
            let callbacks = descriptor.into_callbacks();
            match merged.iter_mut().find(|(existing, _)| *existing == channel) {
                Some((_, existing)) => existing.extend(callbacks),
                None => merged.push((channel, callbacks)),
            }
        }

        let mut added = Vec::new();
        for (channel, callbacks) in merged {
            self.router.register(&channel, callbacks);
            if registry.assignments.contains_key(&channel) {
                debug!(%channel, "merged into existing subscription");
            } else {
                added.push(channel);
            }
        }

        let mut planned: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for channel in &added {
            let index = self.pick_connection(&mut registry, &planned);
            planned.entry(index).or_default().push(channel.clone());
            registry.assignments.insert(channel.clone(), index);
        }

        for (index, channels) in planned {
            debug!(connection = registry.connections[index].id(), count = channels.len(), "assigning channels");
            registry.connections[index].subscribe(channels)?;
        }

        if !added.is_empty() {
            info!(
                added = added.len(),
                total = registry.assignments.len(),
                connections = registry.connections.len(),
                "subscriptions composed"
            );
        }
        Ok(added)
    }

    fn pick_connection(&self, registry: &mut Registry, planned: &BTreeMap<usize, Vec<String>>) -> usize {
        let limit = self.config.max_streams_per_connection;
        let free = registry.connections.iter().enumerate().position(|(index, conn)| {
            let pending = planned.get(&index).map_or(0, Vec::len);
            conn.state() != ConnectionState::Closed && conn.channel_count() + pending < limit
        });
        if let Some(index) = free {
            return index;
        }

        let id = registry.connections.len();
        let handle = ConnectionHandle::spawn(
            id,
            (self.factory)(),
            self.codec.clone(),
            self.router.clone(),
            self.config.ws.clone(),
            self.config.exchange_name.clone(),
        );
        info!(connection = id, "opening connection");
        registry.connections.push(Arc::new(handle));
        id
    }

    /// Remove channels: routes are dropped, the owning connections send
    /// UNSUBSCRIBE and never replay them. Returns the channels that were active.
    #[instrument(skip(self, channels), fields(exchange = %self.config.exchange_name, count = channels.len()))]
    pub async fn unsubscribe(&self, channels: &[String]) -> Result<Vec<String>, ExchangeError> {
        let mut registry = self.registry.lock().await;
        let mut grouped: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for channel in channels {
            if let Some(index) = registry.assignments.remove(channel) {
                self.router.remove(channel);
                grouped.entry(index).or_default().push(channel.clone());
            }
        }

        let mut removed = Vec::new();
        for (index, group) in grouped {
            removed.extend(group.iter().cloned());
            registry.connections[index].unsubscribe(group)?;
        }
        Ok(removed)
    }

    /// Shut every connection down and forget all subscriptions.
    #[instrument(skip(self), fields(exchange = %self.config.exchange_name))]
    pub async fn close(&self) {
        let mut registry = self.registry.lock().await;
        registry.closed = true;
        for connection in registry.connections.drain(..) {
            connection.close().await;
        }
        registry.assignments.clear();
        self.router.clear();
        info!("all connections closed");
    }

    pub async fn is_closed(&self) -> bool {
        self.registry.lock().await.closed
    }

    /// Every active channel, sorted.
    pub async fn channels(&self) -> Vec<String> {
        let registry = self.registry.lock().await;
        let mut channels: Vec<String> = registry.assignments.keys().cloned().collect();
        channels.sort();
        channels
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.lock().await.connections.len()
    }

    /// Channel set of each connection, in connection order.
    pub async fn connection_channels(&self) -> Vec<Vec<String>> {
        self.registry
            .lock()
            .await
            .connections
            .iter()
            .map(|c| c.channels())
            .collect()
    }

    pub async fn connection_states(&self) -> Vec<ConnectionState> {
        self.registry
            .lock()
            .await
            .connections
            .iter()
            .map(|c| c.state())
            .collect()
    }

    pub async fn stats(&self) -> Vec<ConnectionStatsSnapshot> {
        self.registry
            .lock()
            .await
            .connections
            .iter()
            .map(|c| c.stats())
            .collect()
    }

    pub fn routing_misses(&self) -> u64 {
        self.router.routing_misses()
    }
}
