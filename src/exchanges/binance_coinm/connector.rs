use crate::core::errors::ExchangeError;
use crate::core::kernel::{ConnectionStatsSnapshot, RestClient, SubscriptionMultiplexer, WsSession};
use crate::core::traits::{Callback, StreamSpec};
use crate::core::types::SubscriptionDescriptor;
use crate::exchanges::binance_coinm::rest::BinanceCoinMRestClient;
use crate::exchanges::binance_coinm::subscriptions::CoinMStream;
use crate::exchanges::binance_coinm::user_data::{listen_key_from, ListenKeyKeepAlive, LISTEN_KEY_KEEPALIVE};
use parking_lot::Mutex;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Binance COIN-M connector: typed REST calls plus market and account streams.
pub struct BinanceCoinMConnector<R: RestClient, W: WsSession> {
    pub rest: BinanceCoinMRestClient<R>,
    streams: SubscriptionMultiplexer<W>,
    user_data: Mutex<Option<ListenKeyKeepAlive>>,
    listen_key_keepalive: Duration,
}

impl<R: RestClient, W: WsSession> BinanceCoinMConnector<R, W> {
    pub fn new(rest: R, streams: SubscriptionMultiplexer<W>) -> Self {
        Self {
            rest: BinanceCoinMRestClient::new(rest),
            streams,
            user_data: Mutex::new(None),
            listen_key_keepalive: LISTEN_KEY_KEEPALIVE,
        }
    }

    /// Override how often the user data listen key is refreshed.
    pub fn with_listen_key_keepalive(mut self, every: Duration) -> Self {
        self.listen_key_keepalive = every;
        self
    }

    pub fn streams(&self) -> &SubscriptionMultiplexer<W> {
        &self.streams
    }

    /// Subscribe a batch of streams. Returns the channels that were not
    /// already live.
    pub async fn compose_subscriptions(
        &self,
        descriptors: Vec<SubscriptionDescriptor>,
    ) -> Result<Vec<String>, ExchangeError> {
        self.streams.compose(descriptors).await
    }

    /// Drop streams and their handlers.
    pub async fn unsubscribe(&self, streams: &[CoinMStream]) -> Result<Vec<String>, ExchangeError> {
        let channels: Vec<String> = streams.iter().map(StreamSpec::channel_name).collect();
        self.streams.unsubscribe(&channels).await
    }

    pub async fn unsubscribe_channels(&self, channels: &[String]) -> Result<Vec<String>, ExchangeError> {
        self.streams.unsubscribe(channels).await
    }

    pub async fn active_channels(&self) -> Vec<String> {
        self.streams.channels().await
    }

    pub async fn connection_stats(&self) -> Vec<ConnectionStatsSnapshot> {
        self.streams.stats().await
    }

    /// Listen key of the running user data stream, if any.
    pub fn user_data_listen_key(&self) -> Option<String> {
        self.user_data
            .lock()
            .as_ref()
            .map(|keepalive| keepalive.listen_key().to_string())
    }

    /// Stop refreshing the listen key, unsubscribe its channel and delete it.
    #[instrument(skip(self), fields(exchange = "binance_coinm"))]
    pub async fn stop_user_data_stream(&self) -> Result<(), ExchangeError> {
        let running = self.user_data.lock().take();
        let Some(keepalive) = running else {
            return Ok(());
        };
        let listen_key = keepalive.listen_key().to_string();
        keepalive.stop().await;
        self.streams.unsubscribe(&[listen_key]).await?;
        self.rest.close_listen_key().await?;
        info!("user data stream stopped");
        Ok(())
    }

    /// Measure the clock offset used for signed request timestamps.
    #[instrument(skip(self), fields(exchange = "binance_coinm"))]
    pub async fn sync_server_time(&self) -> Result<i64, ExchangeError> {
        let offset = self.rest.inner().sync_time().await?;
        info!(offset_ms = offset, "server time synchronized");
        Ok(offset)
    }

    /// Close every stream connection and stop the listen key refresh. REST
    /// calls keep working.
    pub async fn close(&self) {
        let keepalive = self.user_data.lock().take();
        if let Some(keepalive) = keepalive {
            keepalive.stop().await;
        }
        self.streams.close().await;
    }
}

impl<R: RestClient + Clone + 'static, W: WsSession> BinanceCoinMConnector<R, W> {
    /// Open the account's user data stream.
    ///
    /// Creates a listen key, subscribes it on the multiplexer and keeps it
    /// alive until `stop_user_data_stream` or `close`. Returns the key.
    #[instrument(skip(self, callbacks), fields(exchange = "binance_coinm"))]
    pub async fn start_user_data_stream(
        &self,
        callbacks: impl IntoIterator<Item = Callback>,
    ) -> Result<String, ExchangeError> {
        let response = self.rest.create_listen_key().await?;
        let listen_key = listen_key_from(&response)?;

        self.streams
            .compose(vec![CoinMStream::account(listen_key.clone()).with_callbacks(callbacks)])
            .await?;

        let keepalive =
            ListenKeyKeepAlive::spawn(self.rest.clone(), listen_key.clone(), self.listen_key_keepalive);
        let previous = self.user_data.lock().replace(keepalive);
        if let Some(previous) = previous {
            let stale = previous.listen_key().to_string();
            previous.stop().await;
            if stale != listen_key {
                if let Err(e) = self.streams.unsubscribe(&[stale]).await {
                    warn!(error = %e, "failed to drop previous listen key channel");
                }
            }
        }

        info!("user data stream started");
        Ok(listen_key)
    }
}
