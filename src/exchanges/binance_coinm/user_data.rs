use crate::core::errors::ExchangeError;
use crate::core::kernel::{RestClient, RestResponse};
use crate::exchanges::binance_coinm::rest::BinanceCoinMRestClient;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Listen keys expire 60 minutes after the last keep-alive.
pub const LISTEN_KEY_KEEPALIVE: Duration = Duration::from_secs(30 * 60);

#[derive(Deserialize)]
struct ListenKey {
    #[serde(rename = "listenKey")]
    listen_key: String,
}

/// Extract the key from a create-listen-key response.
pub fn listen_key_from(response: &RestResponse) -> Result<String, ExchangeError> {
    let ListenKey { listen_key } = response.json()?;
    Ok(listen_key)
}

/// Background refresh of one user data stream listen key.
///
/// Dropping the handle also ends the task.
#[derive(Debug)]
pub struct ListenKeyKeepAlive {
    listen_key: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ListenKeyKeepAlive {
    /// PUT the key every `every`, starting one period from now.
    pub fn spawn<R>(rest: BinanceCoinMRestClient<R>, listen_key: String, every: Duration) -> Self
    where
        R: RestClient + Clone + 'static,
    {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let key = listen_key.clone();
        let task = tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + every, every);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticks.tick() => match rest.keep_alive_listen_key().await {
                        Ok(_) => debug!(listen_key = %key, "listen key extended"),
                        Err(e) => warn!(listen_key = %key, error = %e, "listen key keep-alive failed"),
                    },
                }
            }
            debug!(listen_key = %key, "listen key keep-alive stopped");
        });

        Self {
            listen_key,
            shutdown,
            task,
        }
    }

    pub fn listen_key(&self) -> &str {
        &self.listen_key
    }

    /// Stop refreshing and wait for the task to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "listen key keep-alive ended abnormally");
        }
    }
}
