use crate::core::{errors::ExchangeError, types::StreamMessage};
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

/// Receives every payload routed to a subscribed channel.
///
/// Handlers registered on the same channel run one after another in
/// registration order, and a channel never sees two payloads concurrently.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, message: &StreamMessage);
}

/// Shared handler reference stored by the router.
pub type Callback = Arc<dyn MessageHandler>;

/// A subscribable stream: knows its own channel name and how to validate itself.
pub trait StreamSpec: Send + Sync + Debug {
    /// Wire channel name, e.g. `btcusd_perp@aggTrade`.
    fn channel_name(&self) -> String;

    /// Reject malformed parameters before any network action.
    fn validate(&self) -> Result<(), ExchangeError>;
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(StreamMessage) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn on_message(&self, message: &StreamMessage) {
        (self.f)(message.clone()).await;
    }
}

/// Wrap an async closure as a [`Callback`].
///
/// ```rust,no_run
/// use coinmx::core::traits::handler_fn;
///
/// let cb = handler_fn(|msg| async move {
///     println!("{} -> {}", msg.stream, msg.data);
/// });
/// # drop(cb);
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Callback
where
    F: Fn(StreamMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(FnHandler { f })
}
