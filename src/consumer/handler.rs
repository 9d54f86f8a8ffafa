//! Business handler boundary

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Business logic invoked once per decoded event
///
/// An `Err` leaves the message uncommitted so it is redelivered after the
/// group rebalances or the service restarts.
#[async_trait]
pub trait EventHandler<E>: Send + Sync + 'static {
    /// Handle one event; `cancel` fires when the engine is shutting down
    async fn handle(&self, event: E, cancel: &CancellationToken) -> anyhow::Result<()>;

    /// Get handler name for logs
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

#[async_trait]
impl<E, H> EventHandler<E> for Arc<H>
where
    E: Send + 'static,
    H: EventHandler<E>,
{
    async fn handle(&self, event: E, cancel: &CancellationToken) -> anyhow::Result<()> {
        (**self).handle(event, cancel).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Handler backed by an async closure, see [`handler_fn`]
#[derive(Clone)]
pub struct HandlerFn<F> {
    name: String,
    f: F,
}

/// Wrap an async closure as an [`EventHandler`]
pub fn handler_fn<F>(name: impl Into<String>, f: F) -> HandlerFn<F> {
    HandlerFn { name: name.into(), f }
}

#[async_trait]
impl<E, F, Fut> EventHandler<E> for HandlerFn<F>
where
    E: Send + 'static,
    F: Fn(E, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, event: E, cancel: &CancellationToken) -> anyhow::Result<()> {
        (self.f)(event, cancel.clone()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_closure_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = handler_fn("count", move |n: usize, _cancel: CancellationToken| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(n, Ordering::SeqCst);
                Ok::<(), anyhow::Error>(())
            }
        });

        let cancel = CancellationToken::new();
        handler.handle(2usize, &cancel).await.unwrap();
        Arc::new(handler).handle(3usize, &cancel).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_closure_handler_error_is_returned() {
        let handler = handler_fn("reject", |_: u8, _cancel: CancellationToken| async {
            Err::<(), _>(anyhow::anyhow!("nope"))
        });

        let err = handler.handle(1u8, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "nope");
        assert_eq!(EventHandler::<u8>::name(&handler), "reject");
    }
}
