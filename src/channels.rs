//! Thin channel abstraction over `kanal`, letting background tasks be driven
//! by either the real async channel or an in-test substitute without the
//! rest of the crate depending on `kanal` types directly.

use std::sync::Arc;

#[async_trait::async_trait]
pub trait Tx<T>: Send + Sync {
    async fn send(&self, value: T) -> eyre::Result<()>;
}

#[async_trait::async_trait]
pub trait Rx<T>: Send + Sync {
    async fn recv(&self) -> eyre::Result<T>;
}

#[async_trait::async_trait]
impl<T: Send + 'static> Tx<T> for kanal::AsyncSender<T> {
    async fn send(&self, value: T) -> eyre::Result<()> {
        kanal::AsyncSender::send(self, value)
            .await
            .map_err(|err| eyre::eyre!("channel closed: {err}"))
    }
}

#[async_trait::async_trait]
impl<T: Send + 'static> Rx<T> for kanal::AsyncReceiver<T> {
    async fn recv(&self) -> eyre::Result<T> {
        kanal::AsyncReceiver::recv(self)
            .await
            .map_err(|err| eyre::eyre!("channel closed: {err}"))
    }
}

/// A `Tx<T>` behind an `Arc<dyn ...>`, for components that need to hand out
/// many cloneable handles to the same logical sender (e.g. one per webhook
/// request) without committing to `kanal`'s concrete sender type.
pub type DynTx<T> = Arc<dyn Tx<T>>;
pub type DynRx<T> = Arc<dyn Rx<T>>;

/// Construct a bounded kanal channel and return both ends behind the
/// `Tx`/`Rx` trait objects.
pub fn bounded<T: Send + 'static>(capacity: usize) -> (DynTx<T>, DynRx<T>) {
    let (tx, rx) = kanal::bounded_async(capacity);
    (Arc::new(tx), Arc::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_then_recv_round_trips() {
        let (tx, rx) = bounded::<u32>(4);
        tx.send(7).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), 7);
    }
}
