//! The configuration store interface.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::row::{ChangeEvent, ConfigRow};

/// Read access and update notifications for the pricing configuration table.
#[async_trait]
pub trait ConfigStore: Send + Sync + 'static {
    /// Fetch every row of the table. Row order is not significant.
    async fn fetch_rows(&self) -> Result<Vec<ConfigRow>>;

    /// Open a feed of `UPDATE` events on the table.
    ///
    /// Returns once the store has acknowledged the subscription.
    async fn subscribe_updates(&self) -> Result<ChangeFeed>;
}

#[async_trait]
impl<T: ConfigStore + ?Sized> ConfigStore for std::sync::Arc<T> {
    async fn fetch_rows(&self) -> Result<Vec<ConfigRow>> {
        (**self).fetch_rows().await
    }

    async fn subscribe_updates(&self) -> Result<ChangeFeed> {
        (**self).subscribe_updates().await
    }
}

/// A live stream of change events.
///
/// Closing or dropping the feed cancels the underlying connection.
#[derive(Debug)]
pub struct ChangeFeed {
    events: mpsc::Receiver<ChangeEvent>,
    cancel: CancellationToken,
}

impl ChangeFeed {
    pub fn new(events: mpsc::Receiver<ChangeEvent>, cancel: CancellationToken) -> Self {
        Self { events, cancel }
    }

    /// Wait for the next event. Returns `None` once the feed has closed.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        tokio::select! {
            biased;

            _ = self.cancel.cancelled() => None,
            event = self.events.recv() => event,
        }
    }

    /// Tear the feed down. Safe to call more than once.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.events.is_closed()
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
