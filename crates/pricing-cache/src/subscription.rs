//! Push invalidation from the store's change feed.

use config_store::ConfigStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::PricingCache;
use crate::error::{PricingError, Result};

/// A live change subscription.
///
/// The subscription runs until [`unsubscribe`](Self::unsubscribe) is called
/// or the store closes the feed. Dropping the handle leaves it running.
#[derive(Debug)]
pub struct SubscriptionHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Stop receiving change events. Calling it again has no effect.
    pub fn unsubscribe(&self) {
        if !self.cancel.is_cancelled() {
            info!("Unsubscribing from pricing configuration changes");
        }
        self.cancel.cancel();
    }

    /// Whether events are still being received.
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && !self.task.is_finished()
    }

    /// Unsubscribe and wait for the listener task to exit.
    pub async fn shutdown(self) {
        self.unsubscribe();
        if let Err(e) = self.task.await {
            warn!("Pricing change listener ended abnormally: {}", e);
        }
    }
}

impl<S: ConfigStore> PricingCache<S> {
    /// Invalidate the cache on every update to the configuration table.
    ///
    /// For each event the cache is invalidated first and `on_change` is called
    /// afterwards, so a `get_config` issued from the callback always fetches.
    /// The feed is not re-established if the store drops it.
    pub async fn subscribe_to_changes<F>(&self, on_change: F) -> Result<SubscriptionHandle>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut feed = self
            .store()
            .subscribe_updates()
            .await
            .map_err(PricingError::subscription)?;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let cache = self.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = token.cancelled() => break,

                    event = feed.recv() => match event {
                        Some(event) => {
                            debug!("Pricing change received: {}", event.description());
                            cache.invalidate();
                            on_change();
                        }
                        None => {
                            warn!("Pricing change feed closed, relying on TTL expiry from now on");
                            break;
                        }
                    },
                }
            }
            feed.close();
        });

        info!("Subscribed to pricing configuration changes");
        Ok(SubscriptionHandle { cancel, task })
    }
}
