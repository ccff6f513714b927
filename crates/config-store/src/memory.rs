//! Process-local configuration store.
//!
//! Useful for local development and for exercising consumers without a live
//! database: rows live in memory, fetches are counted, failures can be
//! injected and updates are pushed to every open feed.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::row::{ChangeEvent, ConfigRow};
use crate::store::{ChangeFeed, ConfigStore};

const DEFAULT_TABLE: &str = "pricing_config";
const FEED_CAPACITY: usize = 64;

struct Subscriber {
    tx: mpsc::Sender<ChangeEvent>,
    cancel: CancellationToken,
}

impl Subscriber {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }
}

/// In-memory implementation of [`ConfigStore`].
pub struct InMemoryConfigStore {
    table: String,
    rows: RwLock<BTreeMap<String, String>>,
    fetch_count: AtomicUsize,
    pending_failures: AtomicUsize,
    reject_subscriptions: AtomicBool,
    fetch_delay: Mutex<Option<Duration>>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::with_table(DEFAULT_TABLE)
    }

    pub fn with_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            rows: RwLock::new(BTreeMap::new()),
            fetch_count: AtomicUsize::new(0),
            pending_failures: AtomicUsize::new(0),
            reject_subscriptions: AtomicBool::new(false),
            fetch_delay: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Create a store pre-populated with rows.
    pub fn with_rows<I, K, V>(rows: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        for (key, value) in rows {
            store.set(key, value);
        }
        store
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Insert or replace a row without notifying subscribers.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.rows.write().insert(key.into(), value.into());
    }

    /// Remove a row without notifying subscribers.
    pub fn remove(&self, key: &str) -> Option<String> {
        self.rows.write().remove(key)
    }

    /// Update a row and push an update event to every open feed.
    ///
    /// Returns the number of feeds that received the event.
    pub fn notify_update(&self, key: impl Into<String>, value: impl Into<String>) -> usize {
        let key = key.into();
        self.set(key.clone(), value);
        self.publish(ChangeEvent::new(&self.table).with_key(key))
    }

    /// Push an event to every open feed without touching the rows.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(Subscriber::is_live);

        let mut delivered = 0;
        for subscriber in subscribers.iter() {
            match subscriber.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Dropping change event for a slow subscriber: {}", e),
            }
        }
        debug!("Published {} to {} feeds", event.description(), delivered);
        delivered
    }

    /// Close every open feed, as if the store dropped the connections.
    pub fn close_feeds(&self) {
        self.subscribers.lock().clear();
    }

    /// Make the next `count` fetches fail.
    pub fn fail_next_fetches(&self, count: usize) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_fetch(&self) {
        self.fail_next_fetches(1);
    }

    /// Reject (or accept again) new subscriptions.
    pub fn reject_subscriptions(&self, reject: bool) {
        self.reject_subscriptions.store(reject, Ordering::SeqCst);
    }

    /// Delay every fetch, to keep refreshes in flight.
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        *self.fetch_delay.lock() = delay;
    }

    /// Number of fetches attempted so far, failed ones included.
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// Number of feeds still open.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(Subscriber::is_live);
        subscribers.len()
    }

    fn take_failure(&self) -> bool {
        self.pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn fetch_rows(&self) -> Result<Vec<ConfigRow>> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);

        let delay = *self.fetch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.take_failure() {
            return Err(StoreError::unavailable("injected fetch failure"));
        }

        Ok(self
            .rows
            .read()
            .iter()
            .map(|(key, value)| ConfigRow::new(key.clone(), value.clone()))
            .collect())
    }

    async fn subscribe_updates(&self) -> Result<ChangeFeed> {
        if self.reject_subscriptions.load(Ordering::SeqCst) {
            return Err(StoreError::subscription("subscriptions are rejected"));
        }

        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let cancel = CancellationToken::new();
        self.subscribers.lock().push(Subscriber {
            tx,
            cancel: cancel.clone(),
        });

        Ok(ChangeFeed::new(rx, cancel))
    }
}
