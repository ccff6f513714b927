//! The pricing cache.
//!
//! Holds at most one [`PricingSnapshot`] and refreshes it from the store once
//! it is older than the TTL or has been invalidated. Concurrent callers that
//! need a refresh share a single fetch.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use config_store::ConfigStore;
use parking_lot::Mutex;
use tokio::sync::{Notify, OnceCell};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::error::{PricingError, Result};
use crate::snapshot::{PricingSnapshot, ValueParsing};

/// Default snapshot lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Cache settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub parsing: ValueParsing,
}

impl CacheConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_parsing(mut self, parsing: ValueParsing) -> Self {
        self.parsing = parsing;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            parsing: ValueParsing::default(),
        }
    }
}

/// Where the cache stands right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// No snapshot held.
    Empty,
    /// Snapshot younger than the TTL.
    Fresh,
    /// Snapshot at least as old as the TTL.
    Stale,
}

/// Statistics about the pricing cache.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Fetches issued to the store, failed ones included.
    pub fetch_count: u64,
    /// Calls answered from the held snapshot.
    pub hit_count: u64,
    pub state: CacheState,
    pub snapshot_age: Option<Duration>,
    /// Whether a refresh is currently running.
    pub in_flight: bool,
    pub ttl: Duration,
}

type RefreshResult = Result<Arc<PricingSnapshot>>;

/// Outcome of one store refresh, shared by the leader and every caller that
/// joined it. The cell is written once; `notify` wakes the joiners.
struct InFlightState {
    result: OnceCell<RefreshResult>,
    notify: Notify,
}

impl InFlightState {
    fn new() -> Self {
        Self {
            result: OnceCell::new(),
            notify: Notify::new(),
        }
    }

    fn set_result(&self, result: RefreshResult) {
        let _ = self.result.set(result);
        self.notify.notify_waiters();
    }

    async fn wait(&self) -> RefreshResult {
        loop {
            if let Some(result) = self.result.get() {
                return result.clone();
            }

            let notified = self.notify.notified();
            if let Some(result) = self.result.get() {
                return result.clone();
            }

            notified.await;
        }
    }
}

/// Handle to the refresh currently marked in the slot.
type InFlightRequest = Arc<InFlightState>;

/// The snapshot slot. Only touched under the lock, never across an await.
#[derive(Default)]
struct Slot {
    snapshot: Option<Arc<PricingSnapshot>>,
    in_flight: Option<InFlightRequest>,
    /// Bumped by every invalidation; refreshes started under an older
    /// generation are not installed.
    generation: u64,
}

#[derive(Default)]
struct Counters {
    fetches: AtomicU64,
    hits: AtomicU64,
}

enum Lookup {
    Hit(Arc<PricingSnapshot>),
    Join(InFlightRequest),
    Lead(InFlightRequest, u64),
}

/// Time-bounded cache of the pricing configuration.
///
/// Clones share the same snapshot slot.
pub struct PricingCache<S> {
    store: Arc<S>,
    slot: Arc<Mutex<Slot>>,
    counters: Arc<Counters>,
    config: CacheConfig,
}

impl<S> Clone for PricingCache<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            slot: self.slot.clone(),
            counters: self.counters.clone(),
            config: self.config,
        }
    }
}

impl<S: ConfigStore> PricingCache<S> {
    /// Create an empty cache with the default 30 second TTL and strict parsing.
    pub fn new(store: S) -> Self {
        Self::with_config(Arc::new(store), CacheConfig::default())
    }

    /// Create an empty cache over a shared store.
    pub fn with_config(store: Arc<S>, config: CacheConfig) -> Self {
        Self {
            store,
            slot: Arc::new(Mutex::new(Slot::default())),
            counters: Arc::new(Counters::default()),
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get the current pricing configuration.
    ///
    /// Returns the held snapshot while it is younger than the TTL. Otherwise
    /// fetches every row, converts the values and installs a new snapshot.
    /// A failed fetch is returned as is; stale data is never handed out by a
    /// call that needed a refresh.
    pub async fn get_config(&self) -> Result<Arc<PricingSnapshot>> {
        match self.lookup() {
            Lookup::Hit(snapshot) => {
                trace!("Pricing cache hit");
                Ok(snapshot)
            }
            Lookup::Join(request) => {
                trace!("Waiting for in-flight pricing refresh");
                request.wait().await
            }
            Lookup::Lead(request, generation) => {
                trace!("Pricing cache miss, refreshing");
                let flight = Flight {
                    slot: &self.slot,
                    request,
                    generation,
                    finished: false,
                };
                let result = self.fetch_snapshot().await;
                flight.finish(result)
            }
        }
    }

    /// Drop the held snapshot so the next read fetches.
    ///
    /// A refresh already running is detached: its callers still get its result,
    /// but it will not be installed.
    pub fn invalidate(&self) {
        let mut slot = self.slot.lock();
        slot.generation = slot.generation.wrapping_add(1);
        let had_snapshot = slot.snapshot.take().is_some();
        let detached = slot.in_flight.take().is_some();
        drop(slot);

        debug!(had_snapshot, detached, "Pricing cache invalidated");
    }

    pub fn state(&self) -> CacheState {
        let slot = self.slot.lock();
        self.state_of(slot.snapshot.as_deref())
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let slot = self.slot.lock();
        CacheStats {
            fetch_count: self.counters.fetches.load(Ordering::Relaxed),
            hit_count: self.counters.hits.load(Ordering::Relaxed),
            state: self.state_of(slot.snapshot.as_deref()),
            snapshot_age: slot.snapshot.as_ref().map(|s| s.age()),
            in_flight: slot.in_flight.is_some(),
            ttl: self.config.ttl,
        }
    }

    fn state_of(&self, snapshot: Option<&PricingSnapshot>) -> CacheState {
        match snapshot {
            None => CacheState::Empty,
            Some(s) if s.is_expired(self.config.ttl) => CacheState::Stale,
            Some(_) => CacheState::Fresh,
        }
    }

    /// Decide under the lock whether to serve, wait or refresh.
    fn lookup(&self) -> Lookup {
        let mut slot = self.slot.lock();

        if let Some(snapshot) = &slot.snapshot {
            if !snapshot.is_expired(self.config.ttl) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Lookup::Hit(snapshot.clone());
            }
        }

        if let Some(request) = &slot.in_flight {
            return Lookup::Join(request.clone());
        }

        let request = Arc::new(InFlightState::new());
        slot.in_flight = Some(request.clone());
        Lookup::Lead(request, slot.generation)
    }

    async fn fetch_snapshot(&self) -> RefreshResult {
        self.counters.fetches.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let rows = self.store.fetch_rows().await.map_err(|e| {
            warn!("Pricing configuration fetch failed: {}", e);
            PricingError::fetch(e)
        })?;

        let snapshot = PricingSnapshot::from_rows(rows, self.config.parsing).inspect_err(|e| {
            warn!("Rejected pricing configuration: {}", e);
        })?;

        info!(
            keys = snapshot.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Refreshed pricing configuration"
        );
        Ok(Arc::new(snapshot))
    }
}

/// The leader's claim on a refresh.
///
/// Finishing publishes the result to waiters. Dropping an unfinished flight
/// (the leader's future was cancelled) wakes them with `RefreshAbandoned`.
struct Flight<'a> {
    slot: &'a Mutex<Slot>,
    request: InFlightRequest,
    generation: u64,
    finished: bool,
}

impl Flight<'_> {
    fn finish(mut self, result: RefreshResult) -> RefreshResult {
        self.finished = true;

        let mut slot = self.slot.lock();
        self.release(&mut slot);
        if let Ok(snapshot) = &result {
            if slot.generation == self.generation {
                slot.snapshot = Some(snapshot.clone());
            } else {
                debug!("Discarding pricing refresh that raced with an invalidation");
            }
        }
        drop(slot);

        self.request.set_result(result.clone());
        result
    }

    /// Clear the in-flight marker if it is still ours.
    fn release(&self, slot: &mut Slot) {
        let ours = slot
            .in_flight
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &self.request));
        if ours {
            slot.in_flight = None;
        }
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let mut slot = self.slot.lock();
        self.release(&mut slot);
        drop(slot);

        debug!("Pricing refresh abandoned");
        self.request.set_result(Err(PricingError::RefreshAbandoned));
    }
}
