//! Pricing configuration cache.
//!
//! [`PricingCache`] serves the `config_key -> f64` pricing mapping from a
//! snapshot that is at most one TTL old (30 seconds by default), refreshing it
//! from a [`ConfigStore`](config_store::ConfigStore) when needed. The snapshot
//! can be dropped explicitly with [`PricingCache::invalidate`] or on every
//! table update through [`PricingCache::subscribe_to_changes`].
//!
//! ```rust,no_run
//! use config_store::{StoreSettings, SupabaseStore};
//! use pricing_cache::PricingCache;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SupabaseStore::new(StoreSettings::from_env()?)?;
//! let cache = PricingCache::new(store);
//!
//! let pricing = cache.get_config().await?;
//! let rate = pricing.get("diver_rate");
//!
//! let subscription = cache.subscribe_to_changes(|| {}).await?;
//! subscription.unsubscribe();
//! # let _ = rate;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod error;
pub mod snapshot;
pub mod subscription;

pub use cache::{CacheConfig, CacheState, CacheStats, DEFAULT_TTL, PricingCache};
pub use error::{PricingError, Result};
pub use snapshot::{PricingSnapshot, ValueParsing};
pub use subscription::SubscriptionHandle;
