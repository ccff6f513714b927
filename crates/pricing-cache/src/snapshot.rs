//! Immutable pricing snapshots.

use std::collections::HashMap;
use std::time::Duration;

use config_store::ConfigRow;
use tokio::time::Instant;
use tracing::warn;

use crate::error::{PricingError, Result};

/// How to treat values that are not decimal numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValueParsing {
    /// Reject the whole refresh, naming the offending key.
    #[default]
    Strict,
    /// Store `NaN` for the key and log a warning.
    Lenient,
}

impl ValueParsing {
    /// Parse one stored value.
    ///
    /// Surrounding whitespace is ignored. Strict mode also rejects `NaN` and
    /// infinities, which `f64::from_str` would otherwise accept.
    pub fn parse(self, key: &str, raw: &str) -> Result<f64> {
        let parsed = raw.trim().parse::<f64>().ok().filter(|v| v.is_finite());

        match (parsed, self) {
            (Some(value), _) => Ok(value),
            (None, ValueParsing::Strict) => Err(PricingError::parse(key, raw)),
            (None, ValueParsing::Lenient) => {
                warn!(key, value = raw, "Pricing value is not a number, using NaN");
                Ok(f64::NAN)
            }
        }
    }
}

/// The full pricing mapping as of one successful fetch.
///
/// Never modified after construction; a refresh replaces the whole snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingSnapshot {
    values: HashMap<String, f64>,
    fetched_at: Instant,
}

impl PricingSnapshot {
    /// Build a snapshot from fetched rows, stamped with the current instant.
    ///
    /// Either every row converts or no snapshot is produced.
    pub fn from_rows(rows: Vec<ConfigRow>, parsing: ValueParsing) -> Result<Self> {
        let values = rows
            .into_iter()
            .map(|row| {
                let value = parsing.parse(&row.key, &row.value)?;
                Ok((row.key, value))
            })
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Self {
            values,
            fetched_at: Instant::now(),
        })
    }

    pub fn values(&self) -> &HashMap<String, f64> {
        &self.values
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// Owned copy of the mapping.
    pub fn to_map(&self) -> HashMap<String, f64> {
        self.values.clone()
    }

    /// Entries ordered by key.
    pub fn sorted(&self) -> Vec<(&str, f64)> {
        let mut entries: Vec<_> = self
            .values
            .iter()
            .map(|(key, value)| (key.as_str(), *value))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    /// Whether the snapshot is at least `ttl` old.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.age() >= ttl
    }
}
