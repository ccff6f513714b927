//! Rows and change notifications exchanged with the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the pricing configuration table.
///
/// Both columns are text in the store; callers decide how to interpret the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRow {
    #[serde(rename = "config_key")]
    pub key: String,
    #[serde(rename = "config_value")]
    pub value: String,
}

impl ConfigRow {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An `UPDATE` notification for the configuration table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub table: String,
    /// Key of the updated row, when the store includes the record.
    pub config_key: Option<String>,
    pub commit_timestamp: Option<DateTime<Utc>>,
}

impl ChangeEvent {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            config_key: None,
            commit_timestamp: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.config_key = Some(key.into());
        self
    }

    /// Get a description of the event for logging.
    pub fn description(&self) -> String {
        match &self.config_key {
            Some(key) => format!("{} updated ({})", self.table, key),
            None => format!("{} updated", self.table),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_decode_from_rest_payload() {
        let body = r#"[
            {"config_key": "diver_rate", "config_value": "85.50"},
            {"config_key": "travel_fee", "config_value": "25"}
        ]"#;

        let rows: Vec<ConfigRow> = serde_json::from_str(body).unwrap();
        assert_eq!(
            rows,
            vec![
                ConfigRow::new("diver_rate", "85.50"),
                ConfigRow::new("travel_fee", "25"),
            ]
        );
    }

    #[test]
    fn test_event_description() {
        assert_eq!(
            ChangeEvent::new("pricing_config").description(),
            "pricing_config updated"
        );
        assert_eq!(
            ChangeEvent::new("pricing_config")
                .with_key("diver_rate")
                .description(),
            "pricing_config updated (diver_rate)"
        );
    }
}
