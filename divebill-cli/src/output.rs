use anyhow::{Result, bail};
#[cfg(all(feature = "colored-output", not(feature = "table-output")))]
use colored::*;
use pricing_cache::PricingSnapshot;
use serde_json::{Map, Value, json};
#[cfg(feature = "table-output")]
use tabled::{Table, Tabled, settings::Style};

use crate::cli::OutputFormat;

const EMPTY_MESSAGE: &str = "(no pricing configuration)";

/// Render the snapshot, or a single key of it.
pub fn render(
    snapshot: &PricingSnapshot,
    format: OutputFormat,
    key: Option<&str>,
) -> Result<String> {
    let entries: Vec<(&str, f64)> = match key {
        Some(key) => match snapshot.get(key) {
            Some(value) => vec![(key, value)],
            None => bail!("no pricing key named {key:?}"),
        },
        None => snapshot.sorted(),
    };

    match format {
        OutputFormat::Pretty => Ok(render_table(&entries)),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&to_json(&entries))?),
        OutputFormat::JsonCompact => Ok(serde_json::to_string(&to_json(&entries))?),
    }
}

pub fn print(snapshot: &PricingSnapshot, format: OutputFormat, key: Option<&str>) -> Result<()> {
    println!("{}", render(snapshot, format, key)?);
    Ok(())
}

/// JSON error object for machine-readable output.
pub fn error_json(message: &str) -> String {
    json!({ "status": "error", "message": message }).to_string()
}

fn to_json(entries: &[(&str, f64)]) -> Value {
    // NaN and infinities have no JSON form and become null.
    let map: Map<String, Value> = entries
        .iter()
        .map(|(key, value)| (key.to_string(), json!(value)))
        .collect();
    Value::Object(map)
}

fn render_table(entries: &[(&str, f64)]) -> String {
    if entries.is_empty() {
        return EMPTY_MESSAGE.to_string();
    }
    format_table(entries)
}

#[cfg(feature = "table-output")]
fn format_table(entries: &[(&str, f64)]) -> String {
    #[derive(Tabled)]
    struct PricingRow<'a> {
        #[tabled(rename = "Key")]
        key: &'a str,
        #[tabled(rename = "Value")]
        value: f64,
    }

    let rows = entries.iter().map(|&(key, value)| PricingRow { key, value });
    Table::new(rows).with(Style::modern()).to_string()
}

// Plain `key: value` lines when the table feature is disabled.
#[cfg(not(feature = "table-output"))]
fn format_table(entries: &[(&str, f64)]) -> String {
    entries
        .iter()
        .map(|(key, value)| format!("{}: {}", paint_key(key), value))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(all(not(feature = "table-output"), feature = "colored-output"))]
fn paint_key(key: &str) -> String {
    key.bold().to_string()
}

#[cfg(all(not(feature = "table-output"), not(feature = "colored-output")))]
fn paint_key(key: &str) -> String {
    key.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_store::ConfigRow;
    use pricing_cache::ValueParsing;
    use rstest::rstest;

    fn snapshot(pairs: &[(&str, &str)]) -> PricingSnapshot {
        let rows = pairs.iter().map(|(k, v)| ConfigRow::new(*k, *v)).collect();
        PricingSnapshot::from_rows(rows, ValueParsing::Lenient).unwrap()
    }

    #[test]
    fn test_compact_json_is_sorted() {
        let snapshot = snapshot(&[("travel_fee", "25"), ("diver_rate", "85.50")]);
        assert_eq!(
            render(&snapshot, OutputFormat::JsonCompact, None).unwrap(),
            r#"{"diver_rate":85.5,"travel_fee":25.0}"#
        );
    }

    #[test]
    fn test_nan_renders_as_null() {
        let snapshot = snapshot(&[("travel_fee", "abc")]);
        assert_eq!(
            render(&snapshot, OutputFormat::JsonCompact, None).unwrap(),
            r#"{"travel_fee":null}"#
        );
    }

    #[rstest]
    #[case(OutputFormat::Pretty)]
    #[case(OutputFormat::Json)]
    #[case(OutputFormat::JsonCompact)]
    fn test_single_key(#[case] format: OutputFormat) {
        let snapshot = snapshot(&[("travel_fee", "25"), ("diver_rate", "85.50")]);
        let rendered = render(&snapshot, format, Some("diver_rate")).unwrap();

        assert!(rendered.contains("diver_rate"));
        assert!(rendered.contains("85.5"));
        assert!(!rendered.contains("travel_fee"));
    }

    #[test]
    fn test_unknown_key_is_error() {
        let snapshot = snapshot(&[("diver_rate", "85.50")]);
        let err = render(&snapshot, OutputFormat::Pretty, Some("tip")).unwrap_err();
        assert_eq!(err.to_string(), "no pricing key named \"tip\"");
    }

    #[cfg(feature = "table-output")]
    #[test]
    fn test_pretty_renders_table() {
        let snapshot = snapshot(&[("travel_fee", "25"), ("diver_rate", "85.50")]);
        let rendered = render(&snapshot, OutputFormat::Pretty, None).unwrap();

        let lines: Vec<&str> = rendered.lines().collect();
        assert!(lines[0].starts_with('┌'));
        assert!(lines[1].contains("Key") && lines[1].contains("Value"));

        let diver = rendered.find("diver_rate").unwrap();
        let travel = rendered.find("travel_fee").unwrap();
        assert!(diver < travel);
        assert!(rendered.contains("85.5"));
        assert!(rendered.contains("25"));
    }

    #[test]
    fn test_empty_table() {
        let snapshot = snapshot(&[]);
        assert_eq!(
            render(&snapshot, OutputFormat::Pretty, None).unwrap(),
            "(no pricing configuration)"
        );
    }

    #[test]
    fn test_error_json() {
        let value: Value = serde_json::from_str(&error_json("boom")).unwrap();
        assert_eq!(value, json!({ "status": "error", "message": "boom" }));
    }
}
