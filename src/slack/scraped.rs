use crate::digest::model::{Message, Ts};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// One row as written by the browser scraper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapedRow {
    pub sender: Option<String>,
    pub timestamp: Option<String>,
    pub ts_value: Option<Value>,
    pub text: Option<String>,
    pub key: Option<String>,
    pub day_divider: Option<Value>,
}

fn truthy(value: &Option<Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(_) => true,
    }
}

fn row_ts(row: &ScrapedRow) -> Option<Ts> {
    match row.ts_value.as_ref()? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n
            .as_f64()
            .map(|secs| Ts::from_micros((secs * 1_000_000.0).round() as i64)),
        _ => None,
    }
}

/// Normalize scraper rows: day dividers and empty rows are dropped, rows
/// without a usable ts are skipped, and the result is ts-unique and sorted.
pub fn convert_scraped(rows: Vec<ScrapedRow>) -> Vec<Message> {
    let mut by_ts: BTreeMap<Ts, Message> = BTreeMap::new();
    for row in rows {
        let text = row.text.as_deref().map(str::trim).unwrap_or_default();
        if text.is_empty() {
            continue;
        }
        if truthy(&row.day_divider) && row.sender.is_none() {
            continue;
        }
        let Some(ts) = row_ts(&row) else {
            debug!(key = row.key.as_deref().unwrap_or("na"), "scraped row without ts");
            continue;
        };
        let author = row
            .sender
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("unknown");
        by_ts
            .entry(ts)
            .or_insert_with(|| Message::new(ts, author, text));
    }
    by_ts.into_values().collect()
}

/// Rows of a scraped export file, unconverted.
pub fn read_export(path: &Path) -> Result<Vec<ScrapedRow>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse scraped export {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::{ScrapedRow, convert_scraped, read_export};
    use crate::digest::model::Ts;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    fn rows(value: serde_json::Value) -> Vec<ScrapedRow> {
        serde_json::from_value(value).expect("rows")
    }

    #[test]
    fn dividers_and_empty_rows_are_skipped() {
        let got = convert_scraped(rows(json!([
            {"day_divider": "Monday, March 4th", "text": ""},
            {"day_divider": true},
            {"sender": "ana", "ts_value": "1700000060.000000", "text": "later"},
            {"sender": "bo", "ts_value": "1700000000.000100", "text": "first", "timestamp": "9:00 AM"},
            {"sender": "cy", "ts_value": "1700000030.000000", "text": "   "},
            {"sender": "dee", "text": "no ts"}
        ])));
        let texts: Vec<&str> = got.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "later"]);
        assert_eq!(got[0].author, "bo");
        assert_eq!(got[0].ts, Ts::from_micros(1_700_000_000_000_100));
    }

    #[test]
    fn numeric_ts_and_missing_sender_are_tolerated() {
        let got = convert_scraped(rows(json!([
            {"ts_value": 1700000000.5, "text": "anon"}
        ])));
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].author, "unknown");
        assert_eq!(got[0].ts, Ts::from_micros(1_700_000_000_500_000));
    }

    #[test]
    fn export_file_loads() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("C1.json");
        fs::write(
            &path,
            r#"[{"sender":"ana","ts_value":"1700000000.000000","text":"hi","key":"k1","day_divider":null}]"#,
        )
        .expect("write");
        let got = read_export(&path).expect("load");
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].key.as_deref(), Some("k1"));
        assert_eq!(convert_scraped(got).len(), 1);
        assert!(read_export(&tmp.path().join("missing.json")).is_err());
    }
}
