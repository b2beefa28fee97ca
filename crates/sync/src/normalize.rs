//! Better CSL JSON → [`ItemRecord`].
//!
//! Items are read from untyped [`serde_json::Value`]s so that one oddly-typed
//! field degrades to "absent" instead of rejecting the item.  Only a malformed
//! top-level document fails, and it fails the whole export.

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{SyncError, SyncOutcome};
use crate::schema::ItemRecord;

pub const DEFAULT_TITLE: &str = "Untitled";
pub const DEFAULT_ITEM_TYPE: &str = "document";
pub const ZOTERO_SELECT_PREFIX: &str = "zotero://select/library/items/";

static ITEM_URL_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)/items/([a-z0-9]+)$").expect("item key pattern is valid")
});

/// Parse a full export into citation key → record.  Items without a citation
/// key or identifier are skipped; on duplicate keys the later item wins.
pub fn parse_export(raw: &str) -> SyncOutcome<IndexMap<String, ItemRecord>> {
    let items = parse_items(raw)?;
    let mut records = IndexMap::with_capacity(items.len());
    let mut skipped = 0usize;

    for item in &items {
        match item_to_record(item) {
            Some(record) => {
                records.insert(record.citation_key.clone(), record);
            }
            None => skipped += 1,
        }
    }

    debug!(items = items.len(), records = records.len(), skipped, "export parsed");
    Ok(records)
}

/// Parse the raw document and require a top-level array.
pub fn parse_items(raw: &str) -> SyncOutcome<Vec<Value>> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Array(items) => Ok(items),
        _ => Err(SyncError::parse("Better CSL JSON export must be a JSON array")),
    }
}

/// Convert one CSL item.  Returns `None` when the item is unusable.
pub fn item_to_record(item: &Value) -> Option<ItemRecord> {
    let obj = item.as_object()?;

    let citation_key = string_field(obj, "citation-key").filter(|key| !key.is_empty())?;
    let Some(id) = identifier(obj) else {
        debug!(citation_key, "skipping item without an id");
        return None;
    };

    let authors = obj
        .get("author")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_object)
                .map(format_name)
                .filter(|name| !name.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let year = obj
        .get("issued")
        .and_then(Value::as_object)
        .and_then(|issued| issued.get("date-parts"))
        .and_then(extract_year);

    Some(ItemRecord {
        citation_key: citation_key.to_string(),
        title: string_field(obj, "title").unwrap_or(DEFAULT_TITLE).to_string(),
        authors,
        year,
        item_type: string_field(obj, "type").unwrap_or(DEFAULT_ITEM_TYPE).to_string(),
        container: string_field(obj, "container-title").unwrap_or_default().to_string(),
        tags: split_keywords(string_field(obj, "keyword")),
        external_uri: format!("{ZOTERO_SELECT_PREFIX}{}", extract_item_key(&id)),
    })
}

/// Display form of a CSL name: `literal` when present, otherwise
/// given / non-dropping particle / family / suffix joined by spaces.
pub fn format_name(name: &Map<String, Value>) -> String {
    if let Some(literal) = string_field(name, "literal").filter(|s| !s.is_empty()) {
        return literal.to_string();
    }

    ["given", "non-dropping-particle", "family", "suffix"]
        .iter()
        .filter_map(|field| string_field(name, field))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

/// Year from CSL `date-parts` (`[[year, month, day]]`).  The year may be a
/// number or a numeric string.
pub fn extract_year(date_parts: &Value) -> Option<i32> {
    let first = date_parts.as_array()?.first()?.as_array()?.first()?;
    match first {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .and_then(|y| i32::try_from(y).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Zotero writes keywords separated by `;`, sometimes `,`.
pub fn split_keywords(keyword: Option<&str>) -> Vec<String> {
    let Some(keyword) = keyword else {
        return Vec::new();
    };
    keyword
        .split([';', ','])
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Zotero item key from a BBT `id`, which may be a bare key (`ABC123`), a
/// library/key pair (`12047273/KC6WFG78`), or an item URL ending in
/// `/items/<key>`.
pub fn extract_item_key(id: &str) -> String {
    if let Some(key) = ITEM_URL_KEY.captures(id).and_then(|caps| caps.get(1)) {
        return key.as_str().to_string();
    }

    if id.contains('/') {
        if let Some(last) = id.rsplit('/').next().filter(|seg| !seg.is_empty()) {
            return last.to_string();
        }
    }

    id.to_string()
}

fn string_field<'a>(obj: &'a Map<String, Value>, field: &str) -> Option<&'a str> {
    obj.get(field).and_then(Value::as_str)
}

fn identifier(obj: &Map<String, Value>) -> Option<String> {
    match obj.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
