// src/models/snapshot.rs

//! Snapshot of upstream shop/weather state.
//!
//! Payloads look roughly like this, but every field is optional:
//!
//! ```text
//! {
//!   "updated_at": "2026-10-18T12:00:03Z",
//!   "data": {
//!     "gear": { "items": [{ "name": "Trowel", "quantity": 2, "emoji": "🛠" }], "countdown": 252 },
//!     "seed": [{ "name": "Carrot", "value": 14 }],
//!     "weather": { "current": "Rain", "countdown": "1m 30s" }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::time::Duration;

use regex::Regex;
use serde_json::{Map, Value};

use crate::utils::duration::parse_countdown;

/// Keys that change on every poll without meaning anything.
///
/// They are read into the volatile fields of [`Snapshot`] and [`Category`]
/// (or dropped) and never take part in fingerprinting.
pub const VOLATILE_KEYS: &[&str] = &[
    "updated_at",
    "updatedAt",
    "timestamp",
    "lastUpdated",
    "last_updated",
    "request_id",
    "requestId",
];

const TIMESTAMP_KEYS: &[&str] = &["updated_at", "updatedAt", "timestamp", "lastUpdated", "last_updated"];
const REQUEST_ID_KEYS: &[&str] = &["request_id", "requestId"];
const ITEM_LIST_KEYS: &[&str] = &["items", "stock"];
const COUNTDOWN_KEYS: &[&str] = &["countdown", "countdown_secs", "next_update_in", "timeLeft"];
const NAME_KEYS: &[&str] = &["name", "display_name", "item"];
const QUANTITY_KEYS: &[&str] = &["quantity", "value", "stock", "count"];
const ICON_KEYS: &[&str] = &["icon", "emoji"];
/// `Name x5`, `Name ×5`, `Name x 5`. The marker must follow whitespace.
const LABEL_QUANTITY: &str = r"^(.*\S)\s+[xX×]\s*(\d+)$";
const CURRENT_KEYS: &[&str] = &["current", "type", "name"];

/// Is `key` one of the volatile fields excluded from identity?
pub fn is_volatile(key: &str) -> bool {
    VOLATILE_KEYS.contains(&key)
}

/// A single shop entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Item {
    pub name: String,
    pub quantity: u64,
    pub icon: Option<String>,
}

impl Item {
    pub fn new(name: impl Into<String>, quantity: u64) -> Self {
        Self {
            name: name.into(),
            quantity,
            icon: None,
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Self::from_label(s),
            Value::Object(map) => {
                let name = first_str(map, NAME_KEYS)?.trim().to_string();
                if name.is_empty() {
                    return None;
                }
                let quantity = first_u64(map, QUANTITY_KEYS).unwrap_or(0);
                let icon = first_str(map, ICON_KEYS)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                Some(Self {
                    name,
                    quantity,
                    icon,
                })
            }
            _ => None,
        }
    }

    /// `"Carrot x5"` → Carrot, 5. A bare label counts as one.
    fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        if label.is_empty() {
            return None;
        }
        let quantity_suffix = Regex::new(LABEL_QUANTITY).ok();
        if let Some(caps) = quantity_suffix.as_ref().and_then(|re| re.captures(label)) {
            if let Ok(quantity) = caps[2].parse::<u64>() {
                return Some(Self::new(&caps[1], quantity));
            }
        }
        Some(Self::new(label, 1))
    }
}

/// State of one category (gear, seed, egg, weather, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Category {
    /// Items in the order upstream sent them
    pub items: Vec<Item>,

    /// Time until upstream expects this category to change
    pub countdown: Option<Duration>,

    /// Volatile: server-side update time
    pub updated_at: Option<String>,
}

impl Category {
    pub fn with_items(items: Vec<Item>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }

    pub fn countdown(mut self, countdown: Duration) -> Self {
        self.countdown = Some(countdown);
        self
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Array(entries) => Some(Self::with_items(
                entries.iter().filter_map(Item::from_value).collect(),
            )),
            Value::Object(map) => {
                let countdown = COUNTDOWN_KEYS
                    .iter()
                    .filter_map(|k| map.get(*k))
                    .find_map(parse_countdown);
                let updated_at = first_str(map, TIMESTAMP_KEYS).map(str::to_string);

                let items = match ITEM_LIST_KEYS.iter().find_map(|k| map.get(*k)?.as_array()) {
                    Some(entries) => entries.iter().filter_map(Item::from_value).collect(),
                    // Single-state categories such as {"current": "Rain"}
                    None => match first_str(map, CURRENT_KEYS) {
                        Some(current) if !current.trim().is_empty() => {
                            vec![Item::new(current.trim(), 1)]
                        }
                        _ if countdown.is_some() => Vec::new(),
                        _ => return None,
                    },
                };

                Some(Self {
                    items,
                    countdown,
                    updated_at,
                })
            }
            _ => None,
        }
    }
}

/// One fetched view of upstream state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Category name (lowercased) to category state
    pub categories: BTreeMap<String, Category>,

    /// Volatile: server-side update time
    pub updated_at: Option<String>,

    /// Volatile: server-generated request identifier
    pub request_id: Option<String>,
}

impl Snapshot {
    /// Parse a JSON document, reading the `data` envelope when present.
    pub fn from_json(text: &str) -> std::result::Result<Self, String> {
        let document: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
        Self::from_value(&document)
    }

    /// Build a snapshot from an already-parsed JSON document.
    pub fn from_value(document: &Value) -> std::result::Result<Self, String> {
        let root = document
            .as_object()
            .ok_or_else(|| "payload is not a JSON object".to_string())?;
        let envelope = match root.get("data") {
            Some(Value::Object(data)) => data,
            Some(_) => return Err("`data` envelope is not a JSON object".to_string()),
            None => root,
        };

        let mut snapshot = Snapshot {
            updated_at: first_str(root, TIMESTAMP_KEYS)
                .or_else(|| first_str(envelope, TIMESTAMP_KEYS))
                .map(str::to_string),
            request_id: first_str(root, REQUEST_ID_KEYS)
                .or_else(|| first_str(envelope, REQUEST_ID_KEYS))
                .map(str::to_string),
            ..Snapshot::default()
        };

        for (key, value) in envelope {
            if is_volatile(key) {
                continue;
            }
            if let Some(category) = Category::from_value(value) {
                snapshot.insert(key, category);
            }
        }

        Ok(snapshot)
    }

    /// Insert a category under its canonical (trimmed, lowercased) name.
    ///
    /// Keys that only differ in case or spacing land in one category: the
    /// item lists are concatenated and the smaller countdown is kept.
    pub fn insert(&mut self, name: &str, category: Category) {
        match self.categories.entry(canonical_category_name(name)) {
            Entry::Vacant(slot) => {
                slot.insert(category);
            }
            Entry::Occupied(mut slot) => {
                log::debug!("Category '{name}' collides with '{}', merging items", slot.key());
                let existing = slot.get_mut();
                existing.items.extend(category.items);
                existing.countdown = match (existing.countdown, category.countdown) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
                if existing.updated_at.is_none() {
                    existing.updated_at = category.updated_at;
                }
            }
        }
    }

    /// Builder-style [`Snapshot::insert`].
    pub fn with_category(mut self, name: &str, category: Category) -> Self {
        self.insert(name, category);
        self
    }

    pub fn category(&self, name: &str) -> Option<&Category> {
        self.categories.get(&canonical_category_name(name))
    }

    /// Add categories from another source. Existing categories win.
    pub fn merge(&mut self, other: Snapshot) {
        for (name, category) in other.categories {
            self.categories.entry(name).or_insert(category);
        }
    }

    /// Smallest countdown reported by any category.
    pub fn min_countdown(&self) -> Option<Duration> {
        self.categories.values().filter_map(|c| c.countdown).min()
    }

    pub fn item_count(&self) -> usize {
        self.categories.values().map(|c| c.items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }
}

pub fn canonical_category_name(name: &str) -> String {
    name.trim().to_lowercase()
}

fn first_str<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| map.get(*k)?.as_str())
}

fn first_u64(map: &Map<String, Value>, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|k| match map.get(*k)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}
