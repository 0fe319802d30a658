//! Canonical snapshot encoding.
//!
//! Two snapshots with the same meaningful content encode to the same bytes:
//! - volatile fields (timestamps, request ids) are dropped
//! - countdowns are dropped, they tick on every poll
//! - category names are trimmed and lowercased, empty categories are dropped
//! - items are trimmed and sorted by (name, quantity, icon)

use serde_json::{Map, Value, json};

use crate::models::{Fingerprint, Item, Snapshot, canonical_category_name};

/// Encode `snapshot` as compact canonical JSON.
pub fn normalize(snapshot: &Snapshot) -> Vec<u8> {
    canonical_value(snapshot).to_string().into_bytes()
}

/// `sha256(normalize(snapshot))`.
pub fn fingerprint(snapshot: &Snapshot) -> Fingerprint {
    Fingerprint::digest(&normalize(snapshot))
}

fn canonical_value(snapshot: &Snapshot) -> Value {
    let mut categories = Map::new();
    for (name, category) in &snapshot.categories {
        let mut items: Vec<Item> = category
            .items
            .iter()
            .map(|item| Item {
                name: item.name.trim().to_string(),
                quantity: item.quantity,
                icon: item.icon.as_deref().map(str::trim).map(str::to_string),
            })
            .filter(|item| !item.name.is_empty())
            .collect();
        if items.is_empty() {
            continue;
        }
        items.sort_by(|a, b| {
            (&a.name, a.quantity, &a.icon).cmp(&(&b.name, b.quantity, &b.icon))
        });

        let encoded: Vec<Value> = items
            .into_iter()
            .map(|item| json!([item.name, item.quantity, item.icon]))
            .collect();
        categories.insert(canonical_category_name(name), Value::Array(encoded));
    }
    Value::Object(categories)
}
