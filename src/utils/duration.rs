// src/utils/duration.rs

//! Countdown parsing and formatting.
//!
//! Upstream feeds report "time until restock" as plain seconds, as an
//! `{hours, minutes, seconds}` object, or as a preformatted string.

use std::time::Duration;

use regex::Regex;
use serde_json::Value;

const UNIT_PART: &str =
    r"(?i)(\d+)\s*(h|hr|hrs|hours?|m|min|mins|minutes?|s|sec|secs|seconds?)\b";

/// Longest countdown accepted from upstream (about 136 years).
const MAX_COUNTDOWN_SECS: u64 = u32::MAX as u64;

/// Parse a countdown from a JSON value.
///
/// Negative numbers clamp to zero. Unrecognised shapes yield `None`.
pub fn parse_countdown(value: &Value) -> Option<Duration> {
    match value {
        Value::Number(n) => {
            let secs = n.as_f64()?;
            if !secs.is_finite() {
                return None;
            }
            Some(Duration::from_secs_f64(secs.clamp(0.0, MAX_COUNTDOWN_SECS as f64)))
        }
        Value::String(s) => parse_countdown_str(s),
        Value::Object(map) => {
            let field = |keys: &[&str]| -> Option<u64> {
                keys.iter()
                    .filter_map(|k| map.get(*k))
                    .find_map(|v| v.as_u64().or_else(|| v.as_str()?.trim().parse().ok()))
            };
            let hours = field(&["hours", "h"]);
            let minutes = field(&["minutes", "m"]);
            let seconds = field(&["seconds", "s"]);
            if hours.is_none() && minutes.is_none() && seconds.is_none() {
                // e.g. {"formatted": "04m 12s"}
                return map
                    .get("formatted")
                    .or_else(|| map.get("text"))
                    .and_then(Value::as_str)
                    .and_then(parse_countdown_str);
            }
            Some(hms(hours.unwrap_or(0), minutes.unwrap_or(0), seconds.unwrap_or(0)))
        }
        _ => None,
    }
}

/// Parse `"300"`, `"04:12"`, `"1:04:12"` or `"1h 04m 12s"`.
pub fn parse_countdown_str(raw: &str) -> Option<Duration> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(secs) = s.parse::<u64>() {
        return Some(Duration::from_secs(secs.min(MAX_COUNTDOWN_SECS)));
    }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        // Too long for u64
        return Some(Duration::from_secs(MAX_COUNTDOWN_SECS));
    }

    if s.contains(':') {
        let parts: Option<Vec<u64>> = s.split(':').map(|p| p.trim().parse().ok()).collect();
        return match parts?.as_slice() {
            [m, sec] => Some(hms(0, *m, *sec)),
            [h, m, sec] => Some(hms(*h, *m, *sec)),
            _ => None,
        };
    }

    let pattern = Regex::new(UNIT_PART).ok()?;
    let (mut h, mut m, mut sec) = (0u64, 0u64, 0u64);
    let mut matched = false;
    for caps in pattern.captures_iter(s) {
        let amount: u64 = caps[1].parse().ok()?;
        match caps[2].to_ascii_lowercase().chars().next() {
            Some('h') => h = h.saturating_add(amount),
            Some('m') => m = m.saturating_add(amount),
            _ => sec = sec.saturating_add(amount),
        }
        matched = true;
    }
    matched.then(|| hms(h, m, sec))
}

fn hms(hours: u64, minutes: u64, seconds: u64) -> Duration {
    let total = hours
        .saturating_mul(3600)
        .saturating_add(minutes.saturating_mul(60))
        .saturating_add(seconds);
    Duration::from_secs(total.min(MAX_COUNTDOWN_SECS))
}

/// Format a countdown as `1h 04m 12s`, `4m 12s` or `12s`.
pub fn format_countdown(duration: Duration) -> String {
    let total = duration.as_secs();
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}h {m:02}m {s:02}s")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}
