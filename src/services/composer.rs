// src/services/composer.rs

//! Post text composition.

use chrono::{DateTime, Datelike};
use chrono_tz::Tz;

use crate::models::{Category, Item, MessageConfig, Snapshot};
use crate::utils::duration::format_countdown;

const WEATHER: &str = "weather";

/// Turns a snapshot into post text.
pub trait Composer: Send + Sync {
    /// `now` is in the feed's time zone.
    fn compose(&self, title: &str, snapshot: &Snapshot, now: DateTime<Tz>) -> String;
}

/// Plain-text summary: sections, weather, countdown, daily tip, hashtags.
#[derive(Debug, Clone)]
pub struct SummaryComposer {
    config: MessageConfig,
}

impl SummaryComposer {
    pub fn new(config: MessageConfig) -> Self {
        Self { config }
    }

    /// Tip of the day, rotating by day of year.
    pub fn tip_for(&self, now: DateTime<Tz>) -> Option<&str> {
        if self.config.tips.is_empty() {
            return None;
        }
        let index = now.ordinal0() as usize % self.config.tips.len();
        Some(self.config.tips[index].as_str())
    }

    /// Categories to list, configured order first, then alphabetical.
    fn sections<'a>(&self, snapshot: &'a Snapshot) -> Vec<(&'a str, &'a Category)> {
        let rank = |name: &str| {
            self.config
                .category_order
                .iter()
                .position(|c| c.eq_ignore_ascii_case(name))
                .unwrap_or(usize::MAX)
        };
        let mut sections: Vec<(&str, &Category)> = snapshot
            .categories
            .iter()
            .filter(|(name, category)| name.as_str() != WEATHER && !category.items.is_empty())
            .map(|(name, category)| (name.as_str(), category))
            .collect();
        sections.sort_by(|(a, _), (b, _)| rank(a).cmp(&rank(b)).then_with(|| a.cmp(b)));
        sections
    }

    fn countdown_line(&self, snapshot: &Snapshot) -> Option<String> {
        let countdown = snapshot.min_countdown()?;
        Some(
            self.config
                .countdown_template
                .replace("{countdown}", &format_countdown(countdown)),
        )
    }
}

impl Composer for SummaryComposer {
    fn compose(&self, title: &str, snapshot: &Snapshot, now: DateTime<Tz>) -> String {
        let mut blocks: Vec<String> = vec![title.to_string()];

        for (name, category) in self.sections(snapshot) {
            let mut block = heading(name);
            for item in &category.items {
                block.push_str("\n- ");
                block.push_str(&item_line(item));
            }
            blocks.push(block);
        }

        let mut status = Vec::new();
        if let Some(weather) = snapshot.category(WEATHER).filter(|c| !c.items.is_empty()) {
            let names: Vec<&str> = weather.items.iter().map(|i| i.name.as_str()).collect();
            status.push(format!("Weather: {}", names.join(", ")));
        }
        if let Some(line) = self.countdown_line(snapshot) {
            status.push(line);
        }
        if !status.is_empty() {
            blocks.push(status.join("\n"));
        }

        if let Some(tip) = self.tip_for(now) {
            blocks.push(format!("Tip: {tip}"));
        }

        if !self.config.hashtags.is_empty() {
            let tags: Vec<String> = self
                .config
                .hashtags
                .iter()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .map(|t| {
                    if t.starts_with('#') {
                        t.to_string()
                    } else {
                        format!("#{t}")
                    }
                })
                .collect();
            blocks.push(tags.join(" "));
        }

        blocks.join("\n\n")
    }
}

fn heading(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn item_line(item: &Item) -> String {
    match &item.icon {
        Some(icon) => format!("{icon} {} x{}", item.name, item.quantity),
        None => format!("{} x{}", item.name, item.quantity),
    }
}
