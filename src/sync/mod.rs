//! Sync cascade
//!
//! ```text
//! App (every refresh tick, 8s)
//!  └─▶ Dashboard (one wave, 3s)
//!       ├─▶ Gauge       (fetch 2s)
//!       ├─▶ Singlestat  (fetch 2s)
//!       └─▶ Graph       (fetch 2s)
//! ```
//!
//! Each level bounds the one below it with a shorter deadline and contains
//! faults at its task boundary. Failures are logged where they are caught
//! and never abort the level above.

mod app;
mod dashboard;
mod guard;
mod widget;

pub use app::{App, AppConfig};
pub use dashboard::{Dashboard, DashboardConfig};
pub use guard::{SyncGuard, SyncPermit};
pub use widget::{threshold_color, Gauge, Graph, Singlestat, WidgetConfig};

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// Key/value data available to query expressions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateData(BTreeMap<String, String>);

impl TemplateData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// A copy of `self` extended with `other`; `other` wins on conflicts.
    pub fn with_data(&self, other: &TemplateData) -> TemplateData {
        let mut merged = self.0.clone();
        merged.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        TemplateData(merged)
    }

    /// Replace every `{{.key}}` placeholder with its value.
    pub fn render(&self, text: &str) -> String {
        if !text.contains("{{") {
            return text.to_string();
        }
        self.0.iter().fold(text.to_string(), |acc, (k, v)| {
            acc.replace(&format!("{{{{.{}}}}}", k), v)
        })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, String>> for TemplateData {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

/// One refresh, created per tick by the app and enriched on the way down.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRequest {
    pub time_range_start: DateTime<Utc>,
    pub time_range_end: DateTime<Utc>,
    pub template_data: TemplateData,
}

/// A level of the sync cascade.
#[async_trait]
pub trait Syncer: Send + Sync {
    async fn sync(&self, request: &SyncRequest) -> Result<()>;
}
