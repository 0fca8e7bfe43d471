use serde::{Deserialize, Serialize};

use crate::models::PackageSource;

/// Normalized, source-agnostic package representation. `size` is always in
/// bytes; `installed` is a point-in-time observation and may be stale once
/// the record has been cached.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub id: String,
    pub name: String,
    pub summary: String,
    pub description: String,
    pub icon: String,
    pub version: String,
    pub size: u64,
    #[serde(default)]
    pub category: Option<String>,
    pub developer: String,
    pub license: String,
    pub homepage: String,
    #[serde(default)]
    pub screenshots: Vec<String>,
    pub source: PackageSource,
    #[serde(default)]
    pub installed: bool,
    #[serde(default)]
    pub rating: f64,
}

impl PackageRecord {
    pub fn record_id(source: PackageSource, name: &str) -> String {
        format!("{}:{name}", source.id_prefix())
    }

    /// Whether the record belongs in category-grouped views.
    pub fn is_browsable(&self) -> bool {
        self.category.is_some()
    }
}
