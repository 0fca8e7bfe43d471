use serde::{Deserialize, Serialize};

use crate::models::PackageRecord;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: Vec<PackageRecord>,
    /// Milliseconds since the unix epoch.
    pub timestamp: u64,
    #[serde(default)]
    pub query: String,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub total_record_count: usize,
}
