use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

use super::incident::Category;

/// Spatial bucket plus trailing window length, within one institution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    pub institution: String,
    pub spatial: String,
    pub window_days: u32,
}

impl BucketKey {
    pub fn new(institution: &str, spatial: &str, window_days: u32) -> Self {
        Self {
            institution: institution.to_string(),
            spatial: spatial.to_string(),
            window_days,
        }
    }

    /// Stable cluster identity derived from the bucket
    pub fn cluster_id(&self) -> String {
        format!("{}/{}@{}d", self.institution, self.spatial, self.window_days)
    }
}

impl Display for BucketKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.cluster_id())
    }
}

/// Derived aggregation of incidents in one bucket.
///
/// Holds incident ids only; always rebuildable from the incident set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HotspotCluster {
    pub id: String,
    pub bucket: BucketKey,
    pub window_start: DateTime<Utc>,
    pub incident_ids: BTreeSet<Uuid>,
    pub score: f64,
    pub latest_occurrence: Option<DateTime<Utc>>,
    pub category_mix: BTreeMap<Category, u32>,
    pub last_recomputed: DateTime<Utc>,
}

impl HotspotCluster {
    pub fn incident_count(&self) -> usize {
        self.incident_ids.len()
    }

    pub fn dominant_category(&self) -> Option<Category> {
        self.category_mix
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(category, _)| *category)
    }
}
