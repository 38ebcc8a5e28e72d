//! Aggregate score of a hotspot bucket.
//!
//! Each incident contributes `(1 + severity/100) * category_weight * decay(age)`.
//! The sum is monotonic in incident count and severity, and `decay` never
//! increases with age, so a fixed incident set never gains score over time.

use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::{DecayModel, HotspotConfig};
use crate::models::{BucketKey, Category, HotspotCluster, Incident, IncidentStatus, Severity};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Weight in `[0, 1]` of an incident that is `age_days` old
pub fn decay(model: &DecayModel, age_days: f64) -> f64 {
    let age = age_days.max(0.0);
    match *model {
        DecayModel::Exponential { half_life_days } => 0.5_f64.powf(age / half_life_days),
        DecayModel::Linear { zero_after_days } => (1.0 - age / zero_after_days).max(0.0),
    }
}

pub fn contribution(severity: Severity, category_weight: f64, decay: f64) -> f64 {
    (1.0 + f64::from(severity.value()) / 100.0) * category_weight * decay
}

/// Whether an incident counts towards hotspots at all
pub fn counts(incident: &Incident) -> bool {
    !incident.archived && incident.status != IncidentStatus::Rejected
}

fn age_days(at: DateTime<Utc>, occurred_at: DateTime<Utc>) -> f64 {
    (at - occurred_at).num_seconds() as f64 / SECONDS_PER_DAY
}

/// Build the cluster of `bucket` as of `at` from the incidents at its spatial key.
///
/// Returns `None` when no incident falls into the window.
pub fn build_cluster(
    bucket: &BucketKey,
    incidents: &[Incident],
    config: &HotspotConfig,
    at: DateTime<Utc>,
) -> Option<HotspotCluster> {
    let window_start = at - Duration::days(i64::from(bucket.window_days));
    let mut incident_ids = BTreeSet::new();
    let mut category_mix: BTreeMap<Category, u32> = BTreeMap::new();
    let mut latest_occurrence: Option<DateTime<Utc>> = None;
    let mut score = 0.0;

    for incident in incidents.iter().filter(|i| {
        counts(i)
            && i.institution == bucket.institution
            && i.location.key == bucket.spatial
            && i.occurred_at >= window_start
    }) {
        let category = incident.effective_category().unwrap_or(Category::Other);
        score += contribution(
            incident.effective_severity(),
            config.category_weight(category),
            decay(&config.decay, age_days(at, incident.occurred_at)),
        );
        incident_ids.insert(incident.id);
        *category_mix.entry(category).or_default() += 1;
        latest_occurrence = latest_occurrence.max(Some(incident.occurred_at));
    }

    if incident_ids.is_empty() {
        return None;
    }

    Some(HotspotCluster {
        id: bucket.cluster_id(),
        bucket: bucket.clone(),
        window_start,
        incident_ids,
        score,
        latest_occurrence,
        category_mix,
        last_recomputed: at,
    })
}

/// "Top hotspot" order: score, then most recent incident, then cluster id
pub fn compare(a: &HotspotCluster, b: &HotspotCluster) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.latest_occurrence.cmp(&a.latest_occurrence))
        .then_with(|| a.id.cmp(&b.id))
}

pub fn rank(mut clusters: Vec<HotspotCluster>) -> Vec<HotspotCluster> {
    clusters.sort_by(compare);
    clusters
}
