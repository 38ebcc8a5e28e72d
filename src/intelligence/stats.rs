use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{Category, Incident, IncidentStatus, SeverityBand};

/// Aggregate figures over a set of incidents
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IncidentStatistics {
    pub total: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub by_band: BTreeMap<String, usize>,
    pub avg_hours_to_triage: Option<f64>,
    pub avg_hours_to_resolve: Option<f64>,
    /// Share of resolved incidents closed as false positives
    pub false_positive_rate: Option<f64>,
    pub busiest_location: Option<String>,
    pub generated_at: DateTime<Utc>,
}

fn hours(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_seconds().max(0) as f64 / 3600.0
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

pub fn compute(incidents: &[Incident], at: DateTime<Utc>) -> IncidentStatistics {
    let mut stats = IncidentStatistics {
        total: incidents.len(),
        generated_at: at,
        ..Default::default()
    };
    let mut triage = Vec::new();
    let mut resolve = Vec::new();
    let mut resolved = 0usize;
    let mut false_positives = 0usize;
    let mut locations: BTreeMap<&str, usize> = BTreeMap::new();

    for incident in incidents {
        let category = incident.effective_category().unwrap_or(Category::Other);
        *stats.by_category.entry(category.to_string()).or_default() += 1;
        *stats.by_status.entry(incident.status.to_string()).or_default() += 1;
        let band: SeverityBand = incident.effective_severity().band();
        *stats.by_band.entry(band.to_string()).or_default() += 1;
        *locations.entry(&incident.location.key).or_default() += 1;

        if let Some(at) = incident.triaged_at() {
            triage.push(hours(incident.reported_at, at));
        }
        if let Some(at) = incident.resolved_at() {
            resolve.push(hours(incident.reported_at, at));
        }
        if incident.status == IncidentStatus::Resolved {
            resolved += 1;
            if incident.false_positive {
                false_positives += 1;
            }
        }
    }

    stats.avg_hours_to_triage = mean(&triage);
    stats.avg_hours_to_resolve = mean(&resolve);
    stats.false_positive_rate = (resolved > 0).then(|| false_positives as f64 / resolved as f64);
    // Ties go to the alphabetically first key
    stats.busiest_location = locations
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(a.0)))
        .map(|(key, _)| key.to_string());
    stats
}
