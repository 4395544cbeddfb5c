//! Typed views over an `Artifact`'s opaque `meta` bag, one per artifact
//! type. The normalizer is the only place that reconciles field-name
//! aliases; everything downstream reads through these structs instead of
//! indexing into `meta` directly.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use common::storage::types::artifact::Artifact;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MedicationDetails {
    pub name: Option<String>,
    pub code: Option<String>,
    pub indication: Option<String>,
    pub indication_code: Option<String>,
    pub related_condition_ids: Option<Vec<String>>,
    pub prescribed_at: Option<DateTime<Utc>>,
    pub dosage: Option<String>,
    pub frequency: Option<String>,
    pub route: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConditionDetails {
    pub name: Option<String>,
    pub code: Option<String>,
    pub status: Option<String>,
    pub diagnosis_date: Option<DateTime<Utc>>,
    pub severity: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CarePlanDetails {
    pub title: Option<String>,
    pub description: Option<String>,
    pub addresses: Option<Vec<String>>,
    pub goals: Option<Vec<String>>,
    pub interventions: Option<Vec<String>>,
    pub rationale: Option<String>,
}

pub fn details_of<T: Default + for<'de> Deserialize<'de>>(artifact: &Artifact) -> T {
    serde_json::from_value(artifact.meta.clone()).unwrap_or_default()
}
