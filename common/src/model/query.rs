use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A recognized entity mention carried across turns and filters — distinct
/// from `ChunkEntity`, which is anchored to offsets inside one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEntity {
    pub text: String,
    #[serde(rename = "type")]
    pub entity_type: String,
}

/// An inclusive or open-ended date range extracted from a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// The recognized question-answering intents the conversation manager and
/// retriever reason about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    RetrieveMedications,
    RetrieveConditions,
    RetrieveCarePlans,
    RetrieveLabs,
    RetrieveVitals,
    RetrieveNotes,
    General,
}

/// The compiled form of a user question, ready for the metadata filter and
/// vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredQuery {
    pub query_id: String,
    pub original_query: String,
    pub patient_id: String,
    pub intent: Intent,
    pub entities: Vec<QueryEntity>,
    pub temporal_filter: Option<TemporalFilter>,
    pub filters: HashMap<String, String>,
    pub detail_level: u8,
    pub processed_at: DateTime<Utc>,
}
