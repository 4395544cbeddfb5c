use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provenance reference attached to one structured extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionProvenance {
    pub artifact_id: String,
    pub chunk_id: String,
    pub char_offsets: [usize; 2],
    pub supporting_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredExtraction {
    #[serde(rename = "type")]
    pub extraction_type: String,
    pub content: String,
    pub provenance: Option<ExtractionProvenance>,
}

/// A single formatted citation surfaced alongside the answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub artifact_id: String,
    pub artifact_type: String,
    pub snippet: String,
    pub note_date: String,
    pub author: Option<String>,
    pub source_url: Option<String>,
    pub char_offsets: [usize; 2],
    pub relevance_score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceComponents {
    pub avg_retrieval_score: f32,
    pub extraction_quality: f32,
    pub support_density: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLabel {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Confidence {
    pub score: f32,
    pub label: ConfidenceLabel,
    pub components: ConfidenceComponents,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub patient_id: String,
    pub query_timestamp: DateTime<Utc>,
    pub response_timestamp: DateTime<Utc>,
    pub total_time_ms: u64,
    pub sources_count: usize,
    pub model_used: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditMetadata {
    pub query_id: String,
    pub components_executed: Vec<String>,
    pub pipeline_version: String,
    pub timestamps: Vec<(String, DateTime<Utc>)>,
}

/// The success envelope returned to the invoking surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiResponse {
    pub query_id: String,
    pub short_answer: String,
    pub detailed_summary: String,
    pub structured_extractions: Vec<StructuredExtraction>,
    pub provenance: Vec<Provenance>,
    pub confidence: Confidence,
    pub metadata: ResponseMetadata,
    pub audit: AuditMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    pub user_message: String,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponseMetadata {
    pub query_timestamp: DateTime<Utc>,
    pub error_timestamp: DateTime<Utc>,
}

/// The failure envelope, matching the success envelope's top-level shape so
/// callers can discriminate on the presence of `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub query_id: String,
    pub error: ErrorDetail,
    pub metadata: ErrorResponseMetadata,
    pub audit: AuditMetadata,
}

pub const MAX_RESPONSE_BYTES: usize = 1_000_000;
pub const MAX_DETAILED_SUMMARY_CHARS: usize = 2_000;
