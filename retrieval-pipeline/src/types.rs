//! Shared candidate/result shapes threaded through the retrieval pipeline's
//! stages: metadata-filtered vector search, multi-hop expansion, confidence
//! scoring, and provenance formatting all read and write `RetrievalCandidate`.

use serde_json::Value;

use crate::highlight::Highlight;

/// One retrieved chunk, annotated as it moves through the pipeline. `hop_distance`
/// and `relationship_path` stay at their defaults until the multi-hop stage runs.
#[derive(Debug, Clone)]
pub struct RetrievalCandidate {
    pub chunk_id: String,
    pub artifact_id: String,
    pub patient_id: String,
    pub score: f32,
    pub snippet: String,
    pub highlights: Vec<Highlight>,
    pub metadata: Value,
    pub rank: usize,
    pub hop_distance: u8,
    pub relationship_path: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub query_id: String,
    pub candidates: Vec<RetrievalCandidate>,
    pub total_searched: usize,
    pub filtered_count: usize,
    pub retrieval_time_ms: u64,
}
