use serde_json::Value;

use crate::stored_object;

stored_object!(ConversationRecord, "conversation_history", {
    patient_id: String,
    query: String,
    query_intent: String,
    query_timestamp: DateTime<Utc>,
    short_answer: String,
    detailed_summary: String,
    model_used: String,
    extractions: Value,
    sources: Value,
    retrieval_candidates: Value,
    grounding_score: Option<f32>,
    consistency_score: Option<f32>,
    confidence_score: f32,
    hallucination_risk: Option<f32>,
    overall_quality_score: Option<f32>,
    enrichment_enabled: bool,
    multi_hop_enabled: bool,
    reasoning_enabled: bool,
    execution_time_ms: u64,
    retrieval_time_ms: u64,
    generation_time_ms: u64
});
