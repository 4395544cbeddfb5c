//! Assembles the final `UiResponse` or `ErrorResponse` envelope, validating
//! citations and enforcing the response size cap before emission.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use common::error::AppError;
use common::model::response::{
    AuditMetadata, Confidence, ErrorDetail, ErrorResponse, ErrorResponseMetadata, Provenance,
    ResponseMetadata, StructuredExtraction, UiResponse, MAX_DETAILED_SUMMARY_CHARS, MAX_RESPONSE_BYTES,
};

pub const PIPELINE_VERSION: &str = "1";

fn error_code(error: &AppError) -> &'static str {
    match error {
        AppError::Validation(_) => "VALIDATION",
        AppError::Auth(_) => "AUTH",
        AppError::NotFound(_) => "NOT_FOUND",
        AppError::RateLimited(_) => "RATE_LIMITED",
        AppError::Timeout(_) => "TIMEOUT",
        AppError::Unavailable(_) => "UNAVAILABLE",
        AppError::Database(_)
        | AppError::Http(_)
        | AppError::Io(_)
        | AppError::Serialization(_)
        | AppError::Config(_)
        | AppError::Anyhow(_)
        | AppError::Internal(_) => "INTERNAL",
    }
}

#[allow(clippy::too_many_arguments)]
pub struct ResponseInputs {
    pub query_id: String,
    pub patient_id: String,
    pub short_answer: String,
    pub detailed_summary: String,
    pub structured_extractions: Vec<StructuredExtraction>,
    pub provenance: Vec<Provenance>,
    pub confidence: Confidence,
    pub query_timestamp: DateTime<Utc>,
    pub total_time_ms: u64,
    pub model_used: String,
    pub components_executed: Vec<String>,
    pub timestamps: Vec<(String, DateTime<Utc>)>,
}

/// Validates and assembles a success envelope. Returns `Err` only for a
/// defect the caller must fix before retrying (a dangling citation); size
/// and summary-length violations are repaired in place instead of failing.
pub fn build_success(mut inputs: ResponseInputs, known_chunk_ids: &HashSet<String>) -> Result<UiResponse, AppError> {
    if inputs.short_answer.trim().is_empty() {
        return Err(AppError::Internal(
            "response builder refused to emit an empty short_answer".into(),
        ));
    }

    for extraction in &inputs.structured_extractions {
        if let Some(provenance) = &extraction.provenance {
            if !known_chunk_ids.contains(&provenance.chunk_id) {
                return Err(AppError::Internal(format!(
                    "extraction cites unknown chunk id {}",
                    provenance.chunk_id
                )));
            }
        }
    }

    if inputs.detailed_summary.chars().count() > MAX_DETAILED_SUMMARY_CHARS {
        inputs.detailed_summary = inputs
            .detailed_summary
            .chars()
            .take(MAX_DETAILED_SUMMARY_CHARS)
            .collect();
    }

    let response_timestamp = Utc::now();
    let mut response = UiResponse {
        query_id: inputs.query_id.clone(),
        short_answer: inputs.short_answer,
        detailed_summary: inputs.detailed_summary,
        structured_extractions: inputs.structured_extractions,
        provenance: inputs.provenance,
        confidence: inputs.confidence,
        metadata: ResponseMetadata {
            patient_id: inputs.patient_id,
            query_timestamp: inputs.query_timestamp,
            response_timestamp,
            total_time_ms: inputs.total_time_ms,
            sources_count: 0,
            model_used: inputs.model_used,
        },
        audit: AuditMetadata {
            query_id: inputs.query_id,
            components_executed: inputs.components_executed,
            pipeline_version: PIPELINE_VERSION.to_string(),
            timestamps: inputs.timestamps,
        },
    };
    response.metadata.sources_count = response.provenance.len();

    enforce_size_cap(&mut response);
    Ok(response)
}

/// Drops the lowest-ranked (by `relevance_score`) provenance entries, then
/// re-caps `detailed_summary`, until the serialized response fits under
/// `MAX_RESPONSE_BYTES` or there is nothing left to drop.
fn enforce_size_cap(response: &mut UiResponse) {
    while serialized_len(response) > MAX_RESPONSE_BYTES {
        if response.provenance.len() > 1 {
            let drop_index = response
                .provenance
                .iter()
                .enumerate()
                .min_by(|a, b| {
                    a.1.relevance_score
                        .partial_cmp(&b.1.relevance_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(idx, _)| idx);
            if let Some(idx) = drop_index {
                response.provenance.remove(idx);
                response.metadata.sources_count = response.provenance.len();
                continue;
            }
        }
        if response.detailed_summary.chars().count() > MAX_DETAILED_SUMMARY_CHARS / 2 {
            let half = response.detailed_summary.chars().count() / 2;
            response.detailed_summary = response.detailed_summary.chars().take(half).collect();
            continue;
        }
        break;
    }
}

fn serialized_len(response: &UiResponse) -> usize {
    serde_json::to_vec(response).map(|bytes| bytes.len()).unwrap_or(0)
}

pub fn build_error(query_id: String, query_timestamp: DateTime<Utc>, error: &AppError) -> ErrorResponse {
    let user_facing = error.user_facing();
    ErrorResponse {
        query_id: query_id.clone(),
        error: ErrorDetail {
            code: error_code(error).to_string(),
            message: error.to_string(),
            user_message: user_facing.message,
            details: None,
        },
        metadata: ErrorResponseMetadata {
            query_timestamp,
            error_timestamp: Utc::now(),
        },
        audit: AuditMetadata {
            query_id,
            components_executed: Vec::new(),
            pipeline_version: PIPELINE_VERSION.to_string(),
            timestamps: Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::model::response::{ConfidenceComponents, ConfidenceLabel, ExtractionProvenance};

    fn base_inputs() -> ResponseInputs {
        let now = Utc::now();
        ResponseInputs {
            query_id: "q1".into(),
            patient_id: "p1".into(),
            short_answer: "The patient takes Metformin.".into(),
            detailed_summary: "Detailed summary.".into(),
            structured_extractions: vec![],
            provenance: vec![],
            confidence: Confidence {
                score: 0.8,
                label: ConfidenceLabel::High,
                components: ConfidenceComponents {
                    avg_retrieval_score: 0.9,
                    extraction_quality: 0.8,
                    support_density: 1.0,
                },
                reason: None,
            },
            query_timestamp: now,
            total_time_ms: 10,
            model_used: "test-model".into(),
            components_executed: vec!["retriever".into()],
            timestamps: vec![],
        }
    }

    #[test]
    fn rejects_empty_short_answer() {
        let mut inputs = base_inputs();
        inputs.short_answer = "   ".into();
        assert!(build_success(inputs, &HashSet::new()).is_err());
    }

    #[test]
    fn rejects_extraction_citing_unknown_chunk() {
        let mut inputs = base_inputs();
        inputs.structured_extractions = vec![StructuredExtraction {
            extraction_type: "medication".into(),
            content: "Metformin".into(),
            provenance: Some(ExtractionProvenance {
                artifact_id: "m1".into(),
                chunk_id: "missing-chunk".into(),
                char_offsets: [0, 9],
                supporting_text: "Metformin".into(),
            }),
        }];
        assert!(build_success(inputs, &HashSet::new()).is_err());
    }

    #[test]
    fn accepts_extraction_citing_known_chunk() {
        let mut inputs = base_inputs();
        inputs.structured_extractions = vec![StructuredExtraction {
            extraction_type: "medication".into(),
            content: "Metformin".into(),
            provenance: Some(ExtractionProvenance {
                artifact_id: "m1".into(),
                chunk_id: "c1".into(),
                char_offsets: [0, 9],
                supporting_text: "Metformin".into(),
            }),
        }];
        let mut known = HashSet::new();
        known.insert("c1".to_string());
        assert!(build_success(inputs, &known).is_ok());
    }

    #[test]
    fn truncates_oversized_detailed_summary() {
        let mut inputs = base_inputs();
        inputs.detailed_summary = "x".repeat(MAX_DETAILED_SUMMARY_CHARS + 500);
        let response = build_success(inputs, &HashSet::new()).unwrap();
        assert_eq!(response.detailed_summary.chars().count(), MAX_DETAILED_SUMMARY_CHARS);
    }
}
