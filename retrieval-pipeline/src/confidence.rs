//! Fixed-formula confidence scoring over one query's retrieval candidates
//! and structured extractions.

use common::model::response::{Confidence, ConfidenceComponents, ConfidenceLabel};

use crate::types::RetrievalCandidate;

/// Mirrors `StructuredExtraction` minus `content`/`type`, which the scorer
/// never reads.
pub struct ExtractionSignal {
    pub has_provenance: bool,
    pub has_char_offsets: bool,
}

fn avg_retrieval_score(candidates: &[RetrievalCandidate]) -> f32 {
    if candidates.is_empty() {
        return 0.0;
    }
    candidates.iter().map(|c| c.score).sum::<f32>() / candidates.len() as f32
}

fn extraction_quality(extractions: &[ExtractionSignal]) -> f32 {
    if extractions.is_empty() {
        return 0.0;
    }
    let total: f32 = extractions
        .iter()
        .map(|e| 0.5 + 0.3 * f32::from(e.has_provenance) + 0.2 * f32::from(e.has_char_offsets))
        .sum();
    total / extractions.len() as f32
}

fn support_density(candidates: &[RetrievalCandidate]) -> f32 {
    if candidates.is_empty() {
        return 0.0;
    }
    let unique_sources: std::collections::HashSet<&str> =
        candidates.iter().map(|c| c.artifact_id.as_str()).collect();
    unique_sources.len() as f32 / candidates.len() as f32
}

fn label_for(score: f32) -> ConfidenceLabel {
    if score >= 0.7 {
        ConfidenceLabel::High
    } else if score >= 0.4 {
        ConfidenceLabel::Medium
    } else {
        ConfidenceLabel::Low
    }
}

/// Names the weakest of the three components when the label is not "high";
/// `None` when high, since no single component needs calling out.
fn weakest_component_reason(components: &ConfidenceComponents, label: ConfidenceLabel) -> Option<String> {
    if label == ConfidenceLabel::High {
        return None;
    }
    let weighted = [
        ("avg_retrieval_score", components.avg_retrieval_score),
        ("extraction_quality", components.extraction_quality),
        ("support_density", components.support_density),
    ];
    weighted
        .into_iter()
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(name, _)| format!("low {name}"))
}

/// `confidence = 0.6*avg_retrieval_score + 0.3*extraction_quality + 0.1*support_density`.
pub fn score(candidates: &[RetrievalCandidate], extractions: &[ExtractionSignal]) -> Confidence {
    let components = ConfidenceComponents {
        avg_retrieval_score: avg_retrieval_score(candidates),
        extraction_quality: extraction_quality(extractions),
        support_density: support_density(candidates),
    };

    let total =
        0.6 * components.avg_retrieval_score + 0.3 * components.extraction_quality + 0.1 * components.support_density;
    let label = label_for(total);
    let reason = weakest_component_reason(&components, label);

    Confidence {
        score: total,
        label,
        components,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn candidate(score: f32, artifact_id: &str) -> RetrievalCandidate {
        RetrievalCandidate {
            chunk_id: format!("c-{artifact_id}"),
            artifact_id: artifact_id.into(),
            patient_id: "p1".into(),
            score,
            snippet: String::new(),
            highlights: vec![],
            metadata: json!({}),
            rank: 0,
            hop_distance: 0,
            relationship_path: vec![],
        }
    }

    #[test]
    fn empty_candidates_yield_zero_confidence_and_low_label() {
        let confidence = score(&[], &[]);
        assert_eq!(confidence.score, 0.0);
        assert_eq!(confidence.label, ConfidenceLabel::Low);
        assert!(confidence.reason.is_some());
    }

    #[test]
    fn high_quality_inputs_yield_high_label_with_no_reason() {
        let candidates = vec![candidate(0.95, "a1"), candidate(0.9, "a2")];
        let extractions = vec![ExtractionSignal {
            has_provenance: true,
            has_char_offsets: true,
        }];
        let confidence = score(&candidates, &extractions);
        assert_eq!(confidence.label, ConfidenceLabel::High);
        assert!(confidence.reason.is_none());
        let _ = Utc::now();
    }

    #[test]
    fn monotonic_in_avg_retrieval_score() {
        let low = score(&[candidate(0.2, "a1")], &[]);
        let high = score(&[candidate(0.8, "a1")], &[]);
        assert!(high.score > low.score);
    }
}
