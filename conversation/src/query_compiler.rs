//! Turns raw question text into a `StructuredQuery`: entity recognition
//! (reusing the ingestion side's clinical entity extractor), keyword-based
//! intent classification, and simple temporal-phrase parsing.

use chrono::{Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use common::model::query::{Intent, QueryEntity, StructuredQuery, TemporalFilter};
use ingestion_pipeline::entity_extractor::{self, EntityType};

fn entity_type_name(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Dosage => "dosage",
        EntityType::Medication => "medication",
        EntityType::Condition => "condition",
        EntityType::Symptom => "symptom",
        EntityType::Procedure => "procedure",
    }
}

/// Extracts the same clinical entities the ingestion pipeline recognizes
/// inside artifact text, applied here to the question itself.
pub fn extract_entities(text: &str) -> Vec<QueryEntity> {
    entity_extractor::extract(text)
        .into_iter()
        .map(|e| QueryEntity {
            text: e.text,
            entity_type: entity_type_name(e.entity_type).to_string(),
        })
        .collect()
}

const INTENT_KEYWORDS: &[(&str, Intent)] = &[
    ("medication", Intent::RetrieveMedications),
    ("prescri", Intent::RetrieveMedications),
    ("dose", Intent::RetrieveMedications),
    ("condition", Intent::RetrieveConditions),
    ("diagnos", Intent::RetrieveConditions),
    ("care plan", Intent::RetrieveCarePlans),
    ("treatment plan", Intent::RetrieveCarePlans),
    ("lab", Intent::RetrieveLabs),
    ("result", Intent::RetrieveLabs),
    ("vital", Intent::RetrieveVitals),
    ("blood pressure", Intent::RetrieveVitals),
    ("heart rate", Intent::RetrieveVitals),
    ("note", Intent::RetrieveNotes),
    ("visit summary", Intent::RetrieveNotes),
];

/// First keyword match wins; an unmatched question defaults to `General`.
pub fn classify_intent(text: &str) -> Intent {
    let lower = text.to_lowercase();
    for (keyword, intent) in INTENT_KEYWORDS {
        if lower.contains(keyword) {
            return *intent;
        }
    }
    Intent::General
}

static RELATIVE_DAYS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)last\s+(\d+)\s+day").expect("static regex must compile"));
static SINCE_DAYS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)since\s+(\d+)\s+day").expect("static regex must compile"));

/// Recognizes `"last N days"` / `"since N days"` phrasing; any question
/// without one of these carries no temporal filter.
pub fn extract_temporal_filter(text: &str) -> Option<TemporalFilter> {
    let now = Utc::now();
    let days = RELATIVE_DAYS_RE
        .captures(text)
        .or_else(|| SINCE_DAYS_RE.captures(text))
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())?;

    Some(TemporalFilter {
        from: Some(now - Duration::days(days)),
        to: Some(now),
    })
}

/// Compiles a brand-new `StructuredQuery` from raw text, ignoring any prior
/// conversational context — used for the first turn of a session and for
/// non-follow-up questions.
pub fn compile(patient_id: &str, text: &str, detail_level: u8) -> StructuredQuery {
    StructuredQuery {
        query_id: Uuid::new_v4().to_string(),
        original_query: text.to_string(),
        patient_id: patient_id.to_string(),
        intent: classify_intent(text),
        entities: extract_entities(text),
        temporal_filter: extract_temporal_filter(text),
        filters: std::collections::HashMap::new(),
        detail_level,
        processed_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_medication_questions() {
        assert_eq!(
            classify_intent("What medications is the patient on?"),
            Intent::RetrieveMedications
        );
    }

    #[test]
    fn defaults_to_general_when_no_keyword_matches() {
        assert_eq!(classify_intent("Tell me about the patient"), Intent::General);
    }

    #[test]
    fn extracts_relative_day_window() {
        let filter = extract_temporal_filter("What labs were run in the last 30 days?").unwrap();
        assert!(filter.from.is_some());
        assert!(filter.to.is_some());
    }

    #[test]
    fn no_temporal_phrase_yields_none() {
        assert!(extract_temporal_filter("What medications is the patient on?").is_none());
    }

    #[test]
    fn recognizes_medication_entity_in_question_text() {
        let entities = extract_entities("Is the patient on metformin 500mg?");
        assert!(entities.iter().any(|e| e.entity_type == "medication"));
    }
}
