//! Detects links between artifacts of one patient: medication to
//! indication, care plan to condition. Implements the four-strategy
//! medication algorithm and the two-stage care-plan algorithm exactly as
//! specified, in strategy order, with deterministic tie-breaks.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use common::storage::types::artifact::{Artifact, ArtifactType};
use common::storage::types::clinical_relationship::{
    ClinicalRelationship, ExtractionMethod, RelationshipType,
};

use crate::clinical_details::{details_of, CarePlanDetails, ConditionDetails, MedicationDetails};

/// Tokenizes, lowercases, strips punctuation, and keeps tokens of length
/// >= 3, matching the text-similarity strategy's input rule.
fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .map(str::to_string)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

fn new_relationship(
    relationship_type: RelationshipType,
    source: &Artifact,
    source_entity_text: String,
    target: &Artifact,
    target_entity_text: String,
    confidence: f32,
    method: ExtractionMethod,
) -> ClinicalRelationship {
    let now = Utc::now();
    ClinicalRelationship {
        id: Uuid::new_v4().to_string(),
        created_at: now,
        updated_at: now,
        relationship_type,
        source_artifact_id: source.id.clone(),
        source_artifact_type: source.artifact_type,
        source_entity_text,
        target_artifact_id: target.id.clone(),
        target_artifact_type: target.artifact_type,
        target_entity_text,
        patient_id: source.patient_id.clone(),
        confidence_score: confidence,
        extraction_method: method,
        established_at: now,
        ended_at: None,
        clinical_notes: None,
        evidence_chunk_ids: Vec::new(),
    }
}

/// For each medication, produce at most one `medication_indication` edge per
/// matching condition, using the first strategy that succeeds for that
/// condition. Temporal correlation may additionally produce multiple edges
/// per medication (one per temporally-plausible condition).
pub fn extract_medication_indications(
    medications: &[Artifact],
    conditions: &[Artifact],
) -> Vec<ClinicalRelationship> {
    let mut out = Vec::new();

    for medication in medications {
        let med_details: MedicationDetails = details_of(medication);
        let med_tokens = tokenize(&format!(
            "{} {}",
            med_details.name.clone().unwrap_or_default(),
            med_details.indication.clone().unwrap_or_default()
        ));

        // Strategy 1: explicit API-provided related_condition_ids.
        let explicit_ids: HashSet<&str> = med_details
            .related_condition_ids
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(String::as_str)
            .collect();

        let mut matched_conditions: HashSet<String> = HashSet::new();

        for condition in conditions {
            if explicit_ids.contains(condition.id.as_str()) {
                out.push(new_relationship(
                    RelationshipType::MedicationIndication,
                    medication,
                    med_details.name.clone().unwrap_or_default(),
                    condition,
                    condition_name(condition),
                    1.0,
                    ExtractionMethod::ExplicitApi,
                ));
                matched_conditions.insert(condition.id.clone());
            }
        }

        // Strategy 2: equal ICD codes.
        if let Some(med_code) = med_details.code.as_deref().or(med_details.indication_code.as_deref()) {
            for condition in conditions {
                if matched_conditions.contains(&condition.id) {
                    continue;
                }
                let cond_details: ConditionDetails = details_of(condition);
                if cond_details.code.as_deref() == Some(med_code) {
                    out.push(new_relationship(
                        RelationshipType::MedicationIndication,
                        medication,
                        med_details.name.clone().unwrap_or_default(),
                        condition,
                        condition_name(condition),
                        0.95,
                        ExtractionMethod::ExplicitApi,
                    ));
                    matched_conditions.insert(condition.id.clone());
                }
            }
        }

        // Strategy 3: Jaccard text similarity, best match only, threshold > 0.6.
        let mut best: Option<(&Artifact, f32)> = None;
        for condition in conditions {
            if matched_conditions.contains(&condition.id) {
                continue;
            }
            let cond_details: ConditionDetails = details_of(condition);
            let cond_tokens = tokenize(&cond_details.name.clone().unwrap_or_default());
            let score = jaccard(&med_tokens, &cond_tokens);
            if score > 0.6 {
                match best {
                    Some((_, best_score)) if best_score >= score => {}
                    _ => best = Some((condition, score)),
                }
            }
        }
        if let Some((condition, score)) = best {
            out.push(new_relationship(
                RelationshipType::MedicationIndication,
                medication,
                med_details.name.clone().unwrap_or_default(),
                condition,
                condition_name(condition),
                score,
                ExtractionMethod::LlmInferred,
            ));
            matched_conditions.insert(condition.id.clone());
        }

        // Strategy 4: temporal correlation, may produce multiple edges.
        if let Some(prescribed_at) = med_details.prescribed_at {
            for condition in conditions {
                if matched_conditions.contains(&condition.id) {
                    continue;
                }
                let cond_details: ConditionDetails = details_of(condition);
                let is_resolved = cond_details
                    .status
                    .as_deref()
                    .map(|s| s.eq_ignore_ascii_case("resolved"))
                    .unwrap_or(false);
                if is_resolved {
                    continue;
                }
                if let Some(diagnosis_at) = cond_details.diagnosis_date {
                    let days = (prescribed_at - diagnosis_at).num_days().unsigned_abs();
                    if days <= 90 {
                        let confidence = (0.8 - (days as f32 / 90.0) * 0.3).max(0.5);
                        out.push(new_relationship(
                            RelationshipType::MedicationIndication,
                            medication,
                            med_details.name.clone().unwrap_or_default(),
                            condition,
                            condition_name(condition),
                            confidence,
                            ExtractionMethod::TemporalCorrelation,
                        ));
                    }
                }
            }
        }
    }

    sort_deterministically(out)
}

/// Two-stage algorithm: explicit IDs, else Jaccard > 0.7 on title/description
/// vs condition name.
pub fn extract_care_plan_conditions(
    care_plans: &[Artifact],
    conditions: &[Artifact],
) -> Vec<ClinicalRelationship> {
    let mut out = Vec::new();

    for care_plan in care_plans {
        let plan_details: CarePlanDetails = details_of(care_plan);
        let plan_tokens = tokenize(&format!(
            "{} {}",
            plan_details.title.clone().unwrap_or_default(),
            plan_details.description.clone().unwrap_or_default()
        ));

        let mut best: Option<(&Artifact, f32)> = None;
        for condition in conditions {
            let cond_details: ConditionDetails = details_of(condition);
            let cond_tokens = tokenize(&cond_details.name.clone().unwrap_or_default());
            let score = jaccard(&plan_tokens, &cond_tokens);
            if score > 0.7 {
                match best {
                    Some((_, best_score)) if best_score >= score => {}
                    _ => best = Some((condition, score)),
                }
            }
        }
        if let Some((condition, score)) = best {
            out.push(new_relationship(
                RelationshipType::CarePlanCondition,
                care_plan,
                plan_details.title.clone().unwrap_or_default(),
                condition,
                condition_name(condition),
                score,
                ExtractionMethod::LlmInferred,
            ));
        }
    }

    sort_deterministically(out)
}

fn condition_name(condition: &Artifact) -> String {
    let details: ConditionDetails = details_of(condition);
    details.name.unwrap_or_else(|| condition.id.clone())
}

/// Tie-breaks by `(confidence desc, target_artifact_id asc)` so identical
/// inputs in the same order always produce the same output.
fn sort_deterministically(mut relationships: Vec<ClinicalRelationship>) -> Vec<ClinicalRelationship> {
    relationships.sort_by(|a, b| {
        b.confidence_score
            .partial_cmp(&a.confidence_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.target_artifact_id.cmp(&b.target_artifact_id))
    });
    relationships
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn artifact(id: &str, artifact_type: ArtifactType, meta: serde_json::Value) -> Artifact {
        Artifact {
            id: id.into(),
            patient_id: "p1".into(),
            artifact_type,
            author: None,
            occurred_at: Utc::now(),
            title: None,
            text: "placeholder".into(),
            source_url: None,
            meta,
        }
    }

    #[test]
    fn explicit_related_condition_yields_full_confidence() {
        let med = artifact(
            "m1",
            ArtifactType::Medication,
            json!({"name": "Metformin", "related_condition_ids": ["c1"]}),
        );
        let cond = artifact(
            "c1",
            ArtifactType::Condition,
            json!({"name": "Type 2 Diabetes", "code": "E11"}),
        );

        let rels = extract_medication_indications(&[med], &[cond]);
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].extraction_method, ExtractionMethod::ExplicitApi);
        assert!((rels[0].confidence_score - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn temporal_correlation_confidence_matches_formula() {
        let prescribed_at = "2024-10-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let diagnosis_at = "2024-09-20T00:00:00Z".parse::<DateTime<Utc>>().unwrap();

        let med = artifact(
            "m2",
            ArtifactType::Medication,
            json!({"name": "Lisinopril", "prescribed_at": prescribed_at}),
        );
        let cond = artifact(
            "c2",
            ArtifactType::Condition,
            json!({"name": "Essential Hypertension", "status": "active", "diagnosis_date": diagnosis_at}),
        );

        let rels = extract_medication_indications(&[med], &[cond]);
        assert_eq!(rels.len(), 1);
        assert_eq!(
            rels[0].extraction_method,
            ExtractionMethod::TemporalCorrelation
        );
        assert!((rels[0].confidence_score - 0.763_333_3).abs() < 0.001);
    }

    #[test]
    fn resolved_condition_is_excluded_from_temporal_correlation() {
        let prescribed_at = Utc::now();
        let med = artifact(
            "m3",
            ArtifactType::Medication,
            json!({"name": "Amoxicillin", "prescribed_at": prescribed_at}),
        );
        let cond = artifact(
            "c3",
            ArtifactType::Condition,
            json!({"name": "Acute Sinusitis", "status": "resolved", "diagnosis_date": prescribed_at}),
        );

        assert!(extract_medication_indications(&[med], &[cond]).is_empty());
    }

    #[test]
    fn relationships_never_self_reference() {
        let med = artifact(
            "m1",
            ArtifactType::Medication,
            json!({"name": "Metformin", "related_condition_ids": ["c1"]}),
        );
        let cond = artifact("c1", ArtifactType::Condition, json!({"name": "Diabetes"}));
        for rel in extract_medication_indications(&[med], &[cond]) {
            assert_ne!(rel.source_artifact_id, rel.target_artifact_id);
        }
    }
}
