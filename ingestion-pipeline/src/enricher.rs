//! Builds the `enriched_text` a chunk is ultimately indexed against, by
//! inlining relationship context into the artifact's own text, and scores
//! how complete and well-connected the resulting record is. Pure function
//! of its inputs — run it twice on the same artifact and relationship set
//! and the text and scores come out byte-identical.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde_json::{json, Value};

use common::storage::types::artifact::{Artifact, ArtifactType};
use common::storage::types::clinical_relationship::{
    ClinicalRelationship, ExtractionMethod, RelationshipType,
};
use common::storage::types::enriched_artifact::{EnrichedArtifact, EnrichmentMethod};

use crate::clinical_details::{details_of, CarePlanDetails, ConditionDetails, MedicationDetails};
use crate::entity_extractor;

fn has(opt: &Option<String>) -> bool {
    opt.as_deref().is_some_and(|s| !s.trim().is_empty())
}

fn medication_completeness(details: &MedicationDetails, artifact: &Artifact) -> f32 {
    let score = 0.2 * has(&details.dosage) as u8 as f32
        + 0.2 * has(&details.frequency) as u8 as f32
        + 0.1 * has(&details.route) as u8 as f32
        + 0.3 * (has(&details.indication) || has(&details.code)) as u8 as f32
        + 0.1 * artifact.author.is_some() as u8 as f32
        + 0.1; // occurred_at is mandatory post-normalization.
    score.clamp(0.0, 1.0)
}

fn condition_completeness(details: &ConditionDetails, has_treatments: bool) -> f32 {
    let score = 0.3 * has(&details.code) as u8 as f32
        + 0.2 * has(&details.status) as u8 as f32
        + 0.2 // diagnosis_date is mandatory post-normalization.
        + 0.2 * has_treatments as u8 as f32
        + 0.1 * has(&details.notes) as u8 as f32;
    score.clamp(0.0, 1.0)
}

fn care_plan_completeness(details: &CarePlanDetails) -> f32 {
    let goals = details.goals.as_deref().unwrap_or_default();
    let interventions = details.interventions.as_deref().unwrap_or_default();
    let addresses = details.addresses.as_deref().unwrap_or_default();
    let score = 0.3 * (!goals.is_empty()) as u8 as f32
        + 0.3 * (!interventions.is_empty()) as u8 as f32
        + 0.2 * (!addresses.is_empty()) as u8 as f32
        + 0.2 * has(&details.rationale) as u8 as f32;
    score.clamp(0.0, 1.0)
}

fn context_depth(relationship_count: usize) -> f32 {
    match relationship_count {
        0 => 0.0,
        1 => 0.5,
        2 => 0.7,
        3 | 4 => 0.9,
        _ => 1.0,
    }
}

fn enrichment_method_for(relationships: &[&ClinicalRelationship]) -> EnrichmentMethod {
    if relationships.is_empty() {
        return EnrichmentMethod::ExplicitApi;
    }
    let methods: HashSet<ExtractionMethod> = relationships.iter().map(|r| r.extraction_method).collect();
    if methods.len() > 1 {
        return EnrichmentMethod::Hybrid;
    }
    match methods.into_iter().next() {
        Some(ExtractionMethod::ExplicitApi) => EnrichmentMethod::ExplicitApi,
        Some(ExtractionMethod::LlmInferred) => EnrichmentMethod::LlmInferred,
        Some(ExtractionMethod::TemporalCorrelation) => EnrichmentMethod::TemporalCorrelation,
        None => EnrichmentMethod::ExplicitApi,
    }
}

fn relationship_summary(relationships: &[&ClinicalRelationship]) -> String {
    if relationships.is_empty() {
        return String::new();
    }
    let mut counts: HashMap<&'static str, usize> = HashMap::new();
    for r in relationships {
        let key = match r.relationship_type {
            RelationshipType::MedicationIndication => "medication_indication",
            RelationshipType::ProcedureDiagnosis => "procedure_diagnosis",
            RelationshipType::CarePlanCondition => "care_plan_condition",
            RelationshipType::LabCondition => "lab_condition",
            RelationshipType::SymptomDiagnosis => "symptom_diagnosis",
            RelationshipType::MedicationInteraction => "medication_interaction",
        };
        *counts.entry(key).or_insert(0) += 1;
    }
    let mut parts: Vec<String> = counts
        .into_iter()
        .map(|(kind, count)| format!("{count} {kind}"))
        .collect();
    parts.sort();
    format!("{} relationship(s): {}.", relationships.len(), parts.join(", "))
}

fn clinical_context_of(relationships: &[&ClinicalRelationship]) -> Value {
    let mut types: Vec<&'static str> = relationships
        .iter()
        .map(|r| match r.relationship_type {
            RelationshipType::MedicationIndication => "medication_indication",
            RelationshipType::ProcedureDiagnosis => "procedure_diagnosis",
            RelationshipType::CarePlanCondition => "care_plan_condition",
            RelationshipType::LabCondition => "lab_condition",
            RelationshipType::SymptomDiagnosis => "symptom_diagnosis",
            RelationshipType::MedicationInteraction => "medication_interaction",
        })
        .collect();
    types.sort_unstable();
    types.dedup();
    json!({
        "relationship_count": relationships.len(),
        "relationship_types": types,
    })
}

fn related_artifact_ids_of(artifact_id: &str, relationships: &[&ClinicalRelationship]) -> Vec<String> {
    let mut ids: Vec<String> = relationships
        .iter()
        .flat_map(|r| [r.source_artifact_id.clone(), r.target_artifact_id.clone()])
        .filter(|id| id != artifact_id)
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

fn build_medication_text(
    artifact: &Artifact,
    details: &MedicationDetails,
    outgoing: &[&ClinicalRelationship],
    related: &HashMap<String, Artifact>,
) -> String {
    let mut sentences = Vec::new();

    let mut header = details.name.clone().unwrap_or_else(|| artifact.id.clone());
    if has(&details.dosage) {
        header.push(' ');
        header.push_str(details.dosage.as_deref().unwrap_or_default());
    }
    if has(&details.frequency) {
        header.push(' ');
        header.push_str(details.frequency.as_deref().unwrap_or_default());
    }
    if let Some(route) = details.route.as_deref().filter(|r| !r.trim().is_empty()) {
        sentences.push(format!("Medication: {header} ({route})."));
    } else {
        sentences.push(format!("Medication: {header}."));
    }

    if has(&details.indication) {
        let indication = details.indication.as_deref().unwrap_or_default();
        match details.code.as_deref().or(details.indication_code.as_deref()) {
            Some(code) if !code.trim().is_empty() => {
                sentences.push(format!("Indication: {indication} ({code})."));
            }
            _ => sentences.push(format!("Indication: {indication}.")),
        }
    }

    let mut sorted_outgoing: Vec<&&ClinicalRelationship> = outgoing.iter().collect();
    sorted_outgoing.sort_by(|a, b| a.target_artifact_id.cmp(&b.target_artifact_id));

    if let Some(primary) = sorted_outgoing.first() {
        sentences.push(format!("Prescribed for {}.", primary.target_entity_text));
    }

    if !sorted_outgoing.is_empty() {
        let list = sorted_outgoing
            .iter()
            .map(|r| {
                let status = related
                    .get(&r.target_artifact_id)
                    .map(|a| details_of::<ConditionDetails>(a))
                    .and_then(|d| d.status)
                    .unwrap_or_else(|| "unknown".to_string());
                format!("{} ({status})", r.target_entity_text)
            })
            .collect::<Vec<_>>()
            .join(", ");
        sentences.push(format!("Related Conditions: {list}."));
    }

    if let Some(author) = artifact.author.as_deref() {
        sentences.push(format!("Prescribed by: {author}."));
    }

    sentences.push(format!(
        "Prescribed on: {}.",
        artifact.occurred_at.format("%B %-d, %Y")
    ));

    sentences.join(" ")
}

fn build_condition_text(
    artifact: &Artifact,
    details: &ConditionDetails,
    incoming_medications: &[&ClinicalRelationship],
    has_care_plan: bool,
) -> String {
    let mut sentences = Vec::new();
    let name = details.name.clone().unwrap_or_else(|| artifact.id.clone());

    match details.code.as_deref() {
        Some(code) if !code.trim().is_empty() => sentences.push(format!("Condition: {name} ({code}).")),
        _ => sentences.push(format!("Condition: {name}.")),
    }

    if has(&details.status) {
        let status = details.status.as_deref().unwrap_or_default();
        match details.severity.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(severity) => sentences.push(format!("Status: {status}, {severity}.")),
            None => sentences.push(format!("Status: {status}.")),
        }
    }

    sentences.push(format!(
        "Diagnosed on: {}.",
        artifact.occurred_at.format("%B %-d, %Y")
    ));

    if !incoming_medications.is_empty() {
        let mut names: Vec<String> = incoming_medications
            .iter()
            .map(|r| r.source_entity_text.clone())
            .collect();
        names.sort();
        names.dedup();
        sentences.push(format!("Current Treatments: {}.", names.join(", ")));
    }

    if has_care_plan {
        sentences.push("Care plan in place.".to_string());
    }

    if has(&details.notes) {
        sentences.push(format!("Notes: {}.", details.notes.as_deref().unwrap_or_default()));
    }

    sentences.join(" ")
}

fn build_care_plan_text(details: &CarePlanDetails) -> String {
    let mut sentences = Vec::new();
    let title = details.title.clone().unwrap_or_default();
    sentences.push(format!("Care Plan: {title}."));

    let addresses = details.addresses.as_deref().unwrap_or_default();
    if !addresses.is_empty() {
        sentences.push(format!("Addresses: {}.", addresses.join(", ")));
    }

    let goals = details.goals.as_deref().unwrap_or_default();
    if !goals.is_empty() {
        let numbered = goals
            .iter()
            .enumerate()
            .map(|(i, g)| format!("{}) {g}", i + 1))
            .collect::<Vec<_>>()
            .join(" ");
        sentences.push(format!("Goals: {numbered}"));
    }

    let interventions = details.interventions.as_deref().unwrap_or_default();
    if !interventions.is_empty() {
        let numbered = interventions
            .iter()
            .enumerate()
            .map(|(i, g)| format!("{}) {g}", i + 1))
            .collect::<Vec<_>>()
            .join(" ");
        sentences.push(format!("Interventions: {numbered}"));
    }

    if has(&details.rationale) {
        sentences.push(format!("Rationale: {}.", details.rationale.as_deref().unwrap_or_default()));
    }

    sentences.join(" ")
}

/// Produces the `EnrichedArtifact` for one artifact, given every relationship
/// that touches it (either direction) and the artifacts those relationships
/// point at (for pulling in e.g. a related condition's status). Pass the
/// prior `enrichment_version` on re-enrichment; omit it for first enrichment.
pub fn enrich(
    artifact: &Artifact,
    relationships: &[ClinicalRelationship],
    related_artifacts: &HashMap<String, Artifact>,
    previous_version: Option<u32>,
) -> EnrichedArtifact {
    let mut touching: Vec<&ClinicalRelationship> = relationships
        .iter()
        .filter(|r| r.source_artifact_id == artifact.id || r.target_artifact_id == artifact.id)
        .collect();
    touching.sort_by(|a, b| {
        a.target_artifact_id
            .cmp(&b.target_artifact_id)
            .then_with(|| a.source_artifact_id.cmp(&b.source_artifact_id))
    });

    let outgoing: Vec<&ClinicalRelationship> = touching
        .iter()
        .copied()
        .filter(|r| r.source_artifact_id == artifact.id)
        .collect();
    let incoming: Vec<&ClinicalRelationship> = touching
        .iter()
        .copied()
        .filter(|r| r.target_artifact_id == artifact.id)
        .collect();

    let (enriched_text, completeness_score) = match artifact.artifact_type {
        ArtifactType::Medication => {
            let details: MedicationDetails = details_of(artifact);
            let text = build_medication_text(artifact, &details, &outgoing, related_artifacts);
            let score = medication_completeness(&details, artifact);
            (text, score)
        }
        ArtifactType::Condition => {
            let details: ConditionDetails = details_of(artifact);
            let incoming_medications: Vec<&ClinicalRelationship> = incoming
                .iter()
                .copied()
                .filter(|r| r.relationship_type == RelationshipType::MedicationIndication)
                .collect();
            let has_care_plan = incoming
                .iter()
                .any(|r| r.relationship_type == RelationshipType::CarePlanCondition);
            let text = build_condition_text(artifact, &details, &incoming_medications, has_care_plan);
            let score = condition_completeness(&details, !incoming_medications.is_empty());
            (text, score)
        }
        ArtifactType::CarePlan => {
            let details: CarePlanDetails = details_of(artifact);
            let text = build_care_plan_text(&details);
            let score = care_plan_completeness(&details);
            (text, score)
        }
        _ => (artifact.text.clone(), 0.5),
    };

    let entities = entity_extractor::extract(&artifact.text);
    let extracted_entities = serde_json::to_value(
        entities
            .iter()
            .map(|e| {
                json!({
                    "text": e.text,
                    "type": format!("{:?}", e.entity_type),
                    "start": e.start,
                    "end": e.end,
                    "normalized": e.normalized,
                })
            })
            .collect::<Vec<_>>(),
    )
    .unwrap_or(Value::Null);

    let now = Utc::now();
    EnrichedArtifact {
        id: common::storage::types::enriched_artifact::EnrichedArtifact::upsert_id(&artifact.id),
        created_at: now,
        updated_at: now,
        artifact_id: artifact.id.clone(),
        patient_id: artifact.patient_id.clone(),
        artifact_type: artifact.artifact_type,
        occurred_at: artifact.occurred_at,
        original_text: artifact.text.clone(),
        enriched_text,
        extracted_entities,
        clinical_context: clinical_context_of(&touching),
        related_artifact_ids: related_artifact_ids_of(&artifact.id, &touching),
        relationship_summary: relationship_summary(&touching),
        enrichment_version: previous_version.map_or(1, |v| v + 1),
        enriched_at: now,
        enrichment_method: enrichment_method_for(&touching),
        completeness_score,
        context_depth_score: context_depth(touching.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::artifact::ArtifactType;
    use common::storage::types::clinical_relationship::ExtractionMethod;
    use serde_json::json;

    fn medication(meta: Value) -> Artifact {
        Artifact {
            id: "m1".into(),
            patient_id: "p1".into(),
            artifact_type: ArtifactType::Medication,
            author: Some("Dr. Lee".into()),
            occurred_at: Utc::now(),
            title: Some("Metformin".into()),
            text: "Metformin 500mg BID".into(),
            source_url: None,
            meta,
        }
    }

    #[test]
    fn enrichment_is_idempotent() {
        let artifact = medication(json!({"name": "Metformin", "dosage": "500mg", "frequency": "BID"}));
        let empty = HashMap::new();
        let first = enrich(&artifact, &[], &empty, None);
        let second = enrich(&artifact, &[], &empty, None);
        assert_eq!(first.enriched_text, second.enriched_text);
        assert!((first.completeness_score - second.completeness_score).abs() < f32::EPSILON);
    }

    #[test]
    fn enriched_text_contains_original_semantic_content() {
        let artifact = medication(json!({"name": "Metformin", "dosage": "500mg"}));
        let enriched = enrich(&artifact, &[], &HashMap::new(), None);
        assert!(enriched.enriched_text.contains("Metformin"));
    }

    #[test]
    fn context_depth_matches_piecewise_table() {
        assert!((context_depth(0) - 0.0).abs() < f32::EPSILON);
        assert!((context_depth(1) - 0.5).abs() < f32::EPSILON);
        assert!((context_depth(2) - 0.7).abs() < f32::EPSILON);
        assert!((context_depth(4) - 0.9).abs() < f32::EPSILON);
        assert!((context_depth(9) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn re_enrichment_increments_version() {
        let artifact = medication(json!({"name": "Metformin"}));
        let enriched = enrich(&artifact, &[], &HashMap::new(), Some(3));
        assert_eq!(enriched.enrichment_version, 4);
    }

    #[test]
    fn mixed_extraction_methods_yield_hybrid() {
        let artifact = medication(json!({"name": "Metformin"}));
        let now = Utc::now();
        let rel_a = ClinicalRelationship {
            id: "r1".into(),
            created_at: now,
            updated_at: now,
            relationship_type: RelationshipType::MedicationIndication,
            source_artifact_id: "m1".into(),
            source_artifact_type: ArtifactType::Medication,
            source_entity_text: "Metformin".into(),
            target_artifact_id: "c1".into(),
            target_artifact_type: ArtifactType::Condition,
            target_entity_text: "Diabetes".into(),
            patient_id: "p1".into(),
            confidence_score: 1.0,
            extraction_method: ExtractionMethod::ExplicitApi,
            established_at: now,
            ended_at: None,
            clinical_notes: None,
            evidence_chunk_ids: vec![],
        };
        let mut rel_b = rel_a.clone();
        rel_b.id = "r2".into();
        rel_b.target_artifact_id = "c2".into();
        rel_b.extraction_method = ExtractionMethod::TemporalCorrelation;

        let enriched = enrich(&artifact, &[rel_a, rel_b], &HashMap::new(), None);
        assert_eq!(enriched.enrichment_method, EnrichmentMethod::Hybrid);
    }
}
