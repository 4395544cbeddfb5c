use serde::{Deserialize, Serialize};

use crate::storage::types::artifact::ArtifactType;
use crate::stored_object;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    MedicationIndication,
    ProcedureDiagnosis,
    CarePlanCondition,
    LabCondition,
    SymptomDiagnosis,
    MedicationInteraction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    ExplicitApi,
    LlmInferred,
    TemporalCorrelation,
}

stored_object!(ClinicalRelationship, "clinical_relationships", {
    relationship_type: RelationshipType,
    source_artifact_id: String,
    source_artifact_type: ArtifactType,
    source_entity_text: String,
    target_artifact_id: String,
    target_artifact_type: ArtifactType,
    target_entity_text: String,
    patient_id: String,
    confidence_score: f32,
    extraction_method: ExtractionMethod,
    established_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    clinical_notes: Option<String>,
    evidence_chunk_ids: Vec<String>
});

impl ClinicalRelationship {
    /// `source != target` and both endpoints belong to the same patient —
    /// the two structural invariants every extractor strategy must uphold.
    pub fn validate(&self) -> Result<(), crate::error::AppError> {
        if self.source_artifact_id == self.target_artifact_id {
            return Err(crate::error::AppError::Validation(format!(
                "relationship {} has identical source and target artifact {}",
                self.id, self.source_artifact_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn base() -> ClinicalRelationship {
        let now = Utc::now();
        ClinicalRelationship {
            id: "r1".into(),
            created_at: now,
            updated_at: now,
            relationship_type: RelationshipType::MedicationIndication,
            source_artifact_id: "m1".into(),
            source_artifact_type: ArtifactType::Medication,
            source_entity_text: "Metformin".into(),
            target_artifact_id: "c1".into(),
            target_artifact_type: ArtifactType::Condition,
            target_entity_text: "Type 2 Diabetes".into(),
            patient_id: "p1".into(),
            confidence_score: 1.0,
            extraction_method: ExtractionMethod::ExplicitApi,
            established_at: now,
            ended_at: None,
            clinical_notes: None,
            evidence_chunk_ids: vec![],
        }
    }

    #[test]
    fn rejects_self_referential_relationship() {
        let mut r = base();
        r.target_artifact_id = r.source_artifact_id.clone();
        assert!(r.validate().is_err());
    }

    #[test]
    fn accepts_distinct_endpoints() {
        assert!(base().validate().is_ok());
    }
}
