use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stored_object;
use crate::storage::types::artifact::ArtifactType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentMethod {
    ExplicitApi,
    LlmInferred,
    TemporalCorrelation,
    Hybrid,
}

stored_object!(EnrichedArtifact, "enriched_artifacts", {
    artifact_id: String,
    patient_id: String,
    artifact_type: ArtifactType,
    occurred_at: DateTime<Utc>,
    original_text: String,
    enriched_text: String,
    extracted_entities: Value,
    clinical_context: Value,
    related_artifact_ids: Vec<String>,
    relationship_summary: String,
    enrichment_version: u32,
    enriched_at: DateTime<Utc>,
    enrichment_method: EnrichmentMethod,
    completeness_score: f32,
    context_depth_score: f32
});

impl EnrichedArtifact {
    /// The primary key for this table is the artifact it was derived from;
    /// upserting on re-enrichment means constructing with `id == artifact_id`.
    pub fn upsert_id(artifact_id: &str) -> String {
        artifact_id.to_string()
    }
}
