use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::types::artifact::ArtifactType;
use crate::stored_object;

/// An entity recognized inside a chunk's text, with offsets relative to the
/// chunk (not the source artifact).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkEntity {
    pub text: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub start: usize,
    pub end: usize,
    pub normalized: String,
}

stored_object!(ChunkMetadata, "chunk_metadata", {
    artifact_id: String,
    patient_id: String,
    artifact_type: ArtifactType,
    chunk_text: String,
    enriched_text: Option<String>,
    char_offset_start: usize,
    char_offset_end: usize,
    entities: Vec<ChunkEntity>,
    relationship_ids: Vec<String>,
    context_expansion_level: u8,
    extracted_entities: Option<Value>,
    occurred_at: DateTime<Utc>,
    author: Option<String>,
    source_url: Option<String>
});

impl ChunkMetadata {
    /// Text search and retrieval run against `enriched_text` when present,
    /// falling back to `chunk_text` — citations always use `chunk_text`.
    pub fn searchable_text(&self) -> &str {
        self.enriched_text.as_deref().unwrap_or(&self.chunk_text)
    }

    /// `0 <= start < end <= len(artifact text)` — checked against the
    /// chunk's own text length since the artifact's full text is not
    /// retained alongside the chunk.
    pub fn validate_offsets(&self) -> Result<(), crate::error::AppError> {
        if self.char_offset_start >= self.char_offset_end {
            return Err(crate::error::AppError::Validation(format!(
                "chunk {} has non-increasing offsets [{}, {})",
                self.id, self.char_offset_start, self.char_offset_end
            )));
        }
        Ok(())
    }
}

/// AND-combined predicate set for `ChunkStore::query`.
#[derive(Debug, Clone, Default)]
pub struct ChunkFilter {
    pub patient_id: Option<String>,
    pub artifact_id: Option<String>,
    pub artifact_type: Option<ArtifactType>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub entity_type: Option<String>,
    pub entity_text: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ChunkMetadata {
        let now = Utc::now();
        ChunkMetadata {
            id: "c1".into(),
            created_at: now,
            updated_at: now,
            artifact_id: "m1".into(),
            patient_id: "p1".into(),
            artifact_type: ArtifactType::Medication,
            chunk_text: "Metformin 500mg BID".into(),
            enriched_text: None,
            char_offset_start: 0,
            char_offset_end: 20,
            entities: vec![],
            relationship_ids: vec![],
            context_expansion_level: 0,
            extracted_entities: None,
            occurred_at: now,
            author: None,
            source_url: None,
        }
    }

    #[test]
    fn searchable_text_prefers_enriched() {
        let mut c = base();
        c.enriched_text = Some("Metformin 500mg BID for Type 2 Diabetes".into());
        assert_eq!(c.searchable_text(), "Metformin 500mg BID for Type 2 Diabetes");
    }

    #[test]
    fn searchable_text_falls_back_to_chunk_text() {
        assert_eq!(base().searchable_text(), "Metformin 500mg BID");
    }

    #[test]
    fn rejects_non_increasing_offsets() {
        let mut c = base();
        c.char_offset_end = c.char_offset_start;
        assert!(c.validate_offsets().is_err());
    }
}
