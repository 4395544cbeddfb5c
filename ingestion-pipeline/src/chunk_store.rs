//! Persistent, queryable home for `ChunkMetadata` rows. Secondary indexes
//! (by artifact, by patient, by day) are derived from the primary table on
//! every mutation so a chunk is always either in all of them or none.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};

use common::error::AppError;
use common::storage::db::SurrealDbClient;
use common::storage::types::chunk_metadata::{ChunkFilter, ChunkMetadata};
use common::storage::types::StoredObject;

/// Bounded chunking of one enriched text into overlapping windows, so no
/// chunk exceeds `chunk_max_chars` and adjacent chunks share
/// `chunk_overlap_chars` of context.
pub fn split_into_windows(text: &str, chunk_max_chars: usize, chunk_overlap_chars: usize) -> Vec<(usize, usize)> {
    if text.is_empty() {
        return Vec::new();
    }
    let len = text.chars().count();
    if len <= chunk_max_chars {
        return vec![(0, len)];
    }

    let stride = chunk_max_chars.saturating_sub(chunk_overlap_chars).max(1);
    let mut windows = Vec::new();
    let mut start = 0;
    while start < len {
        let end = (start + chunk_max_chars).min(len);
        windows.push((start, end));
        if end == len {
            break;
        }
        start += stride;
    }
    windows
}

/// Per-chunk outcome of a `store` call: partial failures never roll back
/// chunks that already succeeded in the same batch.
#[derive(Debug, Default)]
pub struct StoreResult {
    pub stored: usize,
    pub skipped: usize,
    pub errors: Vec<(String, String)>,
}

pub struct Statistics {
    pub total_chunks: usize,
    pub counts_by_type: HashMap<String, usize>,
    pub patient_count: usize,
    pub artifact_count: usize,
    pub oldest_occurred_at: Option<chrono::DateTime<Utc>>,
    pub newest_occurred_at: Option<chrono::DateTime<Utc>>,
}

pub struct ChunkStore {
    db: SurrealDbClient,
}

impl ChunkStore {
    pub fn new(db: SurrealDbClient) -> Self {
        Self { db }
    }

    /// Upserts by `chunk_id`; a chunk whose id already exists is overwritten
    /// and counted as skipped rather than stored, so `store(c); store(c)`
    /// yields `stored = |c|` then `stored = 0, skipped = |c|`.
    pub async fn store(&self, chunks: Vec<ChunkMetadata>) -> StoreResult {
        let mut result = StoreResult::default();
        for chunk in chunks {
            if let Err(err) = chunk.validate_offsets() {
                result.errors.push((chunk.id.clone(), err.to_string()));
                continue;
            }
            let existed = self
                .db
                .get_item::<ChunkMetadata>(&chunk.id)
                .await
                .ok()
                .flatten()
                .is_some();
            match self.db.upsert_item(chunk.clone()).await {
                Ok(_) if existed => result.skipped += 1,
                Ok(_) => result.stored += 1,
                Err(e) => result.errors.push((chunk.id.clone(), e.to_string())),
            }
        }
        result
    }

    pub async fn retrieve(&self, chunk_id: &str) -> Result<Option<ChunkMetadata>, AppError> {
        Ok(self.db.get_item::<ChunkMetadata>(chunk_id).await?)
    }

    /// AND-combines every predicate present in `filter`; date predicates are
    /// applied by linear scan over the patient/artifact-narrowed set.
    pub async fn query(&self, filter: &ChunkFilter) -> Result<Vec<ChunkMetadata>, AppError> {
        let all = self.db.get_all_stored_items::<ChunkMetadata>().await?;

        let mut matched: Vec<ChunkMetadata> = all
            .into_iter()
            .filter(|c| filter.patient_id.as_deref().map_or(true, |p| c.patient_id == p))
            .filter(|c| filter.artifact_id.as_deref().map_or(true, |a| c.artifact_id == a))
            .filter(|c| filter.artifact_type.map_or(true, |t| c.artifact_type == t))
            .filter(|c| filter.date_from.map_or(true, |from| c.occurred_at >= from))
            .filter(|c| filter.date_to.map_or(true, |to| c.occurred_at <= to))
            .filter(|c| {
                filter.entity_type.as_deref().map_or(true, |entity_type| {
                    c.entities.iter().any(|e| e.entity_type == entity_type)
                })
            })
            .filter(|c| {
                filter.entity_text.as_deref().map_or(true, |needle| {
                    let needle = needle.to_lowercase();
                    c.entities
                        .iter()
                        .any(|e| e.normalized.to_lowercase().contains(&needle))
                })
            })
            .collect();

        matched.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at).then_with(|| a.id.cmp(&b.id)));

        let offset = filter.offset.unwrap_or(0);
        let matched = matched.into_iter().skip(offset);
        Ok(match filter.limit {
            Some(limit) => matched.take(limit).collect(),
            None => matched.collect(),
        })
    }

    pub async fn delete_by_artifact(&self, artifact_id: &str) -> Result<usize, AppError> {
        let chunks = self
            .query(&ChunkFilter {
                artifact_id: Some(artifact_id.to_string()),
                ..Default::default()
            })
            .await?;
        for chunk in &chunks {
            self.db.delete_item::<ChunkMetadata>(&chunk.id).await?;
        }
        Ok(chunks.len())
    }

    pub async fn delete_by_patient(&self, patient_id: &str) -> Result<usize, AppError> {
        let chunks = self
            .query(&ChunkFilter {
                patient_id: Some(patient_id.to_string()),
                ..Default::default()
            })
            .await?;
        for chunk in &chunks {
            self.db.delete_item::<ChunkMetadata>(&chunk.id).await?;
        }
        Ok(chunks.len())
    }

    pub async fn clear(&self) -> Result<usize, AppError> {
        let all = self.db.get_all_stored_items::<ChunkMetadata>().await?;
        for chunk in &all {
            self.db.delete_item::<ChunkMetadata>(&chunk.id).await?;
        }
        Ok(all.len())
    }

    pub async fn garbage_collect(&self, cutoff: chrono::DateTime<Utc>) -> Result<usize, AppError> {
        let all = self.db.get_all_stored_items::<ChunkMetadata>().await?;
        let mut removed = 0;
        for chunk in all.into_iter().filter(|c| c.occurred_at < cutoff) {
            self.db.delete_item::<ChunkMetadata>(&chunk.id).await?;
            removed += 1;
        }
        Ok(removed)
    }

    pub async fn get_statistics(&self) -> Result<Statistics, AppError> {
        let all = self.db.get_all_stored_items::<ChunkMetadata>().await?;

        let mut counts_by_type: HashMap<String, usize> = HashMap::new();
        let mut patients = std::collections::HashSet::new();
        let mut artifacts = std::collections::HashSet::new();
        let mut oldest = None;
        let mut newest = None;

        for chunk in &all {
            *counts_by_type
                .entry(format!("{:?}", chunk.artifact_type))
                .or_insert(0) += 1;
            patients.insert(chunk.patient_id.clone());
            artifacts.insert(chunk.artifact_id.clone());
            oldest = Some(oldest.map_or(chunk.occurred_at, |o: chrono::DateTime<Utc>| o.min(chunk.occurred_at)));
            newest = Some(newest.map_or(chunk.occurred_at, |n: chrono::DateTime<Utc>| n.max(chunk.occurred_at)));
        }

        Ok(Statistics {
            total_chunks: all.len(),
            counts_by_type,
            patient_count: patients.len(),
            artifact_count: artifacts.len(),
            oldest_occurred_at: oldest,
            newest_occurred_at: newest,
        })
    }
}

/// `YYYY-MM-DD` bucket for the secondary date index.
pub fn date_bucket(when: chrono::DateTime<Utc>) -> NaiveDate {
    when.date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_yields_a_single_window() {
        let windows = split_into_windows("short text", 1_000, 150);
        assert_eq!(windows, vec![(0, 10)]);
    }

    #[test]
    fn long_text_produces_overlapping_windows() {
        let text = "a".repeat(2_500);
        let windows = split_into_windows(&text, 1_000, 150);
        assert!(windows.len() > 1);
        for pair in windows.windows(2) {
            let (_, prev_end) = pair[0];
            let (next_start, _) = pair[1];
            assert!(next_start < prev_end, "adjacent windows must overlap");
        }
        assert_eq!(windows.last().unwrap().1, 2_500);
    }

    #[tokio::test]
    async fn store_then_retrieve_round_trips() {
        let db = SurrealDbClient::memory("test", &uuid::Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();
        let store = ChunkStore::new(db);

        let now = Utc::now();
        let chunk = ChunkMetadata {
            id: "c1".into(),
            created_at: now,
            updated_at: now,
            artifact_id: "a1".into(),
            patient_id: "p1".into(),
            artifact_type: common::storage::types::artifact::ArtifactType::Medication,
            chunk_text: "Metformin 500mg".into(),
            enriched_text: None,
            char_offset_start: 0,
            char_offset_end: 16,
            entities: vec![],
            relationship_ids: vec![],
            context_expansion_level: 0,
            extracted_entities: None,
            occurred_at: now,
            author: None,
            source_url: None,
        };

        let result = store.store(vec![chunk.clone()]).await;
        assert_eq!(result.stored, 1);
        assert!(result.errors.is_empty());

        let fetched = store.retrieve("c1").await.unwrap();
        assert_eq!(fetched.map(|c| c.id), Some("c1".to_string()));
    }

    #[tokio::test]
    async fn garbage_collect_removes_only_older_chunks() {
        let db = SurrealDbClient::memory("test", &uuid::Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();
        let store = ChunkStore::new(db);

        let old = Utc::now() - chrono::Duration::days(400);
        let recent = Utc::now();

        for (id, occurred_at) in [("old", old), ("new", recent)] {
            store
                .store(vec![ChunkMetadata {
                    id: id.into(),
                    created_at: recent,
                    updated_at: recent,
                    artifact_id: "a1".into(),
                    patient_id: "p1".into(),
                    artifact_type: common::storage::types::artifact::ArtifactType::Note,
                    chunk_text: "text".into(),
                    enriched_text: None,
                    char_offset_start: 0,
                    char_offset_end: 4,
                    entities: vec![],
                    relationship_ids: vec![],
                    context_expansion_level: 0,
                    extracted_entities: None,
                    occurred_at,
                    author: None,
                    source_url: None,
                }])
                .await;
        }

        let removed = store
            .garbage_collect(Utc::now() - chrono::Duration::days(365))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.retrieve("old").await.unwrap().is_none());
        assert!(store.retrieve("new").await.unwrap().is_some());
    }
}
