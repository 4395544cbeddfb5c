//! Expands an initial candidate set along `relationship_ids` up to
//! `max_hops` hops, re-ranking with a hop-distance penalty and an
//! enrichment bonus.

use std::collections::HashSet;

use common::error::AppError;
use common::storage::types::chunk_metadata::ChunkMetadata;
use ingestion_pipeline::chunk_store::ChunkStore;

use crate::retriever::build_candidate;
use crate::types::RetrievalCandidate;

fn clamp01(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

/// `0.4*has(enriched_text) + 0.3*has(extracted_entities) + min(0.3, 0.05*|relationship_ids|)`.
fn enrichment_score(chunk: &ChunkMetadata) -> f32 {
    let has_enriched = f32::from(chunk.enriched_text.is_some());
    let has_entities = f32::from(chunk.extracted_entities.is_some());
    let relationship_bonus = (0.05 * chunk.relationship_ids.len() as f32).min(0.3);
    0.4 * has_enriched + 0.3 * has_entities + relationship_bonus
}

fn final_score(base_score: f32, hop_distance: u8, enrichment: f32, relationship_boost: f32) -> f32 {
    let boost = if hop_distance > 0 { relationship_boost } else { 0.0 };
    clamp01(base_score - 0.1 * f32::from(hop_distance) + 0.2 * enrichment + boost)
}

/// Extends an initial candidate set with up to `max_hops` rounds of
/// relationship-linked expansion, then re-ranks and truncates to `top_k`.
pub async fn expand(
    initial: Vec<RetrievalCandidate>,
    chunk_store: &ChunkStore,
    max_hops: u8,
    relationship_boost: f32,
    query_text: &str,
    top_k: usize,
) -> Result<Vec<RetrievalCandidate>, AppError> {
    let mut visited: HashSet<String> = initial.iter().map(|c| c.chunk_id.clone()).collect();
    let mut frontier: Vec<(RetrievalCandidate, Vec<String>)> =
        initial.into_iter().map(|c| (c, Vec::new())).collect();
    let mut all: Vec<(RetrievalCandidate, f32)> = Vec::new();

    for candidate in &frontier {
        let (candidate, _) = candidate;
        let chunk = chunk_store.retrieve(&candidate.chunk_id).await?;
        let enrichment = chunk.as_ref().map(enrichment_score).unwrap_or(0.0);
        let score = final_score(candidate.score, candidate.hop_distance, enrichment, relationship_boost);
        all.push((candidate.clone(), score));
    }

    for hop in 1..=max_hops {
        let mut next_frontier = Vec::new();

        for (candidate, path) in &frontier {
            let Some(chunk) = chunk_store.retrieve(&candidate.chunk_id).await? else {
                continue;
            };
            for relationship_id in &chunk.relationship_ids {
                let linked = chunk_store
                    .query(&common::storage::types::chunk_metadata::ChunkFilter {
                        patient_id: Some(candidate.patient_id.clone()),
                        ..Default::default()
                    })
                    .await?
                    .into_iter()
                    .filter(|c| c.relationship_ids.contains(relationship_id) && !visited.contains(&c.id));

                for linked_chunk in linked {
                    visited.insert(linked_chunk.id.clone());
                    let mut relationship_path = path.clone();
                    relationship_path.push(relationship_id.clone());

                    let decayed_base = candidate.score * 0.8;
                    let mut next_candidate = build_candidate(&linked_chunk, decayed_base, query_text, hop);
                    next_candidate.relationship_path = relationship_path.clone();

                    let enrichment = enrichment_score(&linked_chunk);
                    let score = final_score(decayed_base, hop, enrichment, relationship_boost);

                    next_frontier.push((next_candidate.clone(), relationship_path));
                    all.push((next_candidate, score));
                }
            }
        }

        frontier = next_frontier;
        if frontier.is_empty() {
            break;
        }
    }

    let mut scored: Vec<RetrievalCandidate> = all
        .into_iter()
        .map(|(mut candidate, score)| {
            candidate.score = score;
            candidate
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.hop_distance.cmp(&b.hop_distance))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    scored.truncate(top_k);
    for (rank, candidate) in scored.iter_mut().enumerate() {
        candidate.rank = rank;
    }

    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::storage::types::artifact::ArtifactType;

    fn chunk(id: &str, relationship_ids: Vec<String>) -> ChunkMetadata {
        let now = Utc::now();
        ChunkMetadata {
            id: id.into(),
            created_at: now,
            updated_at: now,
            artifact_id: format!("a-{id}"),
            patient_id: "p1".into(),
            artifact_type: ArtifactType::Medication,
            chunk_text: format!("chunk {id}"),
            enriched_text: Some(format!("enriched {id}")),
            char_offset_start: 0,
            char_offset_end: 4,
            entities: vec![],
            relationship_ids,
            context_expansion_level: 0,
            extracted_entities: None,
            occurred_at: now,
            author: None,
            source_url: None,
        }
    }

    #[tokio::test]
    async fn one_hop_expansion_scores_strictly_below_the_seed() {
        let db = common::storage::db::SurrealDbClient::memory("test", &uuid::Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();
        let store = ChunkStore::new(db);

        store.store(vec![chunk("m1", vec!["rel-1".to_string()])]).await;
        store.store(vec![chunk("c1", vec!["rel-1".to_string()])]).await;

        let seed = build_candidate(&store.retrieve("m1").await.unwrap().unwrap(), 0.9, "query", 0);
        let expanded = expand(vec![seed.clone()], &store, 1, 0.3, "query", 10)
            .await
            .unwrap();

        let hop = expanded.iter().find(|c| c.chunk_id == "c1").unwrap();
        assert!(hop.score < seed.score);
        assert_eq!(hop.hop_distance, 1);
    }

    #[tokio::test]
    async fn zero_max_hops_returns_only_initial_candidates() {
        let db = common::storage::db::SurrealDbClient::memory("test", &uuid::Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();
        let store = ChunkStore::new(db);
        store.store(vec![chunk("m1", vec![])]).await;

        let seed = build_candidate(&store.retrieve("m1").await.unwrap().unwrap(), 0.9, "query", 0);
        let expanded = expand(vec![seed], &store, 0, 0.3, "query", 10).await.unwrap();
        assert_eq!(expanded.len(), 1);
    }
}
