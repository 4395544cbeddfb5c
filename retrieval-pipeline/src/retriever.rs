//! The base (single-hop) retrieval stage: embed, metadata-prefilter,
//! nearest-neighbor search, then snippet and highlight each candidate.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;

use common::collaborators::{Embedder, VectorIndex};
use common::error::AppError;
use common::model::query::StructuredQuery;
use common::storage::types::chunk_metadata::{ChunkFilter, ChunkMetadata};
use ingestion_pipeline::chunk_store::ChunkStore;
use resilience::cache::embedding_cache_key;
use resilience::{CacheManager, CircuitBreakerManager};

use crate::highlight;
use crate::metadata_filter::MetadataFilter;
use crate::types::{RetrievalCandidate, RetrievalResult};

pub struct Retriever {
    chunk_store: ChunkStore,
    embedder: Arc<dyn Embedder>,
    vector_index: Arc<dyn VectorIndex>,
    breakers: Arc<CircuitBreakerManager>,
    cache: Arc<CacheManager>,
}

impl Retriever {
    pub fn new(
        chunk_store: ChunkStore,
        embedder: Arc<dyn Embedder>,
        vector_index: Arc<dyn VectorIndex>,
        breakers: Arc<CircuitBreakerManager>,
        cache: Arc<CacheManager>,
    ) -> Self {
        Self {
            chunk_store,
            embedder,
            vector_index,
            breakers,
            cache,
        }
    }

    /// Runs the §4.5 algorithm: embed, prefilter by metadata, nearest-neighbor
    /// search over `N = max(topK*3, 30)` restricted to the prefiltered set,
    /// then build snippets and highlights for the top `top_k`.
    pub async fn retrieve(
        &self,
        query: &StructuredQuery,
        top_k: usize,
    ) -> Result<RetrievalResult, AppError> {
        let started = Instant::now();

        let working_set = self
            .chunk_store
            .query(&ChunkFilter {
                patient_id: Some(query.patient_id.clone()),
                ..Default::default()
            })
            .await?;
        let total_searched = working_set.len();

        let filter = MetadataFilter::build(&working_set);
        let candidate_ids = filter.apply_filters_with_indexes(query);
        let filtered_count = candidate_ids.len();

        if candidate_ids.is_empty() {
            return Ok(RetrievalResult {
                query_id: query.query_id.clone(),
                candidates: Vec::new(),
                total_searched,
                filtered_count,
                retrieval_time_ms: elapsed_ms(started),
            });
        }

        let query_vector = self.embed_query(&query.original_query).await?;

        let n = (top_k.saturating_mul(3)).max(30);
        let vector_filter = common::collaborators::VectorFilter {
            candidate_ids: Some(candidate_ids),
        };
        let matches = self
            .vector_index
            .search(&query_vector, n, &vector_filter)
            .await?;

        let chunks_by_id: std::collections::HashMap<String, ChunkMetadata> = working_set
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        let mut candidates = Vec::with_capacity(matches.len());
        for matched in matches {
            let Some(chunk) = chunks_by_id.get(&matched.id) else {
                continue;
            };
            candidates.push(build_candidate(chunk, matched.score, &query.original_query, 0));
        }

        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(top_k);
        for (rank, candidate) in candidates.iter_mut().enumerate() {
            candidate.rank = rank;
        }

        Ok(RetrievalResult {
            query_id: query.query_id.clone(),
            candidates,
            total_searched,
            filtered_count,
            retrieval_time_ms: elapsed_ms(started),
        })
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let key = embedding_cache_key(text.trim());
        if let Some(cached) = self.cache.embeddings.get(&key).await {
            return Ok(cached);
        }
        let embedder = self.embedder.clone();
        let text = text.to_string();
        let vector = self
            .breakers
            .execute("embed", || {
                let embedder = embedder.clone();
                let text = text.clone();
                async move { embedder.embed(&text).await }
            })
            .await?;
        self.cache.embeddings.put(key, vector.clone()).await;
        Ok(vector)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Builds one candidate's snippet (centered on the first highlight, 200
/// chars wide) and highlight list against `chunk.searchable_text()`.
pub fn build_candidate(chunk: &ChunkMetadata, score: f32, query_text: &str, hop_distance: u8) -> RetrievalCandidate {
    let text = chunk.searchable_text();
    let highlights = highlight::generate(text, query_text, &chunk.entities);
    let snippet = center_snippet(text, &highlights);

    RetrievalCandidate {
        chunk_id: chunk.id.clone(),
        artifact_id: chunk.artifact_id.clone(),
        patient_id: chunk.patient_id.clone(),
        score,
        snippet,
        highlights,
        metadata: json!({
            "artifact_type": format!("{:?}", chunk.artifact_type),
            "occurred_at": chunk.occurred_at,
            "author": chunk.author,
        }),
        rank: 0,
        hop_distance,
        relationship_path: Vec::new(),
    }
}

const SNIPPET_WINDOW: usize = 200;

fn center_snippet(text: &str, highlights: &[highlight::Highlight]) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return String::new();
    }

    let center = highlights.first().map_or(0, |h| h.start.min(chars.len().saturating_sub(1)));
    let half = SNIPPET_WINDOW / 2;
    let start = center.saturating_sub(half);
    let end = (start + SNIPPET_WINDOW).min(chars.len());
    let start = end.saturating_sub(SNIPPET_WINDOW).min(start);

    chars[start..end].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::storage::types::artifact::ArtifactType;

    fn chunk(text: &str) -> ChunkMetadata {
        let now = Utc::now();
        ChunkMetadata {
            id: "c1".into(),
            created_at: now,
            updated_at: now,
            artifact_id: "a1".into(),
            patient_id: "p1".into(),
            artifact_type: ArtifactType::Medication,
            chunk_text: text.into(),
            enriched_text: None,
            char_offset_start: 0,
            char_offset_end: text.chars().count(),
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
    fn snippet_centers_on_first_highlight() {
        let text = format!("{}Metformin{}", "x".repeat(500), "y".repeat(500));
        let c = chunk(&text);
        let candidate = build_candidate(&c, 0.9, "metformin", 0);
        assert!(candidate.snippet.contains("Metformin"));
        assert!(candidate.snippet.len() <= SNIPPET_WINDOW + 16);
    }

    #[test]
    fn empty_text_yields_empty_snippet() {
        let c = chunk("");
        let candidate = build_candidate(&c, 0.0, "metformin", 0);
        assert!(candidate.snippet.is_empty());
    }
}
