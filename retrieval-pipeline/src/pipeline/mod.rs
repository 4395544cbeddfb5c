use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, instrument, warn};

use common::collaborators::{Generator, GenerationOptions};
use common::config::AppConfig;
use common::error::AppError;
use common::model::query::StructuredQuery;
use common::model::response::{ErrorResponse, Provenance, StructuredExtraction, UiResponse};
use ingestion_pipeline::chunk_store::ChunkStore;
use resilience::CircuitBreakerManager;

use crate::confidence::{self, ExtractionSignal};
use crate::highlight;
use crate::multi_hop;
use crate::provenance;
use crate::response_builder::{self, ResponseInputs};
use crate::retriever::Retriever;
use crate::types::RetrievalCandidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    MetadataFilter,
    VectorSearch,
    MultiHop,
    Generate,
    Confidence,
    Provenance,
    Assemble,
}

/// Per-stage wall-clock durations for one query, surfaced in the
/// response's `audit.timestamps`.
#[derive(Debug, Default)]
pub struct PipelineStageTimings {
    timings: Vec<(StageKind, Duration)>,
}

impl PipelineStageTimings {
    pub fn record(&mut self, kind: StageKind, duration: Duration) {
        self.timings.push((kind, duration));
    }

    pub fn get_stage_ms(&self, kind: StageKind) -> u64 {
        self.timings
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, d)| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }

    fn into_named(self, started_at: chrono::DateTime<Utc>) -> Vec<(String, chrono::DateTime<Utc>)> {
        let mut cursor = started_at;
        self.timings
            .into_iter()
            .map(|(kind, duration)| {
                cursor += chrono::Duration::from_std(duration).unwrap_or_default();
                (format!("{kind:?}"), cursor)
            })
            .collect()
    }
}

/// Drives one query through retrieve -> multi-hop expand -> generate ->
/// confidence -> provenance -> assemble, per the data-flow described for
/// the retrieval side of the system.
pub struct RetrievalPipeline {
    retriever: Retriever,
    chunk_store: ChunkStore,
    generator: Arc<dyn Generator>,
    breakers: Arc<CircuitBreakerManager>,
    config: AppConfig,
}

impl RetrievalPipeline {
    pub fn new(
        retriever: Retriever,
        chunk_store: ChunkStore,
        generator: Arc<dyn Generator>,
        breakers: Arc<CircuitBreakerManager>,
        config: AppConfig,
    ) -> Self {
        Self {
            retriever,
            chunk_store,
            generator,
            breakers,
            config,
        }
    }

    #[instrument(level = "info", skip(self, query), fields(query_id = %query.query_id))]
    pub async fn answer(&self, query: StructuredQuery) -> Result<UiResponse, ErrorResponse> {
        let started = Instant::now();
        let mut timings = PipelineStageTimings::default();

        match self.answer_inner(&query, &mut timings, started).await {
            Ok(response) => Ok(response),
            Err(err) => {
                warn!(error = %err, "retrieval pipeline failed, emitting error response");
                Err(response_builder::build_error(
                    query.query_id.clone(),
                    query.processed_at,
                    &err,
                ))
            }
        }
    }

    async fn answer_inner(
        &self,
        query: &StructuredQuery,
        timings: &mut PipelineStageTimings,
        started: Instant,
    ) -> Result<UiResponse, AppError> {
        let top_k = self.config.retriever_topk_default.max(1);

        let retrieve_started = Instant::now();
        let retrieval = self.retriever.retrieve(query, top_k).await?;
        timings.record(StageKind::MetadataFilter, Duration::from_millis(0));
        timings.record(StageKind::VectorSearch, retrieve_started.elapsed());

        let hop_started = Instant::now();
        let max_hops = self.config.retriever_multihop_max.min(2);
        let candidates = multi_hop::expand(
            retrieval.candidates,
            &self.chunk_store,
            max_hops,
            self.config.retriever_relationship_boost,
            &query.original_query,
            top_k,
        )
        .await?;
        timings.record(StageKind::MultiHop, hop_started.elapsed());

        let generate_started = Instant::now();
        let prompt = build_prompt(query, &candidates);
        let generation = self
            .breakers
            .execute("llm", || {
                let generator = self.generator.clone();
                let prompt = prompt.clone();
                async move { generator.generate(&prompt, GenerationOptions::default()).await }
            })
            .await?;
        timings.record(StageKind::Generate, generate_started.elapsed());

        let provenance_started = Instant::now();
        let (prov, structured_extractions, extraction_signals) =
            self.build_citations(&candidates, &query.original_query).await?;
        timings.record(StageKind::Provenance, provenance_started.elapsed());

        let confidence_started = Instant::now();
        let confidence = confidence::score(&candidates, &extraction_signals);
        timings.record(StageKind::Confidence, confidence_started.elapsed());

        timings.record(StageKind::Assemble, Duration::from_millis(0));
        let known_chunk_ids: HashSet<String> = candidates.iter().map(|c| c.chunk_id.clone()).collect();
        let inputs = ResponseInputs {
            query_id: query.query_id.clone(),
            patient_id: query.patient_id.clone(),
            short_answer: first_sentence(&generation.text),
            detailed_summary: generation.text,
            structured_extractions,
            provenance: prov,
            confidence,
            query_timestamp: query.processed_at,
            total_time_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            model_used: "configured-generator".to_string(),
            components_executed: vec![
                "metadata_filter".into(),
                "vector_index".into(),
                "multi_hop".into(),
                "generator".into(),
                "confidence_scorer".into(),
                "provenance_formatter".into(),
            ],
            timestamps: timings_to_vec(timings, query.processed_at),
        };
        let response = response_builder::build_success(inputs, &known_chunk_ids)?;

        info!(query_id = %query.query_id, candidate_count = candidates.len(), "retrieval pipeline finished");
        Ok(response)
    }

    /// Builds provenance and structured extractions together: both are
    /// always anchored to `chunk_text` (never `enriched_text`), per the
    /// citation/search boundary this repo draws, so each candidate's chunk
    /// is fetched once and its highlight offsets are computed against the
    /// un-enriched text regardless of what the earlier retrieval/generation
    /// stages searched against.
    async fn build_citations(
        &self,
        candidates: &[RetrievalCandidate],
        query_text: &str,
    ) -> Result<(Vec<Provenance>, Vec<StructuredExtraction>, Vec<ExtractionSignal>), AppError> {
        let mut provenance_out = Vec::with_capacity(candidates.len());
        let mut extractions = Vec::with_capacity(candidates.len());
        let mut signals = Vec::with_capacity(candidates.len());
        let now = Utc::now();

        for candidate in candidates {
            let Some(chunk) = self.chunk_store.retrieve(&candidate.chunk_id).await? else {
                continue;
            };

            let citation_highlights = highlight::generate(&chunk.chunk_text, query_text, &chunk.entities);
            let offsets = citation_highlights
                .first()
                .map_or([0, chunk.chunk_text.chars().count()], |h| [h.start, h.end]);

            provenance_out.push(provenance::format(&chunk, offsets, candidate.score, now));

            let extraction_provenance = provenance::extraction_provenance(&chunk, offsets);
            signals.push(ExtractionSignal {
                has_provenance: true,
                has_char_offsets: true,
            });
            extractions.push(StructuredExtraction {
                extraction_type: candidate
                    .metadata
                    .get("artifact_type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
                content: candidate.snippet.clone(),
                provenance: Some(extraction_provenance),
            });
        }

        Ok((provenance_out, extractions, signals))
    }
}

fn timings_to_vec(
    timings: PipelineStageTimings,
    started_at: chrono::DateTime<Utc>,
) -> Vec<(String, chrono::DateTime<Utc>)> {
    timings.into_named(started_at)
}

fn build_prompt(query: &StructuredQuery, candidates: &[RetrievalCandidate]) -> String {
    let mut prompt = format!("Question: {}\n\nContext:\n", query.original_query);
    for candidate in candidates {
        prompt.push_str("- ");
        prompt.push_str(&candidate.snippet);
        prompt.push('\n');
    }
    prompt
}

fn first_sentence(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.find(['.', '!', '?']) {
        Some(idx) => trimmed[..=idx].to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sentence_stops_at_terminal_punctuation() {
        assert_eq!(first_sentence("Hello there. More text."), "Hello there.");
    }

    #[test]
    fn first_sentence_falls_back_to_whole_text() {
        assert_eq!(first_sentence("no terminator here"), "no terminator here");
    }
}
