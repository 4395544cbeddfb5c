mod state;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use state_machines::core::GuardError;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::{info, instrument, warn};

use common::collaborators::{EmrFetcher, Embedder, VectorIndex};
use common::config::AppConfig;
use common::error::AppError;
use common::storage::db::SurrealDbClient;
use common::storage::types::artifact::{Artifact, ArtifactType};
use common::storage::types::chunk_embedding::ChunkEmbedding;
use common::storage::types::chunk_metadata::{ChunkEntity, ChunkMetadata};
use common::storage::types::clinical_relationship::ClinicalRelationship;
use common::storage::types::enriched_artifact::EnrichedArtifact;
use common::storage::types::StoredObject;
use resilience::cache::embedding_cache_key;
use resilience::{CacheManager, CircuitBreakerManager};

use crate::chunk_store::{split_into_windows, ChunkStore};
use crate::entity_extractor;
use crate::enricher;
use crate::normalizer;
use crate::relationship_extractor;

use self::state::{ready, Enriched, IngestionMachine, Normalized, Persisted, Ready, RelationshipsExtracted};

const STORE_RELATIONSHIPS: &str = r#"
    BEGIN TRANSACTION;
    LET $rows = $rows;
    FOR $row IN $rows {
        UPDATE type::thing('clinical_relationships', $row.id) CONTENT $row;
    };
    COMMIT TRANSACTION;
"#;

/// Per-ingestion-run totals, surfaced to the worker loop's logs.
#[derive(Debug, Default)]
pub struct IngestionSummary {
    pub artifacts_normalized: usize,
    pub relationships_extracted: usize,
    pub artifacts_enriched: usize,
    pub chunks_stored: usize,
}

struct PipelineContext<'a> {
    db: &'a SurrealDbClient,
    config: &'a AppConfig,
    patient_id: String,
    artifacts: Vec<Artifact>,
    relationships: Vec<ClinicalRelationship>,
    enriched: Vec<EnrichedArtifact>,
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::Internal(format!(
        "invalid ingestion pipeline transition during {event}: {guard:?}"
    ))
}

#[instrument(level = "trace", skip_all, fields(patient_id = %ctx.patient_id))]
async fn normalize_stage(
    machine: IngestionMachine<(), Ready>,
    ctx: &mut PipelineContext<'_>,
    emr: &dyn EmrFetcher,
    breakers: &CircuitBreakerManager,
) -> Result<IngestionMachine<(), Normalized>, AppError> {
    let patient_id = ctx.patient_id.clone();

    let (medications, conditions, care_plans, notes, labs) = breakers
        .execute("emr", || async {
            let medications = emr.fetch_medications(&patient_id).await?;
            let conditions = emr.fetch_conditions(&patient_id).await?;
            let care_plans = emr.fetch_care_plans(&patient_id).await?;
            let notes = emr.fetch_notes(&patient_id).await?;
            let labs = emr.fetch_labs(&patient_id).await?;
            Ok((medications, conditions, care_plans, notes, labs))
        })
        .await?;

    let mut artifacts = Vec::new();
    for raw in &medications {
        push_or_warn(&mut artifacts, normalizer::normalize_medication(&ctx.patient_id, raw));
    }
    for raw in &conditions {
        push_or_warn(&mut artifacts, normalizer::normalize_condition(&ctx.patient_id, raw));
    }
    for raw in &care_plans {
        push_or_warn(&mut artifacts, normalizer::normalize_care_plan(&ctx.patient_id, raw));
    }
    for raw in &notes {
        push_or_warn(&mut artifacts, normalizer::normalize_note(&ctx.patient_id, raw));
    }
    for raw in &labs {
        push_or_warn(&mut artifacts, normalizer::normalize_lab(&ctx.patient_id, raw));
    }

    info!(
        patient_id = %ctx.patient_id,
        artifact_count = artifacts.len(),
        "normalized raw EMR records into artifacts"
    );
    ctx.artifacts = artifacts;

    machine.normalize().map_err(|(_, guard)| map_guard_error("normalize", &guard))
}

fn push_or_warn(out: &mut Vec<Artifact>, result: Result<Artifact, AppError>) {
    match result {
        Ok(artifact) => out.push(artifact),
        Err(err) => warn!(error = %err, "skipping a record that failed normalization"),
    }
}

#[instrument(level = "trace", skip_all, fields(patient_id = %ctx.patient_id))]
async fn link_stage(
    machine: IngestionMachine<(), Normalized>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), RelationshipsExtracted>, AppError> {
    let medications: Vec<Artifact> = ctx
        .artifacts
        .iter()
        .filter(|a| a.artifact_type == ArtifactType::Medication)
        .cloned()
        .collect();
    let conditions: Vec<Artifact> = ctx
        .artifacts
        .iter()
        .filter(|a| a.artifact_type == ArtifactType::Condition)
        .cloned()
        .collect();
    let care_plans: Vec<Artifact> = ctx
        .artifacts
        .iter()
        .filter(|a| a.artifact_type == ArtifactType::CarePlan)
        .cloned()
        .collect();

    let mut relationships = relationship_extractor::extract_medication_indications(&medications, &conditions);
    relationships.extend(relationship_extractor::extract_care_plan_conditions(&care_plans, &conditions));

    info!(
        patient_id = %ctx.patient_id,
        relationship_count = relationships.len(),
        "linked artifacts into clinical relationships"
    );
    ctx.relationships = relationships;

    machine.link().map_err(|(_, guard)| map_guard_error("link", &guard))
}

#[instrument(level = "trace", skip_all, fields(patient_id = %ctx.patient_id))]
async fn enrich_stage(
    machine: IngestionMachine<(), RelationshipsExtracted>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Enriched>, AppError> {
    let related_artifacts: HashMap<String, Artifact> =
        ctx.artifacts.iter().map(|a| (a.id.clone(), a.clone())).collect();

    let mut enriched = Vec::with_capacity(ctx.artifacts.len());
    for artifact in &ctx.artifacts {
        let previous_version = ctx
            .db
            .get_item::<EnrichedArtifact>(&EnrichedArtifact::upsert_id(&artifact.id))
            .await
            .ok()
            .flatten()
            .map(|e| e.enrichment_version);
        enriched.push(enricher::enrich(artifact, &ctx.relationships, &related_artifacts, previous_version));
    }

    info!(patient_id = %ctx.patient_id, enriched_count = enriched.len(), "enriched artifacts");
    ctx.enriched = enriched;

    machine.enrich().map_err(|(_, guard)| map_guard_error("enrich", &guard))
}

#[instrument(level = "trace", skip_all, fields(patient_id = %ctx.patient_id))]
async fn persist_stage(
    machine: IngestionMachine<(), Enriched>,
    ctx: &mut PipelineContext<'_>,
    embedder: &dyn Embedder,
    vector_index: &dyn VectorIndex,
    breakers: &CircuitBreakerManager,
    cache: &CacheManager,
) -> Result<(IngestionMachine<(), Persisted>, usize), AppError> {
    store_relationships(ctx.db, &ctx.relationships).await?;

    for enriched in &ctx.enriched {
        ctx.db.upsert_item(enriched.clone()).await?;
    }

    let chunk_store = ChunkStore::new(ctx.db.clone());
    let mut chunks = Vec::new();

    for enriched in &ctx.enriched {
        // Chunking runs over `original_text`, so `chunk_text` and its char
        // offsets stay grounded in the artifact's raw content; the enriched
        // artifact's inlined-context text is attached whole to every chunk
        // of that artifact as its search-time `enriched_text`, since the
        // enrichment adds context sentences rather than rewriting the
        // original window-by-window.
        let text = &enriched.original_text;
        let windows = split_into_windows(text, ctx.config.chunk_max_chars, ctx.config.chunk_overlap_chars);
        let chars: Vec<char> = text.chars().collect();
        let enriched_text = (enriched.enriched_text != enriched.original_text).then(|| enriched.enriched_text.clone());

        for (start, end) in windows {
            let chunk_text: String = chars[start..end].iter().collect();
            let entities = entity_extractor::extract(&chunk_text);
            let now = chrono::Utc::now();
            let chunk_id = format!("{}-{start}-{end}", enriched.artifact_id);

            let chunk = ChunkMetadata {
                id: chunk_id.clone(),
                created_at: now,
                updated_at: now,
                artifact_id: enriched.artifact_id.clone(),
                patient_id: enriched.patient_id.clone(),
                artifact_type: enriched.artifact_type,
                chunk_text: chunk_text.clone(),
                enriched_text: enriched_text.clone(),
                char_offset_start: start,
                char_offset_end: end,
                entities: entities
                    .iter()
                    .map(|e| ChunkEntity {
                        text: e.text.clone(),
                        entity_type: format!("{:?}", e.entity_type),
                        start: e.start,
                        end: e.end,
                        normalized: e.normalized.clone(),
                    })
                    .collect(),
                relationship_ids: enriched.related_artifact_ids.clone(),
                context_expansion_level: 0,
                extracted_entities: Some(enriched.extracted_entities.clone()),
                occurred_at: enriched.occurred_at,
                author: None,
                source_url: None,
            };

            let embed_text = chunk.searchable_text().to_string();
            let embedding = embed_with_cache(&embed_text, embedder, breakers, cache).await?;
            // Validate against the index's dimension before the row is durably
            // written: a mismatch must never leave a corrupt `chunk_embedding`
            // row committed.
            vector_index.add(&chunk_id, embedding.clone()).await?;
            ctx.db
                .upsert_item(ChunkEmbedding {
                    id: chunk_id.clone(),
                    created_at: now,
                    updated_at: now,
                    chunk_id: chunk_id.clone(),
                    patient_id: enriched.patient_id.clone(),
                    embedding,
                })
                .await?;

            chunks.push(chunk);
        }
    }

    let result = chunk_store.store(chunks).await;
    if !result.errors.is_empty() {
        warn!(patient_id = %ctx.patient_id, errors = ?result.errors, "some chunks failed to persist");
    }
    let chunk_count = result.stored + result.skipped;

    info!(patient_id = %ctx.patient_id, chunk_count, "persisted ingestion results");

    let machine = machine.persist().map_err(|(_, guard)| map_guard_error("persist", &guard))?;
    Ok((machine, chunk_count))
}

async fn embed_with_cache(
    text: &str,
    embedder: &dyn Embedder,
    breakers: &CircuitBreakerManager,
    cache: &CacheManager,
) -> Result<Vec<f32>, AppError> {
    let key = embedding_cache_key(text.trim());
    if let Some(cached) = cache.embeddings.get(&key).await {
        return Ok(cached);
    }
    let vector = breakers.execute("embedder", || embedder.embed(text)).await?;
    cache.embeddings.put(key, vector.clone()).await;
    Ok(vector)
}

async fn store_relationships(db: &SurrealDbClient, relationships: &[ClinicalRelationship]) -> Result<(), AppError> {
    if relationships.is_empty() {
        return Ok(());
    }

    let rows = Arc::new(relationships.to_vec());
    let retry_strategy = ExponentialBackoff::from_millis(50).map(jitter).take(3);

    Retry::spawn(retry_strategy, || async {
        db.client
            .query(STORE_RELATIONSHIPS)
            .bind(("rows", rows.clone()))
            .await
            .map_err(AppError::from)
    })
    .await?;
    Ok(())
}

/// Drives one patient's records through normalize -> link -> enrich ->
/// persist, timing each stage the way the rest of the pack's pipelines do.
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    emr: Arc<dyn EmrFetcher>,
    embedder: Arc<dyn Embedder>,
    vector_index: Arc<dyn VectorIndex>,
    circuit_breakers: Arc<CircuitBreakerManager>,
    cache: Arc<CacheManager>,
    config: AppConfig,
}

impl IngestionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        emr: Arc<dyn EmrFetcher>,
        embedder: Arc<dyn Embedder>,
        vector_index: Arc<dyn VectorIndex>,
        circuit_breakers: Arc<CircuitBreakerManager>,
        cache: Arc<CacheManager>,
        config: AppConfig,
    ) -> Self {
        Self {
            db,
            emr,
            embedder,
            vector_index,
            circuit_breakers,
            cache,
            config,
        }
    }

    #[instrument(level = "info", skip(self), fields(patient_id = %patient_id))]
    pub async fn process_patient(&self, patient_id: &str) -> Result<IngestionSummary, AppError> {
        let mut ctx = PipelineContext {
            db: &self.db,
            config: &self.config,
            patient_id: patient_id.to_string(),
            artifacts: Vec::new(),
            relationships: Vec::new(),
            enriched: Vec::new(),
        };

        let pipeline_started = Instant::now();
        let machine = ready();

        let machine = normalize_stage(machine, &mut ctx, self.emr.as_ref(), &self.circuit_breakers).await?;
        let machine = link_stage(machine, &mut ctx).await?;
        let machine = enrich_stage(machine, &mut ctx).await?;
        let (_machine, chunk_count) = persist_stage(
            machine,
            &mut ctx,
            self.embedder.as_ref(),
            self.vector_index.as_ref(),
            &self.circuit_breakers,
            &self.cache,
        )
        .await?;

        info!(
            patient_id = %patient_id,
            total_ms = pipeline_started.elapsed().as_millis() as u64,
            "ingestion pipeline finished"
        );

        Ok(IngestionSummary {
            artifacts_normalized: ctx.artifacts.len(),
            relationships_extracted: ctx.relationships.len(),
            artifacts_enriched: ctx.enriched.len(),
            chunks_stored: chunk_count,
        })
    }
}
