//! Owns every long-lived component the binaries share: storage, caching,
//! circuit breaking, the two pipelines, conversation sessions, and the
//! audit trail. `Services::build` is the single place that knows how these
//! pieces fit together.

use std::sync::Arc;
use std::time::Duration;

use common::collaborators::{Embedder, EmrFetcher, Generator, VectorIndex};
use common::config::AppConfig;
use common::error::AppError;
use common::storage::db::SurrealDbClient;
use ingestion_pipeline::chunk_store::ChunkStore;
use ingestion_pipeline::pipeline::IngestionPipeline;
use resilience::{CacheManager, CircuitBreakerManager};
use retrieval_pipeline::{RetrievalPipeline, Retriever, SurrealVectorIndex};

use crate::collaborators::{UnconfiguredEmbedder, UnconfiguredEmr, UnconfiguredGenerator};

pub struct Services {
    pub cache: Arc<CacheManager>,
    pub breakers: Arc<CircuitBreakerManager>,
    pub ingestion: Arc<IngestionPipeline>,
    pub retrieval: RetrievalPipeline,
    pub conversation: conversation::ConversationManager,
    pub audit_logger: audit::AuditLogger,
    pub history: audit::ConversationHistory,
}

impl Services {
    pub async fn build(db: SurrealDbClient, config: AppConfig, embedding_dimension: usize) -> Result<Self, AppError> {
        let breakers = Arc::new(CircuitBreakerManager::new(
            config.cb_failure_threshold,
            Duration::from_millis(config.cb_reset_timeout_ms),
        ));
        let cache = Arc::new(CacheManager::new(
            config.embed_cache_size,
            Duration::from_millis(config.embed_cache_ttl_ms),
            config.query_cache_size,
            Duration::from_millis(config.query_cache_ttl_ms),
            config.patient_cache_size,
            Duration::from_millis(config.patient_cache_ttl_ms),
        ));

        let emr: Arc<dyn EmrFetcher> = Arc::new(UnconfiguredEmr);
        let embedder: Arc<dyn Embedder> = Arc::new(UnconfiguredEmbedder::new(embedding_dimension));
        let generator: Arc<dyn Generator> = Arc::new(UnconfiguredGenerator);
        let vector_index: Arc<dyn VectorIndex> = Arc::new(SurrealVectorIndex::new(db.clone(), embedding_dimension));

        let ingestion = Arc::new(IngestionPipeline::new(
            Arc::new(db.clone()),
            emr,
            embedder.clone(),
            vector_index.clone(),
            breakers.clone(),
            cache.clone(),
            config.clone(),
        ));

        let retriever = Retriever::new(
            ChunkStore::new(db.clone()),
            embedder,
            vector_index,
            breakers.clone(),
            cache.clone(),
        );
        let retrieval = RetrievalPipeline::new(retriever, ChunkStore::new(db.clone()), generator, breakers.clone(), config.clone());

        let conversation = conversation::ConversationManager::new(config.session_ttl_minutes);
        let audit_logger = audit::AuditLogger::open(&config.audit_log_dir, config.audit_in_memory_max).await?;
        let history = audit::ConversationHistory::new(db);

        Ok(Self {
            cache,
            breakers,
            ingestion,
            retrieval,
            conversation,
            audit_logger,
            history,
        })
    }
}
