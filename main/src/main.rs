//! Composition root. Wires storage, caching, circuit breaking, the
//! retrieval pipeline, conversation sessions, and the audit trail, then
//! runs the background tickers (cache sweep, session cleanup, audit
//! retention) that keep all three healthy between queries. No HTTP or CLI
//! surface ships here; query answering is exercised via `RetrievalPipeline`
//! directly by an embedding caller.

mod collaborators;
mod services;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use common::config::AppConfig;
use common::storage::db::SurrealDbClient;
use common::storage::indexes::ensure_runtime_indexes;

use services::Services;

/// Matches `UnconfiguredEmbedder`'s reported dimension until a real
/// embedding client is wired in; the HNSW index and every stored
/// `chunk_embedding` row must agree on this value.
pub const EMBEDDING_DIMENSION: usize = 384;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = AppConfig::load()?;

    let db = SurrealDbClient::new(
        &config.db_address,
        &config.db_username,
        &config.db_password,
        &config.db_namespace,
        &config.db_database,
    )
    .await?;
    db.apply_migrations().await?;
    ensure_runtime_indexes(&db, EMBEDDING_DIMENSION).await?;

    let services = Arc::new(Services::build(db, config.clone(), EMBEDDING_DIMENSION).await?);

    info!("clinical question-answering services initialized");

    let cache_services = services.clone();
    let cache_sweep = tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(config.cache_sweep_interval_secs));
        loop {
            ticker.tick().await;
            let (embed, query, patient) = cache_services.cache.sweep().await;
            if embed + query + patient > 0 {
                info!(embed, query, patient, "cache sweep evicted expired entries");
            }
        }
    });

    let session_services = services.clone();
    let session_cleanup = tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            session_services.conversation.cleanup_expired_sessions().await;
        }
    });

    let audit_services = services.clone();
    let audit_retention_days = config.audit_retention_days;
    let audit_anonymize_days = config.audit_anonymize_days;
    let audit_maintenance = tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(86_400));
        loop {
            ticker.tick().await;
            audit_services.audit_logger.flush_pending().await;
            audit_services
                .audit_logger
                .enforce_retention(audit_retention_days, audit_anonymize_days)
                .await;
        }
    });

    tokio::select! {
        result = cache_sweep => {
            if let Err(err) = result {
                error!(error = %err, "cache sweep task panicked");
            }
        }
        result = session_cleanup => {
            if let Err(err) = result {
                error!(error = %err, "session cleanup task panicked");
            }
        }
        result = audit_maintenance => {
            if let Err(err) = result {
                error!(error = %err, "audit maintenance task panicked");
            }
        }
    }

    Ok(())
}
