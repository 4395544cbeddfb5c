//! Runs the ingestion side's bounded worker pool (§5: "enrichment/indexing
//! batches use a bounded worker pool whose size is configurable and
//! defaults to the host's parallelism"). Patient ids are expected to arrive
//! over the returned channel from whatever external scheduler a deployment
//! wires in; this binary owns only the pool and its lifetime.

mod collaborators;
mod services;

use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use common::config::AppConfig;
use common::storage::db::SurrealDbClient;
use common::storage::indexes::ensure_runtime_indexes;
use ingestion_pipeline::run_worker_loop;

use services::Services;

const EMBEDDING_DIMENSION: usize = 384;
const QUEUE_CAPACITY: usize = 64;

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

    let services = Services::build(db, config, EMBEDDING_DIMENSION).await?;

    let pool_size = std::thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(4);
    let (_sender, receiver) = mpsc::channel::<String>(QUEUE_CAPACITY);

    info!(pool_size, queue_capacity = QUEUE_CAPACITY, "starting ingestion worker pool");
    run_worker_loop(services.ingestion, receiver, pool_size).await;

    Ok(())
}
