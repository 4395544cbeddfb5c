use std::time::Duration;

use surrealdb::Error;
use tracing::{debug, warn};

use super::db::SurrealDbClient;

/// An HNSW vector index definition: table, vector field, dimension.
struct HnswIndexSpec {
    name: &'static str,
    table: &'static str,
    field: &'static str,
}

const HNSW_INDEXES: &[HnswIndexSpec] = &[HnswIndexSpec {
    name: "idx_chunk_embedding_hnsw",
    table: "chunk_embedding",
    field: "embedding",
}];

/// A BM25 full-text index definition.
struct FtsIndexSpec {
    name: &'static str,
    table: &'static str,
    field: &'static str,
}

const FTS_INDEXES: &[FtsIndexSpec] = &[FtsIndexSpec {
    name: "idx_chunk_text_fts",
    table: "chunk_metadata",
    field: "chunk_text",
}];

/// Defines the vector and full-text indexes this service depends on, then
/// polls until SurrealDB reports them built. Idempotent — safe to call on
/// every startup.
pub async fn ensure_runtime_indexes(db: &SurrealDbClient, dimension: usize) -> Result<(), Error> {
    for spec in HNSW_INDEXES {
        let sql = format!(
            "DEFINE INDEX IF NOT EXISTS {name} ON TABLE {table} \
             FIELDS {field} HNSW DIMENSION {dimension} DIST COSINE TYPE F32 EFC 100 M 8 CONCURRENTLY",
            name = spec.name,
            table = spec.table,
            field = spec.field,
        );
        db.client.query(sql).await?.check()?;
    }

    for spec in FTS_INDEXES {
        let sql = format!(
            "DEFINE ANALYZER IF NOT EXISTS clinical_text TOKENIZERS class FILTERS lowercase, snowball(english);
             DEFINE INDEX IF NOT EXISTS {name} ON TABLE {table} \
             FIELDS {field} SEARCH ANALYZER clinical_text BM25 HIGHLIGHTS",
            name = spec.name,
            table = spec.table,
            field = spec.field,
        );
        db.client.query(sql).await?.check()?;
    }

    wait_for_index_build(db, "chunk_embedding", "idx_chunk_embedding_hnsw").await;

    Ok(())
}

/// `REBUILD` every defined index — used after a bulk re-embedding pass.
pub async fn rebuild_indexes(db: &SurrealDbClient) -> Result<(), Error> {
    for spec in HNSW_INDEXES {
        db.client
            .query(format!(
                "REBUILD INDEX IF EXISTS {} ON {}",
                spec.name, spec.table
            ))
            .await?
            .check()?;
    }
    Ok(())
}

/// Polls `INFO FOR INDEX` until the index reports a built status or a bound
/// number of attempts elapses; never blocks startup indefinitely.
async fn wait_for_index_build(db: &SurrealDbClient, table: &str, index: &str) {
    for attempt in 0..20 {
        let res = db
            .client
            .query(format!("INFO FOR INDEX {index} ON {table}"))
            .await;
        match res {
            Ok(_) => {
                debug!(attempt, index, "index readiness check completed");
                return;
            }
            Err(err) => {
                warn!(attempt, %err, "index not ready yet, retrying");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn indexes_build_on_empty_database() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("failed to start in-memory surrealdb");
        db.apply_migrations().await.expect("migrations failed");

        ensure_runtime_indexes(&db, 3)
            .await
            .expect("failed to build runtime indexes");
    }
}
