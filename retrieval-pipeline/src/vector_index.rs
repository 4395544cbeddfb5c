//! SurrealDB-backed default `VectorIndex`: an HNSW index over
//! `chunk_embedding.embedding`, narrowed to a candidate id set before the
//! similarity search runs. A query embedding of a different length than
//! the index's own dimension is rejected rather than silently compared.

use serde::Deserialize;

use common::collaborators::{VectorFilter, VectorIndex, VectorMatch};
use common::error::AppError;
use common::storage::db::SurrealDbClient;
use common::storage::types::chunk_embedding::ChunkEmbedding;
use common::storage::types::StoredObject;

pub struct SurrealVectorIndex {
    db: SurrealDbClient,
    dimension: usize,
}

impl SurrealVectorIndex {
    pub fn new(db: SurrealDbClient, dimension: usize) -> Self {
        Self { db, dimension }
    }
}

#[derive(Deserialize)]
struct Row {
    chunk_id: String,
    score: f32,
}

#[async_trait::async_trait]
impl VectorIndex for SurrealVectorIndex {
    async fn add(&self, id: &str, vector: Vec<f32>) -> Result<(), AppError> {
        if vector.len() != self.dimension {
            return Err(AppError::Validation(format!(
                "embedding for chunk {id} has dimension {} but the index expects {}",
                vector.len(),
                self.dimension
            )));
        }
        Ok(())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<VectorMatch>, AppError> {
        if query_vector.len() != self.dimension {
            return Err(AppError::Validation(format!(
                "query embedding has dimension {} but the index expects {}",
                query_vector.len(),
                self.dimension
            )));
        }

        let candidate_filter = match &filter.candidate_ids {
            Some(ids) if ids.is_empty() => return Ok(Vec::new()),
            Some(_) => "AND chunk_id IN $candidate_ids",
            None => "",
        };

        let sql = format!(
            r"
            SELECT
                chunk_id,
                vector::similarity::cosine(embedding, $embedding) AS score
            FROM {table}
            WHERE embedding <|{k},100|> $embedding
            {candidate_filter}
            ORDER BY score DESC
            LIMIT {k};
            ",
            table = ChunkEmbedding::table_name(),
        );

        let mut query = self.db.client.query(sql).bind(("embedding", query_vector.to_vec()));
        if let Some(ids) = &filter.candidate_ids {
            query = query.bind(("candidate_ids", ids.clone()));
        }

        let mut response = query.await?;
        let rows: Vec<Row> = response.take(0)?;

        Ok(rows
            .into_iter()
            .map(|row| VectorMatch {
                id: row.chunk_id,
                score: row.score,
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::storage::indexes::ensure_runtime_indexes;

    async fn setup(dimension: usize) -> SurrealVectorIndex {
        let db = SurrealDbClient::memory("test", &uuid::Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();
        ensure_runtime_indexes(&db, dimension).await.unwrap();
        SurrealVectorIndex::new(db, dimension)
    }

    #[tokio::test]
    async fn rejects_mismatched_query_dimension() {
        let index = setup(3).await;
        let err = index
            .search(&[0.1, 0.2], 5, &VectorFilter::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn empty_candidate_set_short_circuits() {
        let index = setup(3).await;
        let filter = VectorFilter {
            candidate_ids: Some(vec![]),
        };
        let results = index.search(&[0.1, 0.2, 0.3], 5, &filter).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn search_restricted_to_candidates_finds_stored_embedding() {
        let index = setup(3).await;
        let now = Utc::now();
        index
            .db
            .upsert_item(ChunkEmbedding {
                id: "c1".into(),
                created_at: now,
                updated_at: now,
                chunk_id: "c1".into(),
                patient_id: "p1".into(),
                embedding: vec![1.0, 0.0, 0.0],
            })
            .await
            .unwrap();

        let filter = VectorFilter {
            candidate_ids: Some(vec!["c1".to_string()]),
        };
        let results = index.search(&[1.0, 0.0, 0.0], 5, &filter).await.unwrap();
        assert_eq!(results.first().map(|m| m.id.clone()), Some("c1".to_string()));
    }
}
