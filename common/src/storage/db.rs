use std::ops::Deref;

use surrealdb::engine::any::{connect, Any};
use surrealdb::opt::auth::Root;
use surrealdb::{Error, Surreal};

use super::types::StoredObject;

/// Thin wrapper around a connected `Surreal<Any>` client. Construction is
/// the only place that knows about transport/auth; every other component
/// talks to `SurrealDbClient` through the generic helpers below or its own
/// query methods.
#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

pub trait ProvidesDb {
    fn db(&self) -> &SurrealDbClient;
}

impl SurrealDbClient {
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        if !username.is_empty() {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Defines the schemaless tables named in the persisted state layout.
    /// Idempotent — safe to call on every startup.
    pub async fn apply_migrations(&self) -> Result<(), Error> {
        self.client
            .query(
                "DEFINE TABLE IF NOT EXISTS enriched_artifacts SCHEMALESS;
                 DEFINE TABLE IF NOT EXISTS clinical_relationships SCHEMALESS;
                 DEFINE TABLE IF NOT EXISTS chunk_metadata SCHEMALESS;
                 DEFINE TABLE IF NOT EXISTS conversation_history SCHEMALESS;",
            )
            .await?
            .check()?;
        Ok(())
    }

    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id().to_string()))
            .content(item)
            .await
    }

    /// Replaces the row if `item`'s id already exists, creates it otherwise —
    /// the primitive every upsert-by-id lifecycle (re-enrichment, chunk
    /// re-ingestion) is built on.
    pub async fn upsert_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .update((T::table_name(), item.get_id().to_string()))
            .content(item)
            .await
    }

    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }

    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Embedded in-memory client for hermetic tests.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;
        db.use_ns(namespace).use_db(database).await?;
        Ok(SurrealDbClient { client: db })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stored_object;
    use uuid::Uuid;

    stored_object!(Dummy, "dummy", {
        name: String
    });

    #[tokio::test]
    async fn crud_round_trips_through_memory_engine() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("failed to start in-memory surrealdb");

        db.apply_migrations()
            .await
            .expect("failed to apply migrations");

        let now = chrono::Utc::now();
        let dummy = Dummy {
            id: "abc".to_string(),
            name: "first".to_string(),
            created_at: now,
            updated_at: now,
        };

        let stored = db.store_item(dummy.clone()).await.expect("store failed");
        assert!(stored.is_some());

        let fetched = db
            .get_item::<Dummy>(&dummy.id)
            .await
            .expect("fetch failed");
        assert_eq!(fetched, Some(dummy.clone()));

        let all = db
            .get_all_stored_items::<Dummy>()
            .await
            .expect("fetch all failed");
        assert!(all.contains(&dummy));

        let deleted = db
            .delete_item::<Dummy>(&dummy.id)
            .await
            .expect("delete failed");
        assert_eq!(deleted, Some(dummy));

        let fetch_post = db
            .get_item::<Dummy>("abc")
            .await
            .expect("fetch-after-delete failed");
        assert!(fetch_post.is_none());
    }
}
