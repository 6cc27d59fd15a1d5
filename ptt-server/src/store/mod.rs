//! Scoped key/value persistence that modules reach through the Store
//! contract.

mod cascade;
mod server;

pub use cascade::delete_user;
pub use server::StoreServer;

use async_trait::async_trait;
use ptt_contracts::ContractError;
use ptt_contracts::store::{Store, StoreKey};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("fallback owner `{0}` does not exist")]
    MissingFallbackOwner(String),
    #[error("the fallback owner `{0}` cannot be deleted")]
    FallbackOwnerTargeted(String),
}

impl From<StoreError> for ContractError {
    fn from(err: StoreError) -> Self {
        ContractError::Backend(err.to_string())
    }
}

/// SQLite-backed [`Store`].
///
/// Scope columns are compared with `IS`, so a NULL user or project matches
/// only other NULLs and never acts as a wildcard.
#[derive(Debug, Clone)]
pub struct ScopedStore {
    pool: SqlitePool,
}

impl ScopedStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn get_value(
        &self,
        key: &StoreKey,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let value = sqlx::query_scalar::<_, Vec<u8>>(
            r#"
            SELECT value FROM store
            WHERE plugin_id = ? AND user_id IS ? AND project_id IS ? AND key = ?
            "#,
        )
        .bind(&key.plugin_id)
        .bind(key.user_id.as_deref())
        .bind(key.project_id.as_deref())
        .bind(&key.key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    /// Updates the row in place or inserts it; never creates a duplicate.
    pub async fn set_value(
        &self,
        key: &StoreKey,
        value: &[u8],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            r#"
            UPDATE store SET value = ?
            WHERE plugin_id = ? AND user_id IS ? AND project_id IS ? AND key = ?
            "#,
        )
        .bind(value)
        .bind(&key.plugin_id)
        .bind(key.user_id.as_deref())
        .bind(key.project_id.as_deref())
        .bind(&key.key)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            sqlx::query(
                r#"
                INSERT INTO store (plugin_id, user_id, project_id, key, value)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&key.plugin_id)
            .bind(key.user_id.as_deref())
            .bind(key.project_id.as_deref())
            .bind(&key.key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(
            plugin_id = %key.plugin_id,
            scope = ?key.scope(),
            key = %key.key,
            inserted = updated == 0,
            "store set"
        );
        Ok(())
    }

    pub async fn delete_value(&self, key: &StoreKey) -> Result<(), StoreError> {
        let removed = sqlx::query(
            r#"
            DELETE FROM store
            WHERE plugin_id = ? AND user_id IS ? AND project_id IS ? AND key = ?
            "#,
        )
        .bind(&key.plugin_id)
        .bind(key.user_id.as_deref())
        .bind(key.project_id.as_deref())
        .bind(&key.key)
        .execute(&self.pool)
        .await?
        .rows_affected();
        debug!(plugin_id = %key.plugin_id, key = %key.key, removed, "store delete");
        Ok(())
    }
}

#[async_trait]
impl Store for ScopedStore {
    async fn get(&self, key: &StoreKey) -> Result<Option<Vec<u8>>, ContractError> {
        Ok(self.get_value(key).await?)
    }

    async fn set(&self, key: &StoreKey, value: Vec<u8>) -> Result<(), ContractError> {
        Ok(self.set_value(key, &value).await?)
    }

    async fn delete(&self, key: &StoreKey) -> Result<(), ContractError> {
        Ok(self.delete_value(key).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn store() -> ScopedStore {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        db::initialize_schema(&pool).await.unwrap();
        ScopedStore::new(pool)
    }

    async fn row_count(store: &ScopedStore) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM store")
            .fetch_one(store.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn unset_key_is_none_not_error() {
        let store = store().await;
        let key = StoreKey::new("p", "u", "", "missing");
        assert_eq!(store.get_value(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn four_scopes_are_independent_rows() {
        let store = store().await;
        let scopes = [
            StoreKey::new("p", "", "", "k"),
            StoreKey::new("p", "u", "", "k"),
            StoreKey::new("p", "", "proj", "k"),
            StoreKey::new("p", "u", "proj", "k"),
        ];
        for (i, key) in scopes.iter().enumerate() {
            store.set_value(key, &[i as u8]).await.unwrap();
        }
        for (i, key) in scopes.iter().enumerate() {
            assert_eq!(store.get_value(key).await.unwrap(), Some(vec![i as u8]));
        }
        assert_eq!(row_count(&store).await, 4);
    }

    #[tokio::test]
    async fn repeated_set_updates_in_place() {
        let store = store().await;
        let key = StoreKey::new("p", "", "", "counter");
        for n in 0..5u8 {
            store.set_value(&key, &[n]).await.unwrap();
        }
        assert_eq!(store.get_value(&key).await.unwrap(), Some(vec![4]));
        assert_eq!(row_count(&store).await, 1);
    }

    #[tokio::test]
    async fn unique_index_rejects_null_scope_duplicates() {
        let store = store().await;
        let insert = r#"INSERT INTO store (plugin_id, user_id, project_id, key, value)
                        VALUES ('p', NULL, NULL, 'k', x'00')"#;
        sqlx::query(insert).execute(store.pool()).await.unwrap();
        assert!(sqlx::query(insert).execute(store.pool()).await.is_err());
    }

    #[tokio::test]
    async fn delete_only_touches_the_exact_scope() {
        let store = store().await;
        let plugin_scope = StoreKey::new("p", "", "", "k");
        let user_scope = StoreKey::new("p", "u", "", "k");
        store.set_value(&plugin_scope, b"a").await.unwrap();
        store.set_value(&user_scope, b"b").await.unwrap();

        store.delete_value(&plugin_scope).await.unwrap();
        assert_eq!(store.get_value(&plugin_scope).await.unwrap(), None);
        assert_eq!(store.get_value(&user_scope).await.unwrap(), Some(b"b".to_vec()));
    }
}
