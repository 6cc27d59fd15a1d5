use sqlx::SqlitePool;
use tracing::{info, warn};

use super::StoreError;

/// Removes a user and the data that only they could reach.
///
/// Projects owned by the user move to `fallback_owner`, store rows scoped to
/// the user with no project are deleted, then the user row goes. All three
/// statements share one transaction. Returns `false` when no such user
/// exists.
pub async fn delete_user(
    pool: &SqlitePool,
    user_id: &str,
    fallback_owner: &str,
) -> Result<bool, StoreError> {
    let mut tx = pool.begin().await?;

    let fallback_id: Option<String> =
        sqlx::query_scalar(r#"SELECT id FROM users WHERE username = ?"#)
            .bind(fallback_owner)
            .fetch_optional(&mut *tx)
            .await?;
    let Some(fallback_id) = fallback_id else {
        return Err(StoreError::MissingFallbackOwner(fallback_owner.to_string()));
    };
    if fallback_id == user_id {
        warn!(user_id, "refusing to delete the fallback owner");
        return Err(StoreError::FallbackOwnerTargeted(fallback_owner.to_string()));
    }

    let reassigned = sqlx::query(r#"UPDATE projects SET owner_id = ? WHERE owner_id = ?"#)
        .bind(&fallback_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    let records =
        sqlx::query(r#"DELETE FROM store WHERE user_id = ? AND project_id IS NULL"#)
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

    let deleted = sqlx::query(r#"DELETE FROM users WHERE id = ?"#)
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if deleted == 0 {
        // Dropping `tx` rolls back the (empty) reassignment.
        return Ok(false);
    }

    tx.commit().await?;
    info!(user_id, reassigned, records, "deleted user");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use ptt_contracts::store::StoreKey;

    use super::*;
    use crate::db;
    use crate::store::ScopedStore;

    #[tokio::test]
    async fn cascade_reassigns_projects_and_drops_user_only_records() {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        db::initialize_schema(&pool).await.unwrap();
        db::seed_root_user(&pool, "changeme!!").await.unwrap();
        let root = db::find_user_by_username(&pool, "root").await.unwrap().unwrap();
        let alice = db::create_user(&pool, "alice", "pw-alice-123", false)
            .await
            .unwrap();
        let project = db::create_project(&pool, "recon", &alice.id).await.unwrap();

        let store = ScopedStore::new(pool.clone());
        let user_only = StoreKey::new("p", &alice.id, "", "k");
        let user_in_project = StoreKey::new("p", &alice.id, &project.id, "k");
        let plugin_only = StoreKey::new("p", "", "", "k");
        for key in [&user_only, &user_in_project, &plugin_only] {
            store.set_value(key, b"v").await.unwrap();
        }

        assert!(delete_user(&pool, &alice.id, "root").await.unwrap());

        let project = db::find_project(&pool, &project.id).await.unwrap().unwrap();
        assert_eq!(project.owner_id, root.id);
        assert!(db::find_user_by_username(&pool, "alice").await.unwrap().is_none());
        assert_eq!(store.get_value(&user_only).await.unwrap(), None);
        assert!(store.get_value(&user_in_project).await.unwrap().is_some());
        assert!(store.get_value(&plugin_only).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unknown_user_changes_nothing() {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        db::initialize_schema(&pool).await.unwrap();
        db::seed_root_user(&pool, "changeme!!").await.unwrap();

        assert!(!delete_user(&pool, "no-such-user", "root").await.unwrap());
        assert!(db::find_user_by_username(&pool, "root").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_cascade_rolls_back_earlier_steps() {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        db::initialize_schema(&pool).await.unwrap();
        db::seed_root_user(&pool, "changeme!!").await.unwrap();
        let root = db::find_user_by_username(&pool, "root").await.unwrap().unwrap();
        let alice = db::create_user(&pool, "alice", "pw-alice-123", false)
            .await
            .unwrap();
        let project = db::create_project(&pool, "recon", &alice.id).await.unwrap();
        sqlx::query(
            r#"CREATE TRIGGER keep_users BEFORE DELETE ON users
               BEGIN SELECT RAISE(ABORT, 'users are append-only'); END"#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let err = delete_user(&pool, &alice.id, "root").await.unwrap_err();
        assert!(matches!(err, StoreError::Database(_)), "{err}");

        let project = db::find_project(&pool, &project.id).await.unwrap().unwrap();
        assert_eq!(project.owner_id, alice.id);
        assert_ne!(project.owner_id, root.id);
        assert!(db::find_user_by_username(&pool, "alice").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_fallback_owner_aborts_before_any_change() {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        db::initialize_schema(&pool).await.unwrap();
        let alice = db::create_user(&pool, "alice", "pw-alice-123", false)
            .await
            .unwrap();

        let err = delete_user(&pool, &alice.id, "nobody").await.unwrap_err();
        assert!(matches!(err, StoreError::MissingFallbackOwner(_)));
        assert!(db::find_user_by_username(&pool, "alice").await.unwrap().is_some());
    }
}
