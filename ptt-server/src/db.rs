use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::password::{self, PasswordError};

/// Username of the account created on first start.
pub const ROOT_USERNAME: &str = "root";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY NOT NULL,
        username TEXT NOT NULL UNIQUE,
        hash TEXT NOT NULL,
        is_admin INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS projects (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL UNIQUE,
        owner_id TEXT NOT NULL,
        FOREIGN KEY (owner_id) REFERENCES users(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS store (
        plugin_id TEXT NOT NULL,
        user_id TEXT,
        project_id TEXT,
        key TEXT NOT NULL,
        value BLOB NOT NULL
    )
    "#,
    // NULL scope columns compare equal for uniqueness.
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS store_scope_key
        ON store (plugin_id, COALESCE(user_id, ''), COALESCE(project_id, ''), key)
    "#,
];

/// Opens the SQLite pool. A single connection avoids `database is locked`
/// under concurrent writers and keeps `:memory:` databases alive.
pub async fn connect(url: &str) -> Result<SqlitePool, sqlx::Error> {
    let mut options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));
    if !url.contains(":memory:") {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
}

pub async fn initialize_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    debug!("database schema ready");
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Password(#[from] PasswordError),
}

/// Creates the `root` admin account when it does not exist yet.
/// Returns `true` when the account was created.
pub async fn seed_root_user(
    pool: &SqlitePool,
    password: &str,
) -> Result<bool, SeedError> {
    if find_user_by_username(pool, ROOT_USERNAME).await?.is_some() {
        return Ok(false);
    }
    create_user(pool, ROOT_USERNAME, password, true).await?;
    info!("created bootstrap root account");
    Ok(true)
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub hash: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProjectRow {
    pub id: String,
    pub name: String,
    pub owner_id: String,
}

pub async fn create_user(
    pool: &SqlitePool,
    username: &str,
    password: &str,
    is_admin: bool,
) -> Result<UserRow, SeedError> {
    let owned = password.to_owned();
    let hash = tokio::task::spawn_blocking(move || password::hash_password(&owned))
        .await
        .map_err(|err| PasswordError::Hash(err.to_string()))??;

    let row = UserRow {
        id: Uuid::new_v4().to_string(),
        username: username.to_lowercase(),
        hash,
        is_admin,
    };
    sqlx::query(
        r#"INSERT INTO users (id, username, hash, is_admin) VALUES (?, ?, ?, ?)"#,
    )
    .bind(&row.id)
    .bind(&row.username)
    .bind(&row.hash)
    .bind(row.is_admin)
    .execute(pool)
    .await?;
    Ok(row)
}

pub async fn find_user_by_username(
    pool: &SqlitePool,
    username: &str,
) -> Result<Option<UserRow>, sqlx::Error> {
    sqlx::query_as::<_, UserRow>(
        r#"SELECT id, username, hash, is_admin FROM users WHERE username = ?"#,
    )
    .bind(username.to_lowercase())
    .fetch_optional(pool)
    .await
}

pub async fn create_project(
    pool: &SqlitePool,
    name: &str,
    owner_id: &str,
) -> Result<ProjectRow, sqlx::Error> {
    let row = ProjectRow {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        owner_id: owner_id.to_string(),
    };
    sqlx::query(r#"INSERT INTO projects (id, name, owner_id) VALUES (?, ?, ?)"#)
        .bind(&row.id)
        .bind(&row.name)
        .bind(&row.owner_id)
        .execute(pool)
        .await?;
    Ok(row)
}

pub async fn find_project(
    pool: &SqlitePool,
    id: &str,
) -> Result<Option<ProjectRow>, sqlx::Error> {
    sqlx::query_as::<_, ProjectRow>(
        r#"SELECT id, name, owner_id FROM projects WHERE id = ?"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn list_projects(
    pool: &SqlitePool,
) -> Result<Vec<ProjectRow>, sqlx::Error> {
    sqlx::query_as::<_, ProjectRow>(
        r#"SELECT id, name, owner_id FROM projects ORDER BY name"#,
    )
    .fetch_all(pool)
    .await
}
