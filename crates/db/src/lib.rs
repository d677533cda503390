use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use autofix_core::config::DbConfig;
use sqlx::{
    Pool, Row, Sqlite, SqliteConnection,
    migrate::MigrateDatabase,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The parent installation row does not exist (yet).
    #[error("installation {0} does not exist")]
    MissingParent(u64),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    fn from_sqlx(err: sqlx::Error, installation_id: u64) -> Self {
        match err {
            sqlx::Error::Database(e) if e.is_foreign_key_violation() => {
                StoreError::MissingParent(installation_id)
            }
            e => StoreError::Other(e.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInstallation {
    pub installation_id: u64,
    pub account_login: String,
    pub account_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationRecord {
    pub installation_id: u64,
    pub account_login: String,
    pub account_type: String,
    pub created_at: String,
    pub updated_at: String,
    pub repo_configs: Vec<RepoConfigRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoConfigRecord {
    pub repo_full_name: String,
    /// Resolved configuration as JSON.
    pub config_json: String,
    pub updated_at: String,
}

/// Bookkeeping of installations and the last resolved config of each repository.
/// Writes are plain upserts; the last writer wins.
#[async_trait]
pub trait InstallationStore: Send + Sync {
    async fn upsert_installation(&self, installation: &NewInstallation) -> Result<(), StoreError>;

    /// Removes the installation together with its stored repo configs.
    async fn delete_installation(&self, installation_id: u64) -> Result<(), StoreError>;

    /// Upserts the installation and the repo config in one transaction.
    async fn record_repo_config(
        &self,
        installation: &NewInstallation,
        repo_full_name: &str,
        config_json: &str,
    ) -> Result<(), StoreError>;

    /// All installations, newest first, with their repo configs.
    async fn list_installations(&self) -> Result<Vec<InstallationRecord>, StoreError>;
}

#[derive(Clone)]
pub struct Database {
    pub pool: Pool<Sqlite>,
}

const UPSERT_INSTALLATION: &str = r#"
    INSERT INTO installations (installation_id, account_login, account_type, created_at, updated_at)
    VALUES (?, ?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
    ON CONFLICT (installation_id) DO UPDATE
    SET account_login = EXCLUDED.account_login,
        account_type = EXCLUDED.account_type,
        updated_at = CURRENT_TIMESTAMP
"#;

const UPSERT_REPO_CONFIG: &str = r#"
    INSERT INTO repo_configs (installation_id, repo_full_name, config_json, created_at, updated_at)
    VALUES (?, ?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
    ON CONFLICT (installation_id, repo_full_name) DO UPDATE
    SET config_json = EXCLUDED.config_json,
        updated_at = CURRENT_TIMESTAMP
"#;

impl Database {
    pub async fn new(config: &DbConfig) -> Result<Self> {
        let in_memory = config.url.contains(":memory:");
        if !in_memory && !Sqlite::database_exists(&config.url).await.unwrap_or(false) {
            tracing::info!(url = %config.url, "Creating database");
            Sqlite::create_database(&config.url).await.context("Failed to create database")?;
            tracing::info!("Database created");
        }
        let options: SqliteConnectOptions =
            config.url.parse().context("Failed to parse database URL")?;
        let options = options.foreign_keys(true);
        let pool = if in_memory {
            // Every connection to :memory: is a separate database.
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await
        } else {
            SqlitePoolOptions::new().connect_with(options).await
        }
        .context("Failed to connect to database")?;
        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(Self { pool })
    }

    pub async fn close(&self) { self.pool.close().await }

    async fn upsert_installation_with(
        conn: &mut SqliteConnection,
        installation: &NewInstallation,
    ) -> Result<(), StoreError> {
        sqlx::query(UPSERT_INSTALLATION)
            .bind(installation.installation_id as i64)
            .bind(&installation.account_login)
            .bind(&installation.account_type)
            .execute(&mut *conn)
            .await
            .map_err(|e| StoreError::from_sqlx(e, installation.installation_id))?;
        Ok(())
    }

    async fn upsert_repo_config_with(
        conn: &mut SqliteConnection,
        installation_id: u64,
        repo_full_name: &str,
        config_json: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(UPSERT_REPO_CONFIG)
            .bind(installation_id as i64)
            .bind(repo_full_name)
            .bind(config_json)
            .execute(&mut *conn)
            .await
            .map_err(|e| StoreError::from_sqlx(e, installation_id))?;
        Ok(())
    }
}

fn other(e: sqlx::Error) -> StoreError { StoreError::Other(e.into()) }

#[async_trait]
impl InstallationStore for Database {
    async fn upsert_installation(&self, installation: &NewInstallation) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await.map_err(other)?;
        Self::upsert_installation_with(&mut conn, installation).await
    }

    async fn delete_installation(&self, installation_id: u64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(other)?;
        sqlx::query("DELETE FROM repo_configs WHERE installation_id = ?")
            .bind(installation_id as i64)
            .execute(&mut *tx)
            .await
            .map_err(other)?;
        let result = sqlx::query("DELETE FROM installations WHERE installation_id = ?")
            .bind(installation_id as i64)
            .execute(&mut *tx)
            .await
            .map_err(other)?;
        tx.commit().await.map_err(other)?;
        if result.rows_affected() == 0 {
            tracing::debug!("Installation {} was not stored", installation_id);
        }
        Ok(())
    }

    async fn record_repo_config(
        &self,
        installation: &NewInstallation,
        repo_full_name: &str,
        config_json: &str,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(other)?;
        Self::upsert_installation_with(&mut tx, installation).await?;
        let id = installation.installation_id;
        Self::upsert_repo_config_with(&mut tx, id, repo_full_name, config_json).await?;
        tx.commit().await.map_err(other)?;
        Ok(())
    }

    async fn list_installations(&self) -> Result<Vec<InstallationRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT installation_id, account_login, account_type, created_at, updated_at
            FROM installations
            ORDER BY created_at DESC, installation_id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(other)?;
        let config_rows = sqlx::query(
            r#"
            SELECT installation_id, repo_full_name, config_json, updated_at
            FROM repo_configs
            ORDER BY repo_full_name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(other)?;
        let mut configs = HashMap::<i64, Vec<RepoConfigRecord>>::new();
        for row in config_rows {
            configs.entry(row.try_get("installation_id").map_err(other)?).or_default().push(
                RepoConfigRecord {
                    repo_full_name: row.try_get("repo_full_name").map_err(other)?,
                    config_json: row.try_get("config_json").map_err(other)?,
                    updated_at: row.try_get("updated_at").map_err(other)?,
                },
            );
        }
        rows.into_iter()
            .map(|row| {
                let id: i64 = row.try_get("installation_id").map_err(other)?;
                Ok(InstallationRecord {
                    installation_id: id as u64,
                    account_login: row.try_get("account_login").map_err(other)?,
                    account_type: row.try_get("account_type").map_err(other)?,
                    created_at: row.try_get("created_at").map_err(other)?,
                    updated_at: row.try_get("updated_at").map_err(other)?,
                    repo_configs: configs.remove(&id).unwrap_or_default(),
                })
            })
            .collect()
    }
}
