//! Persistence layer for the minimum schema the schedule provider reads.
//! Authoring this data (the operator CLI, zone and plan editors) is out of
//! scope for the core; this module only opens the database, applies the
//! embedded migrations, and exposes typed read queries for
//! `schedule::SqlGridProvider`.
//!
//! Uses `sqlx` with an embedded migration runner, with migrations as
//! inline string constants rather than an asset-embedding crate — enough
//! for the handful of tables this core needs.

use anyhow::Result;
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Pool, Sqlite};

use crate::config::DatabaseConfig;

pub mod schema;

pub use schema::*;

const MIGRATIONS: &[(&str, &str)] = &[("001_initial_schema", include_str!("migrations/001_initial_schema.sql"))];

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        // In-memory databases are one connection, one database: a pool with
        // more than one connection would silently fan out writes/reads
        // across unrelated empty databases.
        let is_memory = config.url.contains(":memory:");
        let max_connections = if is_memory {
            1
        } else {
            config.max_connections.unwrap_or(10)
        };

        if !is_memory && !Sqlite::database_exists(&config.url).await.unwrap_or(false) {
            Sqlite::create_database(&config.url).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&config.url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _retrovue_migrations (
                version TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for (version, sql) in MIGRATIONS {
            let already_applied: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM _retrovue_migrations WHERE version = ?",
            )
            .bind(version)
            .fetch_one(&self.pool)
            .await?;

            if already_applied > 0 {
                continue;
            }

            let mut tx = self.pool.begin().await?;
            sqlx::query(sql).execute(&mut *tx).await?;
            sqlx::query("INSERT INTO _retrovue_migrations (version) VALUES (?)")
                .bind(version)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            tracing::info!(version, "applied migration");
        }

        Ok(())
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}
