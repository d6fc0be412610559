//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::Path;

use super::Database;

/// One schema step
struct Migration {
    version: i64,
    description: &'static str,
    statements: &'static [&'static str],
}

/// Schema history, oldest first
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "catalog items",
        statements: &[
            r#"
            CREATE TABLE catalog_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                origin TEXT NOT NULL DEFAULT 'recent',
                content_id TEXT NOT NULL,
                content_type TEXT NOT NULL DEFAULT 'vod',
                vod_type TEXT,
                channel_name TEXT NOT NULL DEFAULT '',
                program_id TEXT NOT NULL DEFAULT '',
                program_title TEXT NOT NULL DEFAULT '',
                release_date TEXT,
                episode_number TEXT NOT NULL DEFAULT '',
                episode_title TEXT NOT NULL DEFAULT '',
                program_genre TEXT,
                image TEXT,
                requested_quality TEXT,
                quality TEXT,
                catalog_json TEXT,
                contents_json TEXT,
                streaming_json TEXT,
                play_url TEXT,
                filename TEXT,
                drm INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                start_time INTEGER,
                end_time INTEGER,
                download_time_secs INTEGER,
                duration_secs INTEGER,
                filesize INTEGER,
                filesize_str TEXT,
                download_speed TEXT,
                save_path TEXT,
                backend_status INTEGER NOT NULL DEFAULT -1,
                completed INTEGER NOT NULL DEFAULT 0,
                user_aborted INTEGER NOT NULL DEFAULT 0,
                transient_fault INTEGER NOT NULL DEFAULT 0,
                packet_faults INTEGER NOT NULL DEFAULT 0,
                retry_count INTEGER NOT NULL DEFAULT 0,
                outcome_code INTEGER NOT NULL DEFAULT 0
            )
            "#,
            // Recent intake is keyed by content id; program items may repeat it
            "CREATE UNIQUE INDEX idx_items_recent_content ON catalog_items(content_id) WHERE origin = 'recent'",
            "CREATE INDEX idx_items_program ON catalog_items(origin, content_id, requested_quality)",
            "CREATE INDEX idx_items_outcome ON catalog_items(origin, outcome_code)",
            "CREATE INDEX idx_items_created ON catalog_items(created_at DESC)",
        ],
    },
    Migration {
        version: 2,
        description: "runtime state",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS runtime_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            // Unclean until the first set_clean_shutdown
            "INSERT INTO runtime_state (key, value, updated_at) VALUES ('clean_shutdown', 'false', strftime('%s', 'now'))",
        ],
    },
];

impl Database {
    /// Create a new database connection
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create schema_version table: {}",
                e
            )))
        })?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?;

        let current_version = current_version.unwrap_or(0);
        for migration in MIGRATIONS.iter().filter(|m| m.version > current_version) {
            Self::apply_migration(&mut conn, migration).await?;
        }

        Ok(())
    }

    /// Apply one migration in a transaction and record its version
    async fn apply_migration(conn: &mut SqliteConnection, migration: &Migration) -> Result<()> {
        tracing::info!(version = migration.version, "Applying database migration: {}", migration.description);
        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to begin transaction: {}",
                    e
                )))
            })?;

        let result = async {
            for statement in migration.statements {
                sqlx::query(statement).execute(&mut *conn).await.map_err(|e| {
                    Error::Database(DatabaseError::MigrationFailed(format!(
                        "Migration v{} ({}) failed: {}",
                        migration.version, migration.description, e
                    )))
                })?;
            }
            sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
                .bind(migration.version)
                .bind(chrono::Utc::now().timestamp())
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::MigrationFailed(format!(
                        "Failed to record migration v{}: {}",
                        migration.version, e
                    )))
                })?;
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT").execute(&mut *conn).await.map_err(|e| {
                    Error::Database(DatabaseError::MigrationFailed(format!(
                        "Failed to commit migration v{}: {}",
                        migration.version, e
                    )))
                })?;
                tracing::info!(version = migration.version, "Database migration complete");
                Ok(())
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    /// Close the database connection
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
