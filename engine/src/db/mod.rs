/// Stage journal
///
/// Every stage records when it started and finished, and the fuser records
/// the metrics of the ensemble it evaluated. The journal is a local SQLite
/// database in WAL mode so several stage processes on one host can append to
/// it concurrently.
use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

pub mod metrics;
pub mod times;

pub use metrics::{FusionMetricsRecord, FusionMetricsRepository};
pub use times::{StageEvent, StageTime, StageTimeRepository};

/// Database connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the journal, creating the file and schema when missing
    pub async fn new(db_path: &Path) -> Result<Self> {
        info!("Opening journal at: {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        let connection_string = format!("sqlite:{}", db_path.display());
        let options = SqliteConnectOptions::from_str(&connection_string)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        debug!("Database connection established");

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../../migrations/001_initial.sql"))
            .execute(&self.pool)
            .await
            .context("Failed to execute migration 001_initial.sql")?;

        debug!("Journal schema ready");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checkpoints the WAL and closes all connections
    pub async fn close(self) -> Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .context("Failed to flush WAL")?;

        self.pool.close().await;
        debug!("Journal closed");
        Ok(())
    }

    pub fn times(&self) -> StageTimeRepository {
        StageTimeRepository::new(self.pool.clone())
    }

    pub fn metrics(&self) -> FusionMetricsRepository {
        FusionMetricsRepository::new(self.pool.clone())
    }
}
