/// Fusion metrics persistence
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use ccube_sdk::types::Metrics;

use crate::platform::HostInfo;

/// Stored metrics of one fused ensemble
#[derive(Debug, Clone, PartialEq)]
pub struct FusionMetricsRecord {
    pub ip: String,
    pub hostname: String,
    pub job_name: String,
    pub random_seed: u64,
    pub metrics: Metrics,
    pub created_at: DateTime<Utc>,
}

pub struct FusionMetricsRepository {
    pool: SqlitePool,
}

impl FusionMetricsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record(
        &self,
        host: &HostInfo,
        job_name: &str,
        random_seed: u64,
        metrics: &Metrics,
    ) -> Result<()> {
        let seed = i64::try_from(random_seed).context("Random seed does not fit the journal")?;
        let metrics_json = serde_json::to_string(metrics).context("Failed to encode metrics")?;

        sqlx::query(
            "INSERT INTO fusion_metrics (ip, hostname, job_name, random_seed, metrics_json, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&host.ip)
        .bind(&host.hostname)
        .bind(job_name)
        .bind(seed)
        .bind(metrics_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to record fusion metrics")?;

        Ok(())
    }

    /// Every record of a job, oldest first
    pub async fn for_job(&self, job_name: &str) -> Result<Vec<FusionMetricsRecord>> {
        let rows = sqlx::query(
            "SELECT ip, hostname, job_name, random_seed, metrics_json, created_at FROM fusion_metrics WHERE job_name = ? ORDER BY id",
        )
        .bind(job_name)
        .fetch_all(&self.pool)
        .await
        .context("Failed to read fusion metrics")?;

        rows.into_iter()
            .map(|row| -> Result<FusionMetricsRecord> {
                let seed: i64 = row.get("random_seed");
                let metrics_json: String = row.get("metrics_json");
                let created_at: String = row.get("created_at");
                Ok(FusionMetricsRecord {
                    ip: row.get("ip"),
                    hostname: row.get("hostname"),
                    job_name: row.get("job_name"),
                    random_seed: u64::try_from(seed).context("Negative random seed")?,
                    metrics: serde_json::from_str(&metrics_json)
                        .context("Invalid stored metrics")?,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .context("Invalid record time")?
                        .with_timezone(&Utc),
                })
            })
            .collect()
    }
}
