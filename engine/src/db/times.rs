/// Stage start and finish times
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::platform::HostInfo;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageEvent {
    LearnerStart,
    LearnerFinish,
    FilterStart,
    FilterFinish,
    FuserStart,
    FuserFinish,
}

impl StageEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageEvent::LearnerStart => "learner_start",
            StageEvent::LearnerFinish => "learner_finish",
            StageEvent::FilterStart => "filter_start",
            StageEvent::FilterFinish => "filter_finish",
            StageEvent::FuserStart => "fuser_start",
            StageEvent::FuserFinish => "fuser_finish",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "learner_start" => StageEvent::LearnerStart,
            "learner_finish" => StageEvent::LearnerFinish,
            "filter_start" => StageEvent::FilterStart,
            "filter_finish" => StageEvent::FilterFinish,
            "fuser_start" => StageEvent::FuserStart,
            "fuser_finish" => StageEvent::FuserFinish,
            _ => return None,
        })
    }
}

/// One journal entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageTime {
    pub ip: String,
    pub hostname: String,
    pub random_seed: u64,
    pub event: StageEvent,
    pub time: DateTime<Utc>,
}

pub struct StageTimeRepository {
    pool: SqlitePool,
}

impl StageTimeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record(
        &self,
        host: &HostInfo,
        random_seed: u64,
        event: StageEvent,
        time: DateTime<Utc>,
    ) -> Result<()> {
        let seed = i64::try_from(random_seed).context("Random seed does not fit the journal")?;

        sqlx::query(
            "INSERT INTO stage_times (ip, hostname, random_seed, event, time) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&host.ip)
        .bind(&host.hostname)
        .bind(seed)
        .bind(event.as_str())
        .bind(time.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to record stage time")?;

        Ok(())
    }

    /// Entries for one experiment replicate, oldest first
    pub async fn for_seed(&self, random_seed: u64) -> Result<Vec<StageTime>> {
        let seed = i64::try_from(random_seed).context("Random seed does not fit the journal")?;

        let rows = sqlx::query(
            "SELECT ip, hostname, random_seed, event, time FROM stage_times WHERE random_seed = ? ORDER BY id",
        )
        .bind(seed)
        .fetch_all(&self.pool)
        .await
        .context("Failed to read stage times")?;

        rows.into_iter()
            .map(|row| -> Result<StageTime> {
                let event: String = row.get("event");
                let time: String = row.get("time");
                let seed: i64 = row.get("random_seed");
                Ok(StageTime {
                    ip: row.get("ip"),
                    hostname: row.get("hostname"),
                    random_seed: u64::try_from(seed).context("Negative random seed")?,
                    event: StageEvent::parse(&event)
                        .with_context(|| format!("Unknown stage event '{}'", event))?,
                    time: DateTime::parse_from_rfc3339(&time)
                        .context("Invalid stage time")?
                        .with_timezone(&Utc),
                })
            })
            .collect()
    }
}
