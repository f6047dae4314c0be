//! SQLite-based persistence store

use crate::core::run::{Environment, RunStatus, RunSummary, TriggerKind};
use crate::deploy::{DeployedVersion, DeploymentStatus, EnvironmentState, HealthCheckRecord};
use crate::persistence::PersistenceBackend;
use crate::registry::Artifact;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

/// SQLite store for run history, artifacts, and environment state.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store
    pub async fn new(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))
            .context("Invalid database path")?
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("gantry");
        std::fs::create_dir_all(&db_dir)?;

        let db_path = db_dir.join("gantry.db");
        Self::new(db_path.to_str().context("non-utf8 data dir")?).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                pipeline_name TEXT NOT NULL,
                trigger_kind TEXT NOT NULL,
                branch TEXT NOT NULL,
                environment TEXT,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                total_stages INTEGER NOT NULL DEFAULT 0,
                succeeded_stages INTEGER NOT NULL DEFAULT 0,
                failed_stages INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS artifacts (
                name TEXT NOT NULL,
                version INTEGER NOT NULL,
                platform TEXT NOT NULL,
                content_ref TEXT NOT NULL,
                produced_by TEXT NOT NULL,
                run_id TEXT NOT NULL,
                gates_clean INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (name, version, platform)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS environments (
                name TEXT PRIMARY KEY,
                deployed_name TEXT,
                deployed_version INTEGER,
                status TEXT NOT NULL,
                last_check_healthy INTEGER,
                last_check_at TEXT,
                healthy_history TEXT NOT NULL DEFAULT '[]'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn run_status_from_str(s: &str) -> RunStatus {
        match s {
            "pending" => RunStatus::Pending,
            "running" => RunStatus::Running,
            "succeeded" => RunStatus::Succeeded,
            "failed" => RunStatus::Failed,
            "cancelled" => RunStatus::Cancelled,
            _ => RunStatus::Failed,
        }
    }

    fn run_status_to_str(status: RunStatus) -> &'static str {
        match status {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    fn trigger_from_str(s: &str) -> TriggerKind {
        match s {
            "pull_request" => TriggerKind::PullRequest,
            "manual" => TriggerKind::Manual,
            _ => TriggerKind::Push,
        }
    }

    fn deployment_status_from_str(s: &str) -> DeploymentStatus {
        match s {
            "deploying" => DeploymentStatus::Deploying,
            "healthy" => DeploymentStatus::Healthy,
            "degraded" => DeploymentStatus::Degraded,
            "rolled_back" => DeploymentStatus::RolledBack,
            _ => DeploymentStatus::Idle,
        }
    }

    fn deployment_status_to_str(status: DeploymentStatus) -> &'static str {
        match status {
            DeploymentStatus::Idle => "idle",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Healthy => "healthy",
            DeploymentStatus::Degraded => "degraded",
            DeploymentStatus::RolledBack => "rolled_back",
        }
    }

    fn row_to_summary(row: &sqlx::sqlite::SqliteRow) -> Result<RunSummary> {
        Ok(RunSummary {
            run_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            pipeline_name: row.get("pipeline_name"),
            trigger: Self::trigger_from_str(&row.get::<String, _>("trigger_kind")),
            branch: row.get("branch"),
            environment: row
                .get::<Option<String>, _>("environment")
                .and_then(|e| e.parse::<Environment>().ok()),
            status: Self::run_status_from_str(&row.get::<String, _>("status")),
            started_at: Self::from_naive(row.get("started_at")),
            finished_at: row
                .get::<Option<NaiveDateTime>, _>("finished_at")
                .map(Self::from_naive),
            total_stages: row.get::<i64, _>("total_stages") as usize,
            succeeded_stages: row.get::<i64, _>("succeeded_stages") as usize,
            failed_stages: row.get::<i64, _>("failed_stages") as usize,
        })
    }
}

#[async_trait]
impl PersistenceBackend for SqliteStore {
    async fn save_run(&self, summary: &RunSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, pipeline_name, trigger_kind, branch, environment, status,
             started_at, finished_at, total_stages, succeeded_stages, failed_stages)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(summary.run_id.to_string())
        .bind(&summary.pipeline_name)
        .bind(summary.trigger.to_string())
        .bind(&summary.branch)
        .bind(summary.environment.map(|e| e.to_string()))
        .bind(Self::run_status_to_str(summary.status))
        .bind(Self::to_naive(summary.started_at))
        .bind(summary.finished_at.map(Self::to_naive))
        .bind(summary.total_stages as i64)
        .bind(summary.succeeded_stages as i64)
        .bind(summary.failed_stages as i64)
        .execute(&self.pool)
        .await
        .context("Failed to save run")?;

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ?1")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        row.as_ref().map(Self::row_to_summary).transpose()
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let rows = sqlx::query("SELECT * FROM runs ORDER BY started_at DESC LIMIT ?1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list runs")?;

        rows.iter().map(Self::row_to_summary).collect()
    }

    async fn save_artifact(&self, artifact: &Artifact) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO artifacts
            (name, version, platform, content_ref, produced_by, run_id, gates_clean, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&artifact.name)
        .bind(artifact.version as i64)
        .bind(&artifact.platform)
        .bind(&artifact.content_ref)
        .bind(&artifact.produced_by)
        .bind(artifact.run_id.to_string())
        .bind(artifact.gates_clean as i64)
        .bind(Self::to_naive(artifact.created_at))
        .execute(&self.pool)
        .await
        .context("Failed to save artifact")?;

        Ok(())
    }

    async fn load_artifacts(&self) -> Result<Vec<Artifact>> {
        let rows = sqlx::query("SELECT * FROM artifacts ORDER BY name, version")
            .fetch_all(&self.pool)
            .await
            .context("Failed to load artifacts")?;

        rows.iter()
            .map(|row| {
                Ok(Artifact {
                    name: row.get("name"),
                    version: row.get::<i64, _>("version") as u64,
                    platform: row.get("platform"),
                    content_ref: row.get("content_ref"),
                    produced_by: row.get("produced_by"),
                    run_id: Uuid::parse_str(&row.get::<String, _>("run_id"))?,
                    gates_clean: row.get::<i64, _>("gates_clean") != 0,
                    created_at: Self::from_naive(row.get("created_at")),
                })
            })
            .collect()
    }

    async fn save_environment(&self, state: &EnvironmentState) -> Result<()> {
        let history = serde_json::to_string(&state.healthy_history)?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO environments
            (name, deployed_name, deployed_version, status,
             last_check_healthy, last_check_at, healthy_history)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(state.environment.to_string())
        .bind(state.deployed.as_ref().map(|d| d.name.clone()))
        .bind(state.deployed.as_ref().map(|d| d.version as i64))
        .bind(Self::deployment_status_to_str(state.status))
        .bind(state.last_check.as_ref().map(|c| c.healthy as i64))
        .bind(state.last_check.as_ref().map(|c| Self::to_naive(c.checked_at)))
        .bind(history)
        .execute(&self.pool)
        .await
        .context("Failed to save environment")?;

        Ok(())
    }

    async fn load_environments(&self) -> Result<Vec<EnvironmentState>> {
        let rows = sqlx::query("SELECT * FROM environments")
            .fetch_all(&self.pool)
            .await
            .context("Failed to load environments")?;

        rows.iter()
            .filter_map(|row| {
                // Rows for environments outside the closed set are
                // ignored rather than failing the load.
                let environment = row
                    .get::<String, _>("name")
                    .parse::<Environment>()
                    .ok()?;
                Some((environment, row))
            })
            .map(|(environment, row)| {
                let deployed = match (
                    row.get::<Option<String>, _>("deployed_name"),
                    row.get::<Option<i64>, _>("deployed_version"),
                ) {
                    (Some(name), Some(version)) => Some(DeployedVersion {
                        name,
                        version: version as u64,
                    }),
                    _ => None,
                };

                let last_check = match (
                    row.get::<Option<i64>, _>("last_check_healthy"),
                    row.get::<Option<NaiveDateTime>, _>("last_check_at"),
                ) {
                    (Some(healthy), Some(at)) => Some(HealthCheckRecord {
                        healthy: healthy != 0,
                        checked_at: Self::from_naive(at),
                    }),
                    _ => None,
                };

                let healthy_history: Vec<DeployedVersion> =
                    serde_json::from_str(&row.get::<String, _>("healthy_history"))?;

                Ok(EnvironmentState {
                    environment,
                    deployed,
                    status: Self::deployment_status_from_str(&row.get::<String, _>("status")),
                    last_check,
                    healthy_history,
                })
            })
            .collect()
    }
}
