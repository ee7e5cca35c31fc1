//! Metric and incident history
//!
//! Append-only audit trail. The active incident set stays in memory; every
//! incident transition is mirrored here as a new row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::error::Result;
use crate::models::{Incident, MetricStatus};

/// Persistence boundary used by the evaluator and the cycle driver
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Record one collected sample with its threshold status
    async fn save_metric(&self, metric: &str, value: f64, status: MetricStatus) -> Result<()>;

    /// Record an incident transition (open, escalate, resolve)
    async fn save_incident(&self, incident: &Incident) -> Result<()>;
}

/// SQLite-backed history
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Connect to `url`, creating the database file if needed
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// A private in-memory database
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        Ok(Self { pool })
    }

    /// Create tables if they do not exist
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS historical_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                metric TEXT NOT NULL,
                value REAL NOT NULL,
                status TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_historical_metrics_metric ON historical_metrics (metric, id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS incidents (
                row_id INTEGER PRIMARY KEY AUTOINCREMENT,
                incident_id TEXT NOT NULL,
                alert_key TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                metric TEXT NOT NULL,
                current_value REAL NOT NULL,
                threshold REAL NOT NULL,
                severity TEXT NOT NULL,
                message TEXT NOT NULL,
                resolved BOOLEAN NOT NULL,
                resolved_at TEXT,
                recorded_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent incident rows, newest first
    pub async fn recent_incidents(&self, limit: i64) -> Result<Vec<IncidentRecord>> {
        let rows = sqlx::query_as::<_, IncidentRecord>(
            r#"
            SELECT * FROM incidents
            ORDER BY row_id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// All rows recorded for one incident, oldest first
    pub async fn incident_history(&self, incident_id: &str) -> Result<Vec<IncidentRecord>> {
        let rows = sqlx::query_as::<_, IncidentRecord>(
            "SELECT * FROM incidents WHERE incident_id = ? ORDER BY row_id ASC",
        )
        .bind(incident_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Most recent samples of one metric, newest first
    pub async fn metric_history(&self, metric: &str, limit: i64) -> Result<Vec<MetricRecord>> {
        let rows = sqlx::query_as::<_, MetricRecord>(
            r#"
            SELECT * FROM historical_metrics
            WHERE metric = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(metric)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl IncidentStore for SqliteRepository {
    async fn save_metric(&self, metric: &str, value: f64, status: MetricStatus) -> Result<()> {
        sqlx::query(
            "INSERT INTO historical_metrics (timestamp, metric, value, status) VALUES (?, ?, ?, ?)",
        )
        .bind(Utc::now())
        .bind(metric)
        .bind(value)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_incident(&self, incident: &Incident) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO incidents (
                incident_id, alert_key, opened_at, metric, current_value, threshold,
                severity, message, resolved, resolved_at, recorded_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(incident.id.to_string())
        .bind(&incident.alert_key)
        .bind(incident.opened_at)
        .bind(&incident.metric)
        .bind(incident.current_value)
        .bind(incident.threshold)
        .bind(incident.severity.as_str())
        .bind(&incident.message)
        .bind(incident.resolved)
        .bind(incident.resolved_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// A stored incident row
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct IncidentRecord {
    pub row_id: i64,
    pub incident_id: String,
    pub alert_key: String,
    pub opened_at: DateTime<Utc>,
    pub metric: String,
    pub current_value: f64,
    pub threshold: f64,
    pub severity: String,
    pub message: String,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub recorded_at: DateTime<Utc>,
}

/// A stored metric sample
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MetricRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub metric: String,
    pub value: f64,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;

    async fn repo() -> SqliteRepository {
        let repo = SqliteRepository::in_memory().await.unwrap();
        repo.migrate().await.unwrap();
        repo
    }

    #[tokio::test]
    async fn test_save_and_read_metric_history() {
        let repo = repo().await;
        repo.save_metric("cpu_percentage", 42.0, MetricStatus::Normal).await.unwrap();
        repo.save_metric("cpu_percentage", 91.5, MetricStatus::Critical).await.unwrap();
        repo.save_metric("queue_depth", 1000.0, MetricStatus::Normal).await.unwrap();

        let rows = repo.metric_history("cpu_percentage", 10).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value, 91.5);
        assert_eq!(rows[0].status, "critical");
        assert_eq!(rows[1].status, "normal");
    }

    #[tokio::test]
    async fn test_incident_rows_are_append_only() {
        let repo = repo().await;
        let mut incident = Incident::open(
            "cpu_percentage",
            "cpu_percentage",
            90.0,
            85.0,
            Severity::Critical,
            "cpu high",
            Utc::now(),
        );
        repo.save_incident(&incident).await.unwrap();

        incident.resolved = true;
        incident.resolved_at = Some(Utc::now());
        repo.save_incident(&incident).await.unwrap();

        let history = repo.incident_history(&incident.id.to_string()).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[0].resolved);
        assert!(history[1].resolved);
        assert!(history[1].resolved_at.is_some());

        let recent = repo.recent_incidents(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert!(recent[0].resolved);
        assert_eq!(recent[0].severity, "critical");
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let repo = repo().await;
        repo.migrate().await.unwrap();
    }
}
