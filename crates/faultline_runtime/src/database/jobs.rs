// Job persistence. The worker is the only mutator; rows are never deleted.

use crate::errors::{FaultlineError, FaultlineResult};
use crate::types::{Job, JobId, JobMetrics, JobSource, JobStatus, RequestedContext};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

type JobRow = (
    String,         // id
    String,         // workspace_id
    String,         // source
    String,         // status
    String,         // requested_context
    Option<String>, // report
    Option<String>, // error_message
    Option<String>, // error_type
    Option<String>, // backoff_until
    Option<String>, // started_at
    Option<String>, // finished_at
    String,         // created_at
    Option<String>, // metrics
);

const JOB_COLUMNS: &str = "id, workspace_id, source, status, requested_context, report, \
     error_message, error_type, backoff_until, started_at, finished_at, created_at, metrics";

pub struct JobOps;

impl JobOps {
    /// Create a new queued job and return its id.
    pub async fn create(
        pool: &SqlitePool,
        workspace_id: &str,
        source: JobSource,
        requested_context: &RequestedContext,
    ) -> FaultlineResult<JobId> {
        let id = Uuid::new_v4();
        let context_json = serde_json::to_string(requested_context)?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, workspace_id, source, status, requested_context, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(id.to_string())
        .bind(workspace_id)
        .bind(source.as_str())
        .bind(JobStatus::Queued.as_str())
        .bind(context_json)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await
        .map_err(|e| FaultlineError::database_error(&format!("Failed to create job: {}", e)))?;

        Ok(id)
    }

    /// Fetch a job by id. Returns None for unknown ids so stale queue
    /// deliveries can be dropped without an error path.
    pub async fn get(pool: &SqlitePool, id: JobId) -> FaultlineResult<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM jobs WHERE id = ?",
            JOB_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .map_err(|e| FaultlineError::database_error(&format!("Failed to get job: {}", e)))?;

        row.map(Self::from_row).transpose()
    }

    /// Atomically transition QUEUED -> RUNNING. Returns false when the job
    /// was not in QUEUED state, which callers treat as a duplicate delivery.
    pub async fn mark_running(pool: &SqlitePool, id: JobId) -> FaultlineResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = ?, started_at = ? WHERE id = ? AND status = ?",
        )
        .bind(JobStatus::Running.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .bind(JobStatus::Queued.as_str())
        .execute(pool)
        .await
        .map_err(|e| FaultlineError::database_error(&format!("Failed to mark job running: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    /// Persist a completed report with metrics.
    pub async fn complete(
        pool: &SqlitePool,
        id: JobId,
        report: &str,
        metrics: &JobMetrics,
    ) -> FaultlineResult<()> {
        let metrics_json = serde_json::to_string(metrics)?;
        sqlx::query(
            "UPDATE jobs SET status = ?, report = ?, metrics = ?, finished_at = ? WHERE id = ?",
        )
        .bind(JobStatus::Completed.as_str())
        .bind(report)
        .bind(metrics_json)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(|e| FaultlineError::database_error(&format!("Failed to complete job: {}", e)))?;
        Ok(())
    }

    /// Persist a failure. Only `fail_and_notify_job` calls this.
    pub async fn fail(
        pool: &SqlitePool,
        id: JobId,
        error_message: &str,
        error_type: &str,
    ) -> FaultlineResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = ?, error_message = ?, error_type = ?, finished_at = ? WHERE id = ?",
        )
        .bind(JobStatus::Failed.as_str())
        .bind(error_message)
        .bind(error_type)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(|e| FaultlineError::database_error(&format!("Failed to mark job failed: {}", e)))?;
        Ok(())
    }

    pub async fn set_backoff(
        pool: &SqlitePool,
        id: JobId,
        backoff_until: Option<DateTime<Utc>>,
    ) -> FaultlineResult<()> {
        sqlx::query("UPDATE jobs SET backoff_until = ? WHERE id = ?")
            .bind(backoff_until.map(|t| t.to_rfc3339()))
            .bind(id.to_string())
            .execute(pool)
            .await
            .map_err(|e| FaultlineError::database_error(&format!("Failed to set backoff: {}", e)))?;
        Ok(())
    }

    fn from_row(row: JobRow) -> FaultlineResult<Job> {
        let requested_context: RequestedContext = serde_json::from_str(&row.4)?;
        let metrics: Option<JobMetrics> = match row.12 {
            Some(ref json) => serde_json::from_str(json).ok(),
            None => None,
        };

        Ok(Job {
            id: Uuid::parse_str(&row.0)
                .map_err(|e| FaultlineError::database_error(&format!("Bad job id: {}", e)))?,
            workspace_id: row.1,
            source: JobSource::parse(&row.2).unwrap_or(JobSource::Web),
            status: JobStatus::parse(&row.3).unwrap_or(JobStatus::Failed),
            requested_context,
            report: row.5,
            error_message: row.6,
            error_type: row.7,
            backoff_until: parse_timestamp(row.8),
            started_at: parse_timestamp(row.9),
            finished_at: parse_timestamp(row.10),
            created_at: parse_timestamp(Some(row.11)).unwrap_or_else(Utc::now),
            metrics,
        })
    }
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
}
