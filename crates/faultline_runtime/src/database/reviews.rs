// Review cadence rows. Consumed by the worker to decide whether a periodic
// health-review job is due; the review pipeline itself lives elsewhere.

use crate::errors::{FaultlineError, FaultlineResult};
use crate::types::{ReviewSchedule, ServiceReview};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

pub struct ReviewOps;

impl ReviewOps {
    /// Schedules whose interval has elapsed (or that never ran).
    pub async fn due_schedules(
        pool: &SqlitePool,
        now: DateTime<Utc>,
    ) -> FaultlineResult<Vec<ReviewSchedule>> {
        let rows: Vec<(String, String, String, i64, Option<String>)> = sqlx::query_as(
            "SELECT id, workspace_id, service_name, interval_hours, last_run_at FROM review_schedules",
        )
        .fetch_all(pool)
        .await
        .map_err(|e| FaultlineError::database_error(&format!("Failed to list schedules: {}", e)))?;

        let mut due = Vec::new();
        for row in rows {
            let schedule = ReviewSchedule {
                id: Uuid::parse_str(&row.0)
                    .map_err(|e| FaultlineError::database_error(&format!("Bad schedule id: {}", e)))?,
                workspace_id: row.1,
                service_name: row.2,
                interval_hours: row.3,
                last_run_at: row
                    .4
                    .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                    .map(|t| t.with_timezone(&Utc)),
            };
            if schedule.is_due(now) {
                due.push(schedule);
            }
        }
        Ok(due)
    }

    pub async fn mark_run(pool: &SqlitePool, schedule_id: Uuid) -> FaultlineResult<()> {
        sqlx::query("UPDATE review_schedules SET last_run_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(schedule_id.to_string())
            .execute(pool)
            .await
            .map_err(|e| FaultlineError::database_error(&format!("Failed to mark schedule run: {}", e)))?;
        Ok(())
    }

    pub async fn insert_schedule(pool: &SqlitePool, schedule: &ReviewSchedule) -> FaultlineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO review_schedules (id, workspace_id, service_name, interval_hours, last_run_at)
            VALUES (?, ?, ?, ?, ?)
        "#,
        )
        .bind(schedule.id.to_string())
        .bind(&schedule.workspace_id)
        .bind(&schedule.service_name)
        .bind(schedule.interval_hours)
        .bind(schedule.last_run_at.map(|t| t.to_rfc3339()))
        .execute(pool)
        .await
        .map_err(|e| FaultlineError::database_error(&format!("Failed to insert schedule: {}", e)))?;
        Ok(())
    }

    pub async fn record_review(pool: &SqlitePool, review: &ServiceReview) -> FaultlineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO service_reviews (id, workspace_id, service_name, report, created_at)
            VALUES (?, ?, ?, ?, ?)
        "#,
        )
        .bind(review.id.to_string())
        .bind(&review.workspace_id)
        .bind(&review.service_name)
        .bind(&review.report)
        .bind(review.created_at.to_rfc3339())
        .execute(pool)
        .await
        .map_err(|e| FaultlineError::database_error(&format!("Failed to record review: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    #[tokio::test]
    async fn never_run_schedule_is_due_and_mark_run_clears_it() {
        let db = Database::in_memory().await.unwrap();
        let schedule = ReviewSchedule {
            id: Uuid::new_v4(),
            workspace_id: "ws-1".to_string(),
            service_name: "payments".to_string(),
            interval_hours: 24,
            last_run_at: None,
        };
        ReviewOps::insert_schedule(db.pool(), &schedule).await.unwrap();

        let due = ReviewOps::due_schedules(db.pool(), Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);

        ReviewOps::mark_run(db.pool(), schedule.id).await.unwrap();
        let due = ReviewOps::due_schedules(db.pool(), Utc::now()).await.unwrap();
        assert!(due.is_empty());
    }
}
