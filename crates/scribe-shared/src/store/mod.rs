//! # Task Store
//!
//! All durable state lives behind `TaskStore`. Every state advance is a
//! conditional update guarded by the expected source state: zero rows
//! affected means another actor won the race and the caller must abandon the
//! action. No component reads state and writes it back without a guard.
//!
//! The store also implements the transactional outbox: "persist this result
//! and dispatch a follow-on job" commits as one transaction, and the relay
//! claims pending rows under `FOR UPDATE SKIP LOCKED` so concurrent relays
//! never double-publish a row mid-claim.

use std::future::Future;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::errors::{ScribeError, ScribeResult};
use crate::messaging::{TaskKind, TaskMessage, TaskOptions};
use crate::models::{OutboxEvent, Task, TaskResult, TaskState};

/// Embedded migrations, also used by `#[sqlx::test(migrator = …)]`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Open the connection pool from configuration.
pub async fn connect_pool(config: &DatabaseConfig) -> ScribeResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;
    Ok(pool)
}

const TASK_COLUMNS: &str = "id, user_id, status, file_path, error_message, created_at, updated_at";

/// Outcome of an owner-scoped cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The task moved to `cancelled`.
    Cancelled,
    /// No task with this id belongs to the caller.
    NotFound,
    /// The task exists but already reached a terminal state.
    NotCancellable,
}

/// Counters returned by an outbox claim pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboxBatchStats {
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct TaskStore {
    pool: PgPool,
}

impl TaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Liveness probe for health reporting.
    pub async fn ping(&self) -> ScribeResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // =========================================================================
    // Task lifecycle
    // =========================================================================

    /// Insert a new pending task and its STT outbox row in one transaction,
    /// so a created task is guaranteed to eventually be dispatched.
    pub async fn create_task_with_outbox(
        &self,
        task_id: Uuid,
        owner: &str,
        file_path: &str,
        message: &TaskMessage,
    ) -> ScribeResult<Task> {
        let mut tx = self.pool.begin().await?;

        let task = sqlx::query_as::<_, Task>(&format!(
            "INSERT INTO tasks (id, user_id, status, file_path) \
             VALUES ($1, $2, 'pending', $3) RETURNING {TASK_COLUMNS}"
        ))
        .bind(task_id)
        .bind(owner)
        .bind(file_path)
        .fetch_one(&mut *tx)
        .await?;

        insert_outbox_row(&mut tx, task_id, TaskKind::Stt, message).await?;

        tx.commit().await?;
        Ok(task)
    }

    pub async fn get_task(&self, task_id: Uuid) -> ScribeResult<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(task)
    }

    pub async fn get_owned_task(&self, task_id: Uuid, owner: &str) -> ScribeResult<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 AND user_id = $2"
        ))
        .bind(task_id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;
        Ok(task)
    }

    /// Conditional state transition; refreshes `updated_at`.
    ///
    /// Fails with [`ScribeError::StateConflict`] when no row matches
    /// `(task_id, from)`.
    pub async fn transition(&self, task_id: Uuid, from: TaskState, to: TaskState) -> ScribeResult<()> {
        let result = sqlx::query(
            "UPDATE tasks SET status = $3, updated_at = now() WHERE id = $1 AND status = $2",
        )
        .bind(task_id)
        .bind(from)
        .bind(to)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ScribeError::StateConflict {
                task_id,
                expected: from,
                requested: to,
            });
        }
        Ok(())
    }

    /// Guarded `from→failed` transition recording the error message.
    pub async fn transition_failed(
        &self,
        task_id: Uuid,
        from: TaskState,
        error: &str,
    ) -> ScribeResult<()> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'failed', error_message = $3, updated_at = now() \
             WHERE id = $1 AND status = $2",
        )
        .bind(task_id)
        .bind(from)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ScribeError::StateConflict {
                task_id,
                expected: from,
                requested: TaskState::Failed,
            });
        }
        Ok(())
    }

    /// Owner-scoped cancel restricted to non-terminal states.
    pub async fn cancel_owned(&self, task_id: Uuid, owner: &str) -> ScribeResult<CancelOutcome> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'cancelled', updated_at = now() \
             WHERE id = $1 AND user_id = $2 AND status IN ('pending', 'processing')",
        )
        .bind(task_id)
        .bind(owner)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(CancelOutcome::Cancelled);
        }

        let exists: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM tasks WHERE id = $1 AND user_id = $2")
                .bind(task_id)
                .bind(owner)
                .fetch_optional(&self.pool)
                .await?;

        Ok(match exists {
            Some(_) => CancelOutcome::NotCancellable,
            None => CancelOutcome::NotFound,
        })
    }

    /// Delete an owned task; results cascade. Returns whether a row went.
    pub async fn delete_task(&self, task_id: Uuid, owner: &str) -> ScribeResult<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1 AND user_id = $2")
            .bind(task_id)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Bulk `processing→failed` for tasks whose `updated_at` is older than
    /// `now − timeout`. Returns the reaped task ids.
    pub async fn reap_stale_processing(&self, timeout: Duration) -> ScribeResult<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "UPDATE tasks SET status = 'failed', error_message = 'processing timed out', \
             updated_at = now() \
             WHERE status = 'processing' \
               AND updated_at < now() - ($1::double precision * interval '1 second') \
             RETURNING id",
        )
        .bind(timeout.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    // =========================================================================
    // Results
    // =========================================================================

    /// Upsert the result row. Empty strings preserve the stored column so
    /// the transcript and summary stages write independently.
    pub async fn upsert_result(
        &self,
        task_id: Uuid,
        transcript: &str,
        summary: &str,
    ) -> ScribeResult<()> {
        sqlx::query(UPSERT_RESULT_SQL)
            .bind(task_id)
            .bind(transcript)
            .bind(summary)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_result(&self, task_id: Uuid) -> ScribeResult<Option<TaskResult>> {
        let result = sqlx::query_as::<_, TaskResult>(
            "SELECT task_id, transcript, summary, updated_at FROM task_results WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(result)
    }

    /// One transaction: persist the transcript and insert the SUMMARY outbox
    /// row. Guarantees "transcript persisted ⇔ summary job will be
    /// dispatched".
    pub async fn save_transcript_and_enqueue(
        &self,
        task_id: Uuid,
        transcript: &str,
        message: &TaskMessage,
    ) -> ScribeResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(UPSERT_RESULT_SQL)
            .bind(task_id)
            .bind(transcript)
            .bind("")
            .execute(&mut *tx)
            .await?;

        insert_outbox_row(&mut tx, task_id, TaskKind::Summary, message).await?;

        tx.commit().await?;
        Ok(())
    }

    /// One transaction: persist the final summary and take the guarded
    /// `processing→completed` transition. A conflict rolls everything back.
    pub async fn complete_with_summary(&self, task_id: Uuid, summary: &str) -> ScribeResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(UPSERT_RESULT_SQL)
            .bind(task_id)
            .bind("")
            .bind(summary)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            "UPDATE tasks SET status = 'completed', updated_at = now() \
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ScribeError::StateConflict {
                task_id,
                expected: TaskState::Processing,
                requested: TaskState::Completed,
            });
        }

        tx.commit().await?;
        Ok(())
    }

    /// One transaction: require a stored transcript, take the guarded
    /// `completed→processing` transition (owner-scoped), and enqueue a
    /// SUMMARY outbox row carrying the transcript.
    pub async fn resummarize(
        &self,
        task_id: Uuid,
        owner: &str,
        options: TaskOptions,
    ) -> ScribeResult<()> {
        let mut tx = self.pool.begin().await?;

        let transcript: Option<String> =
            sqlx::query_scalar("SELECT transcript FROM task_results WHERE task_id = $1")
                .bind(task_id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(transcript) = transcript.filter(|t| !t.is_empty()) else {
            return Err(ScribeError::MissingTranscript { task_id });
        };

        let result = sqlx::query(
            "UPDATE tasks SET status = 'processing', updated_at = now() \
             WHERE id = $1 AND user_id = $2 AND status = 'completed'",
        )
        .bind(task_id)
        .bind(owner)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ScribeError::StateConflict {
                task_id,
                expected: TaskState::Completed,
                requested: TaskState::Processing,
            });
        }

        let message = TaskMessage::summary(task_id, owner, transcript, options);
        insert_outbox_row(&mut tx, task_id, TaskKind::Summary, &message).await?;

        tx.commit().await?;
        Ok(())
    }

    // =========================================================================
    // Outbox
    // =========================================================================

    /// Claim up to `limit` oldest pending outbox rows under row locks that
    /// skip contended rows, invoke `handler` per row, and mark successful
    /// rows `sent` within the claiming transaction. Rows whose handler fails
    /// stay pending for a later pass.
    pub async fn claim_outbox_batch<F, Fut>(
        &self,
        limit: i64,
        mut handler: F,
    ) -> ScribeResult<OutboxBatchStats>
    where
        F: FnMut(OutboxEvent) -> Fut,
        Fut: Future<Output = ScribeResult<()>>,
    {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query_as::<_, OutboxEvent>(
            "SELECT id, aggregate_id, event_type, payload, status, created_at, processed_at \
             FROM outbox_events WHERE status = 'pending' \
             ORDER BY created_at, id LIMIT $1 \
             FOR UPDATE SKIP LOCKED",
        )
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        let mut stats = OutboxBatchStats {
            claimed: rows.len(),
            ..Default::default()
        };

        for event in rows {
            let event_id = event.id;
            let aggregate_id = event.aggregate_id;

            match handler(event).await {
                Ok(()) => {
                    sqlx::query(
                        "UPDATE outbox_events SET status = 'sent', processed_at = now() \
                         WHERE id = $1",
                    )
                    .bind(event_id)
                    .execute(&mut *tx)
                    .await?;
                    stats.sent += 1;
                }
                Err(error) => {
                    warn!(
                        outbox_id = %event_id,
                        task_id = %aggregate_id,
                        error = %error,
                        "outbox publish failed; row stays pending"
                    );
                    stats.failed += 1;
                }
            }
        }

        tx.commit().await?;
        Ok(stats)
    }
}

const UPSERT_RESULT_SQL: &str = "INSERT INTO task_results (task_id, transcript, summary, updated_at) \
     VALUES ($1, $2, $3, now()) \
     ON CONFLICT (task_id) DO UPDATE SET \
       transcript = CASE WHEN EXCLUDED.transcript <> '' THEN EXCLUDED.transcript \
                         ELSE task_results.transcript END, \
       summary = CASE WHEN EXCLUDED.summary <> '' THEN EXCLUDED.summary \
                      ELSE task_results.summary END, \
       updated_at = now()";

async fn insert_outbox_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    aggregate_id: Uuid,
    kind: TaskKind,
    message: &TaskMessage,
) -> ScribeResult<()> {
    sqlx::query(
        "INSERT INTO outbox_events (id, aggregate_id, event_type, payload) \
         VALUES ($1, $2, $3, $4)",
    )
    .bind(Uuid::now_v7())
    .bind(aggregate_id)
    .bind(kind)
    .bind(serde_json::to_value(message)?)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
