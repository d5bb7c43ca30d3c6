use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::QueueSettings;
use crate::evaluation::EvaluationRequest;
use crate::queue::{
    JobEnqueuer, JobHandler, QueueError, QueuedJob, RetryDecision, ShutdownToken,
};

/// Seconds a consumer blocks waiting for work before re-checking shutdown
/// and the delayed set.
const BLOCK_TIMEOUT_SECS: u64 = 1;
const ERROR_PAUSE: Duration = Duration::from_secs(5);

/// Abandoned envelopes are kept this long for inspection.
const PARKED_JOB_TTL_SECS: u64 = 7 * 24 * 60 * 60;
/// Newest abandoned ids kept in the `failed` list.
const FAILED_LIST_LIMIT: isize = 1000;

/// Redis-list queue.
///
/// Keys under the queue name:
/// - `wait`    list of ready job ids (LPUSH in, BRPOPLPUSH out)
/// - `active`  list of ids currently being handled
/// - `delayed` sorted set of ids scored by due time in epoch ms
/// - `failed`  list of abandoned ids, capped at `FAILED_LIST_LIMIT`
/// - `job:{id}` the JSON `QueuedJob` envelope; expires once parked
pub struct RedisJobQueue {
    client: redis::Client,
    conn: MultiplexedConnection,
    settings: QueueSettings,
}

impl RedisJobQueue {
    pub async fn connect(client: redis::Client, settings: QueueSettings) -> Result<Self, QueueError> {
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            client,
            conn,
            settings,
        })
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.settings.name, suffix)
    }

    fn job_key(&self, id: &str) -> String {
        format!("{}:job:{}", self.settings.name, id)
    }

    /// Moves ids left in `active` by a previous process back to `wait`.
    /// Only safe while no other consumer process shares the queue.
    pub async fn recover_stalled(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let active_key = self.key("active");
        let wait_key = self.key("wait");

        let stalled: Vec<String> = redis::cmd("LRANGE")
            .arg(&active_key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;

        for id in &stalled {
            // RPUSH puts recovered ids at the consuming end of `wait`
            let _: () = redis::pipe()
                .atomic()
                .cmd("LREM")
                .arg(&active_key)
                .arg(1)
                .arg(id)
                .ignore()
                .cmd("RPUSH")
                .arg(&wait_key)
                .arg(id)
                .ignore()
                .query_async(&mut conn)
                .await?;
        }

        if !stalled.is_empty() {
            warn!(queue = %self.settings.name, count = stalled.len(), "Recovered stalled jobs");
        }
        Ok(stalled.len())
    }

    /// Consumer loop. Runs until `shutdown` is triggered; a job already being
    /// handled is finished first.
    pub async fn run(
        &self,
        consumer: usize,
        handler: Arc<dyn JobHandler>,
        shutdown: ShutdownToken,
    ) -> Result<(), QueueError> {
        // Blocking pops get a dedicated connection so they never stall producers
        let mut blocking = self.client.get_multiplexed_async_connection().await?;
        let wait_key = self.key("wait");
        let active_key = self.key("active");

        info!(queue = %self.settings.name, consumer, "Queue consumer started");

        while !shutdown.is_triggered() {
            if let Err(e) = self.promote_due().await {
                warn!(queue = %self.settings.name, error = %e, "Failed to promote delayed jobs");
            }

            let next: Result<Option<String>, redis::RedisError> = redis::cmd("BRPOPLPUSH")
                .arg(&wait_key)
                .arg(&active_key)
                .arg(BLOCK_TIMEOUT_SECS)
                .query_async(&mut blocking)
                .await;

            match next {
                Ok(Some(id)) => {
                    if let Err(e) = self.deliver(&id, handler.as_ref()).await {
                        error!(job_id = %id, error = %e, "Failed to settle job");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!(queue = %self.settings.name, error = %e, "Error reading from Redis queue");
                    tokio::time::sleep(ERROR_PAUSE).await;
                }
            }
        }

        info!(queue = %self.settings.name, consumer, "Queue consumer stopped");
        Ok(())
    }

    /// Moves delayed jobs whose due time has passed back onto `wait`.
    async fn promote_due(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let delayed_key = self.key("delayed");
        let wait_key = self.key("wait");

        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&delayed_key)
            .arg("-inf")
            .arg(Utc::now().timestamp_millis())
            .query_async(&mut conn)
            .await?;

        let mut promoted = 0;
        for id in due {
            // ZREM decides the winner when several consumers see the same id
            let removed: i64 = redis::cmd("ZREM")
                .arg(&delayed_key)
                .arg(&id)
                .query_async(&mut conn)
                .await?;
            if removed == 1 {
                let _: () = redis::cmd("LPUSH")
                    .arg(&wait_key)
                    .arg(&id)
                    .query_async(&mut conn)
                    .await?;
                debug!(job_id = %id, "Promoted delayed job");
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    async fn deliver(&self, id: &str, handler: &dyn JobHandler) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let job_key = self.job_key(id);
        let active_key = self.key("active");

        let raw: Option<String> = redis::cmd("GET")
            .arg(&job_key)
            .query_async(&mut conn)
            .await?;

        let mut job: QueuedJob = match raw.as_deref().map(serde_json::from_str::<QueuedJob>) {
            Some(Ok(job)) => job,
            Some(Err(e)) => {
                error!(job_id = %id, error = %e, "Job envelope is unreadable; parking it");
                return self.park(&mut conn, id).await;
            }
            None => {
                warn!(job_id = %id, "Job envelope missing; dropping delivery");
                let _: () = redis::cmd("LREM")
                    .arg(&active_key)
                    .arg(1)
                    .arg(id)
                    .query_async(&mut conn)
                    .await?;
                return Ok(());
            }
        };

        debug!(job_id = %id, attempt = job.attempts_made + 1, "Delivering job");

        match handler.handle(&job.to_evaluation_job()).await {
            Ok(()) => {
                let _: () = redis::pipe()
                    .atomic()
                    .cmd("LREM")
                    .arg(&active_key)
                    .arg(1)
                    .arg(id)
                    .ignore()
                    .cmd("DEL")
                    .arg(&job_key)
                    .ignore()
                    .query_async(&mut conn)
                    .await?;
                Ok(())
            }
            Err(err) => {
                let decision = job.record_failure(format!("{err:#}"));
                let payload = serde_json::to_string(&job)?;

                match decision {
                    RetryDecision::Retry(delay) => {
                        warn!(
                            job_id = %id,
                            attempts_made = job.attempts_made,
                            max_attempts = job.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Job attempt failed; scheduling retry"
                        );
                        let due = Utc::now().timestamp_millis() + delay.as_millis() as i64;
                        let _: () = redis::pipe()
                            .atomic()
                            .cmd("SET")
                            .arg(&job_key)
                            .arg(&payload)
                            .ignore()
                            .cmd("LREM")
                            .arg(&active_key)
                            .arg(1)
                            .arg(id)
                            .ignore()
                            .cmd("ZADD")
                            .arg(self.key("delayed"))
                            .arg(due)
                            .arg(id)
                            .ignore()
                            .query_async(&mut conn)
                            .await?;
                    }
                    RetryDecision::Abandon => {
                        error!(
                            job_id = %id,
                            attempts_made = job.attempts_made,
                            error = %err,
                            "Job attempts exhausted; abandoning"
                        );
                        let _: () = redis::cmd("SET")
                            .arg(&job_key)
                            .arg(&payload)
                            .query_async(&mut conn)
                            .await?;
                        self.park(&mut conn, id).await?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Moves an id from `active` to `failed`.
    async fn park(&self, conn: &mut MultiplexedConnection, id: &str) -> Result<(), QueueError> {
        let _: () = park_pipeline(&self.settings.name, id)
            .query_async(conn)
            .await?;
        Ok(())
    }
}

/// Parks `id` and bounds what abandoned jobs leave behind: the envelope
/// expires and the `failed` list keeps only the newest ids.
fn park_pipeline(queue: &str, id: &str) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic()
        .cmd("LREM")
        .arg(format!("{queue}:active"))
        .arg(1)
        .arg(id)
        .ignore()
        .cmd("LPUSH")
        .arg(format!("{queue}:failed"))
        .arg(id)
        .ignore()
        .cmd("LTRIM")
        .arg(format!("{queue}:failed"))
        .arg(0)
        .arg(FAILED_LIST_LIMIT - 1)
        .ignore()
        .cmd("EXPIRE")
        .arg(format!("{queue}:job:{id}"))
        .arg(PARKED_JOB_TTL_SECS)
        .ignore();
    pipe
}

#[async_trait]
impl JobEnqueuer for RedisJobQueue {
    async fn enqueue(&self, request: EvaluationRequest) -> Result<String, QueueError> {
        let mut conn = self.conn.clone();
        let job = QueuedJob::new(Uuid::new_v4().to_string(), request, &self.settings);
        let payload = serde_json::to_string(&job)?;

        let _: () = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(self.job_key(&job.id))
            .arg(payload)
            .ignore()
            .cmd("LPUSH")
            .arg(self.key("wait"))
            .arg(&job.id)
            .ignore()
            .query_async(&mut conn)
            .await?;

        info!(job_id = %job.id, queue = %self.settings.name, "Job enqueued");
        Ok(job.id)
    }
}
