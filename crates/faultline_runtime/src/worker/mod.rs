// Job orchestrator. Polls the queue, enforces the dequeue contract
// (idempotent double-delivery handling, backoff re-enqueue), preprocesses
// workspace context, drives the RCA engine, and delivers results. A job is
// marked FAILED through exactly one path: `fail_and_notify_job`.

pub mod preprocess;
pub mod queue;

use crate::database::jobs::JobOps;
use crate::database::reviews::ReviewOps;
use crate::database::Database;
use crate::engines::progress::{ProgressConfig, ProgressReporter, ProgressSink, SlackSink};
use crate::engines::streaming::{WebChannels, WebSink};
use crate::engines::FaultlineEngines;
use crate::errors::{ErrorCategory, ErrorCode, ErrorSeverity, FaultlineError, FaultlineResult};
use crate::pii;
use crate::types::{Job, JobId, JobSource, JobStatus, RequestedContext};
use chrono::Utc;
use preprocess::Preprocessor;
use queue::{JobQueue, QueueMessage, MAX_QUEUE_DELAY};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub max_receive: u32,
    pub poll_wait: Duration,
    pub max_queue_delay: Duration,
    pub progress: ProgressConfig,
    /// Base URL for remediation links on configuration errors.
    pub app_base_url: String,
    pub slack_token: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_receive: 5,
            poll_wait: Duration::from_secs(10),
            max_queue_delay: MAX_QUEUE_DELAY,
            progress: ProgressConfig::default(),
            app_base_url: "https://app.faultline.dev".to_string(),
            slack_token: None,
        }
    }
}

/// Create a job and dispatch it. The query is PII-masked here so nothing
/// sensitive reaches the queue, the model, or the logs; the reversible
/// mapping is stored on the job for unmasking at delivery time.
pub async fn enqueue_job(
    db: &Database,
    job_queue: &dyn JobQueue,
    workspace_id: &str,
    source: JobSource,
    raw_query: &str,
    mut context: RequestedContext,
) -> FaultlineResult<JobId> {
    let (masked, mapping) = pii::mask(raw_query);
    context.query = masked;
    context.pii_mapping = mapping;

    let job_id = JobOps::create(db.pool(), workspace_id, source, &context).await?;
    job_queue
        .send(job_id, None)
        .await
        .map_err(|e| {
            FaultlineError::new(
                ErrorCode::QueueError,
                ErrorCategory::Queue,
                ErrorSeverity::High,
                &format!("Failed to dispatch job: {}", e),
            )
        })?;
    info!(%job_id, workspace_id, source = source.as_str(), "job enqueued");
    Ok(job_id)
}

pub struct JobWorker {
    db: Database,
    job_queue: Arc<dyn JobQueue>,
    engines: Arc<FaultlineEngines>,
    preprocessor: Preprocessor,
    web_channels: WebChannels,
    config: WorkerConfig,
}

impl JobWorker {
    pub fn new(
        db: Database,
        job_queue: Arc<dyn JobQueue>,
        engines: Arc<FaultlineEngines>,
        preprocessor: Preprocessor,
        web_channels: WebChannels,
        config: WorkerConfig,
    ) -> Self {
        Self {
            db,
            job_queue,
            engines,
            preprocessor,
            web_channels,
            config,
        }
    }

    /// Poll loop. One message is processed at a time per worker process;
    /// horizontal scaling is more processes, not in-process parallelism.
    pub async fn run(&self) {
        info!("job worker started");
        loop {
            if let Err(e) = self.maybe_enqueue_due_reviews().await {
                warn!(error = %e, "review schedule check failed");
            }
            match self.poll_once().await {
                Ok(0) => {}
                Ok(n) => debug!(processed = n, "poll batch finished"),
                Err(e) => {
                    error!(error = %e, "queue receive failed, backing off");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    /// Receive and process one batch. Returns the number of messages seen.
    pub async fn poll_once(&self) -> FaultlineResult<usize> {
        let messages = self
            .job_queue
            .receive(self.config.max_receive, self.config.poll_wait)
            .await
            .map_err(|e| {
                FaultlineError::new(
                    ErrorCode::QueueError,
                    ErrorCategory::Queue,
                    ErrorSeverity::Medium,
                    &e.to_string(),
                )
            })?;

        let count = messages.len();
        for message in messages {
            self.process_message(message).await;
        }
        Ok(count)
    }

    /// Handle one delivery end to end. Never returns an error: every failure
    /// path funnels into `fail_and_notify_job` or is logged and dropped.
    pub async fn process_message(&self, message: QueueMessage) {
        let job_id = message.job_id;

        let job = match JobOps::get(self.db.pool(), job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                // Double delivery for a job another record system dropped
                warn!(%job_id, "message for unknown job, dropping");
                self.ack(&message).await;
                return;
            }
            Err(e) => {
                error!(%job_id, error = %e, "job lookup failed, leaving message for redelivery");
                return;
            }
        };

        // At-least-once delivery: a job already picked up (or finished) is
        // never reprocessed.
        if job.status != JobStatus::Queued {
            debug!(%job_id, status = job.status.as_str(), "stale delivery, dropping");
            self.ack(&message).await;
            return;
        }

        // Backoff: defer via delayed re-enqueue instead of sleeping a worker.
        if let Some(backoff_until) = job.backoff_until {
            let now = Utc::now();
            if backoff_until > now {
                let remaining = (backoff_until - now)
                    .to_std()
                    .unwrap_or(self.config.max_queue_delay);
                let delay = remaining.min(self.config.max_queue_delay);
                debug!(%job_id, delay_s = delay.as_secs(), "job in backoff, re-enqueueing");
                if let Err(e) = self.job_queue.send(job_id, Some(delay)).await {
                    error!(%job_id, error = %e, "backoff re-enqueue failed");
                }
                self.ack(&message).await;
                return;
            }
        }

        match JobOps::mark_running(self.db.pool(), job_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(%job_id, "lost the dequeue race, dropping");
                self.ack(&message).await;
                return;
            }
            Err(e) => {
                error!(%job_id, error = %e, "failed to mark job running");
                self.ack(&message).await;
                return;
            }
        }

        let reporter = Arc::new(ProgressReporter::new(
            self.make_sink(&job).await,
            self.config.progress.clone(),
        ));

        // Unrecoverable errors inside the job body still mark the job FAILED
        // so a crash never leaves it stuck in RUNNING.
        if let Err(e) = self.run_job(&job, reporter.clone()).await {
            self.fail_and_notify_job(&job, &e, reporter).await;
        }

        self.ack(&message).await;
    }

    async fn run_job(&self, job: &Job, reporter: Arc<ProgressReporter>) -> FaultlineResult<()> {
        info!(job_id = %job.id, workspace_id = %job.workspace_id, "job started");

        // Hard/soft dependency preprocessing, once per job
        let prepared = self.preprocessor.prepare(&job.workspace_id).await?;

        let context = self
            .engines
            .capability_resolver
            .resolve(&job.workspace_id)
            .await?;
        let mut context = context
            .with_service_mapping(prepared.service_mapping)
            .with_thread_history(job.requested_context.thread_history.clone());
        context.environment = prepared.environment;
        context.ownership = prepared.ownership;

        let result = self
            .engines
            .rca
            .analyze_with_retry(&job.requested_context.query, context, Some(reporter.clone()))
            .await;

        if !result.success {
            return Err(FaultlineError::new(
                ErrorCode::SynthesisError,
                ErrorCategory::Rca,
                ErrorSeverity::High,
                result
                    .error
                    .as_deref()
                    .unwrap_or("analysis retries exhausted"),
            ));
        }

        // Restore masked PII only at the delivery edge
        let report = pii::unmask(&result.output, &job.requested_context.pii_mapping);

        JobOps::complete(self.db.pool(), job.id, &report, &result.metrics).await?;
        reporter.complete(&report).await;
        self.web_channels.remove(job.id).await;

        info!(
            job_id = %job.id,
            iterations = result.metrics.iterations,
            tool_calls = result.metrics.tool_call_count,
            "job completed"
        );
        Ok(())
    }

    /// The only path allowed to mark a job FAILED. Internal error text is
    /// logged; the user sees one sanitized message, with a remediation link
    /// for configuration errors.
    async fn fail_and_notify_job(
        &self,
        job: &Job,
        error: &FaultlineError,
        reporter: Arc<ProgressReporter>,
    ) {
        error!(job_id = %job.id, error = %error, "job failed");

        let (message, action_url) = if error.is_configuration() {
            (
                "The investigation could not run because an integration is missing or unhealthy.",
                Some(format!("{}/settings/integrations", self.config.app_base_url)),
            )
        } else {
            (
                "The investigation failed unexpectedly. Please try again.",
                None,
            )
        };

        if let Err(e) = JobOps::fail(
            self.db.pool(),
            job.id,
            message,
            &format!("{:?}", error.code),
        )
        .await
        {
            error!(job_id = %job.id, error = %e, "failed to persist job failure");
        }

        reporter.error(message, action_url.as_deref()).await;
        self.web_channels.remove(job.id).await;
    }

    async fn make_sink(&self, job: &Job) -> Arc<dyn ProgressSink> {
        if job.source == JobSource::Slack {
            if let (Some(token), Some(channel)) = (
                self.config.slack_token.clone(),
                job.requested_context.slack_channel.clone(),
            ) {
                match SlackSink::new(token, channel, job.requested_context.slack_thread_ts.clone())
                {
                    Ok(sink) => return Arc::new(sink),
                    Err(e) => warn!(error = %e, "slack sink unavailable, falling back to web"),
                }
            }
        }
        Arc::new(WebSink::new(self.web_channels.sender(job.id).await))
    }

    async fn ack(&self, message: &QueueMessage) {
        if let Err(e) = self.job_queue.delete(&message.receipt).await {
            warn!(receipt = %message.receipt, error = %e, "queue delete failed");
        }
    }

    /// Enqueue review jobs for schedules whose cadence elapsed.
    pub async fn maybe_enqueue_due_reviews(&self) -> FaultlineResult<usize> {
        let due = ReviewOps::due_schedules(self.db.pool(), Utc::now()).await?;
        let count = due.len();
        for schedule in due {
            let query = format!(
                "Run the scheduled health review for service '{}'",
                schedule.service_name
            );
            let context = RequestedContext::default();
            match enqueue_job(
                &self.db,
                self.job_queue.as_ref(),
                &schedule.workspace_id,
                JobSource::Web,
                &query,
                context,
            )
            .await
            {
                Ok(job_id) => {
                    debug!(%job_id, service = %schedule.service_name, "review job enqueued");
                    ReviewOps::mark_run(self.db.pool(), schedule.id).await?;
                }
                Err(e) => warn!(error = %e, service = %schedule.service_name, "review enqueue failed"),
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::capability::test_support::StubProber;
    use crate::engines::llm::providers::scripted::ScriptedProvider;
    use crate::engines::llm::{LlmHandler, LlmHandlerConfig};
    use crate::engines::rca::RcaConfig;
    use crate::tools::code::test_support::StubCodeHost;
    use crate::tools::observability::ObservabilityGateway;
    use crate::types::{HealthStatus, Integration, ReviewSchedule};
    use crate::worker::preprocess::test_support::StubMetadata;
    use crate::worker::preprocess::PreprocessConfig;
    use crate::worker::queue::InMemoryQueue;
    use async_trait::async_trait;
    use uuid::Uuid;

    struct NoopGateway;

    #[async_trait]
    impl ObservabilityGateway for NoopGateway {
        async fn query_logs(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: u64,
        ) -> FaultlineResult<Vec<String>> {
            Ok(Vec::new())
        }
        async fn query_metrics(&self, _: &str, _: &str, _: u64) -> FaultlineResult<String> {
            Ok(String::new())
        }
        async fn active_alerts(&self, _: &str) -> FaultlineResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    struct Harness {
        db: Database,
        queue: Arc<InMemoryQueue>,
        worker: JobWorker,
    }

    async fn harness(script: Vec<&str>) -> Harness {
        let db = Database::in_memory().await.unwrap();
        let queue = Arc::new(InMemoryQueue::new());

        let handler = LlmHandler::new(LlmHandlerConfig {
            max_retries: 0,
            ..Default::default()
        });
        handler
            .register_provider(Arc::new(ScriptedProvider::with_contents(script)))
            .await;
        let llm = Arc::new(handler);

        let code_host = Arc::new(StubCodeHost::reachable(vec!["org/app"]));
        let engines = Arc::new(FaultlineEngines::new(
            db.clone(),
            llm,
            Arc::new(NoopGateway),
            code_host.clone(),
            Arc::new(StubProber::new(vec![("github", HealthStatus::Healthy)])),
            RcaConfig {
                retry_attempts: 0,
                ..Default::default()
            },
        ));

        let preprocessor = Preprocessor::new(
            db.clone(),
            code_host,
            Arc::new(StubMetadata { fail: false }),
            PreprocessConfig::default(),
        );

        let worker = JobWorker::new(
            db.clone(),
            queue.clone(),
            engines,
            preprocessor,
            WebChannels::new(),
            WorkerConfig::default(),
        );

        Harness { db, queue, worker }
    }

    async fn seed_github(db: &Database) {
        let integration = Integration {
            id: Uuid::new_v4(),
            workspace_id: "ws-1".to_string(),
            provider: "github".to_string(),
            enabled: true,
            health_status: Some(HealthStatus::Healthy),
            last_checked_at: None,
        };
        crate::database::integrations::IntegrationOps::insert(db.pool(), &integration)
            .await
            .unwrap();
    }

    /// Conversational script: classify -> "question", then one agent answer.
    fn conversational_script() -> Vec<&'static str> {
        vec!["question", "Here is what I found earlier."]
    }

    #[tokio::test]
    async fn completed_job_redelivery_is_a_no_op() {
        let h = harness(conversational_script()).await;
        seed_github(&h.db).await;

        let job_id = enqueue_job(
            &h.db,
            h.queue.as_ref(),
            "ws-1",
            JobSource::Web,
            "what happened?",
            RequestedContext::default(),
        )
        .await
        .unwrap();

        // First delivery completes the job
        let processed = h.worker.poll_once().await.unwrap();
        assert_eq!(processed, 1);
        let job = JobOps::get(h.db.pool(), job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        let finished_at = job.finished_at;

        // Simulate at-least-once redelivery of the same message
        h.queue.send(job_id, None).await.unwrap();
        let processed = h.worker.poll_once().await.unwrap();
        assert_eq!(processed, 1);

        let job = JobOps::get(h.db.pool(), job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.finished_at, finished_at);
        // Nothing left on the queue, nothing re-enqueued
        assert_eq!(h.queue.ready_len(), 0);
        assert_eq!(h.queue.delayed_len(), 0);
    }

    #[tokio::test]
    async fn backoff_job_is_reenqueued_with_capped_delay_and_not_marked_running() {
        let h = harness(vec![]).await;
        seed_github(&h.db).await;

        let job_id = enqueue_job(
            &h.db,
            h.queue.as_ref(),
            "ws-1",
            JobSource::Web,
            "investigate later",
            RequestedContext::default(),
        )
        .await
        .unwrap();
        JobOps::set_backoff(
            h.db.pool(),
            job_id,
            Some(Utc::now() + chrono::Duration::minutes(20)),
        )
        .await
        .unwrap();

        h.worker.poll_once().await.unwrap();

        let job = JobOps::get(h.db.pool(), job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.started_at.is_none());

        let delays = h.queue.sent_delays();
        // First send (enqueue) has no delay; the re-enqueue is capped at 900s
        let (_, redelivery) = delays.last().unwrap();
        assert_eq!(*redelivery, Some(Duration::from_secs(900)));
        assert_eq!(h.queue.delayed_len(), 1);
    }

    #[tokio::test]
    async fn unknown_job_message_is_dropped() {
        let h = harness(vec![]).await;
        h.queue.send(Uuid::new_v4(), None).await.unwrap();

        let processed = h.worker.poll_once().await.unwrap();
        assert_eq!(processed, 1);
        assert_eq!(h.queue.ready_len(), 0);
    }

    #[tokio::test]
    async fn missing_github_funnels_through_fail_and_notify() {
        // No github integration seeded
        let h = harness(vec![]).await;
        let job_id = enqueue_job(
            &h.db,
            h.queue.as_ref(),
            "ws-1",
            JobSource::Web,
            "why is checkout down",
            RequestedContext::default(),
        )
        .await
        .unwrap();

        h.worker.poll_once().await.unwrap();

        let job = JobOps::get(h.db.pool(), job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        // Sanitized message, not the internal error text
        assert!(job.error_message.unwrap().contains("integration"));
        assert_eq!(job.error_type.as_deref(), Some("MissingIntegration"));
    }

    #[tokio::test]
    async fn completed_report_has_pii_unmasked() {
        // Conversational branch echoes placeholders back; delivery restores
        // the original values.
        let h = harness(vec!["question", "I looked into <email_1> and <ip_1>."]).await;
        seed_github(&h.db).await;

        let job_id = enqueue_job(
            &h.db,
            h.queue.as_ref(),
            "ws-1",
            JobSource::Web,
            "user bob@example.com reported errors from 10.0.4.17",
            RequestedContext::default(),
        )
        .await
        .unwrap();

        // The stored query is masked
        let job = JobOps::get(h.db.pool(), job_id).await.unwrap().unwrap();
        assert!(!job.requested_context.query.contains("bob@example.com"));

        h.worker.poll_once().await.unwrap();

        let job = JobOps::get(h.db.pool(), job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        let report = job.report.unwrap();
        assert!(report.contains("bob@example.com"));
        assert!(report.contains("10.0.4.17"));
    }

    #[tokio::test]
    async fn due_review_schedule_enqueues_one_job() {
        let h = harness(vec![]).await;
        ReviewOps::insert_schedule(
            h.db.pool(),
            &ReviewSchedule {
                id: Uuid::new_v4(),
                workspace_id: "ws-1".to_string(),
                service_name: "checkout".to_string(),
                interval_hours: 24,
                last_run_at: None,
            },
        )
        .await
        .unwrap();

        let enqueued = h.worker.maybe_enqueue_due_reviews().await.unwrap();
        assert_eq!(enqueued, 1);
        assert_eq!(h.queue.ready_len(), 1);

        // Second check is a no-op until the interval elapses again
        let enqueued = h.worker.maybe_enqueue_due_reviews().await.unwrap();
        assert_eq!(enqueued, 0);
    }
}
