// Progress side-channel. Purely advisory: a sink failure must never affect
// RCA correctness, so every reporter method swallows errors behind the
// circuit breaker and logs instead of propagating.

use crate::errors::{ErrorCategory, ErrorCode, ErrorSeverity, FaultlineError, FaultlineResult};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Opaque handle to a previously sent message, used for update-in-place.
pub type MessageRef = String;

/// Delivery channel for progress and completion messages. Slack and Web
/// implement the same semantic operations.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn post_message(&self, text: &str) -> FaultlineResult<MessageRef>;
    async fn update_message(&self, message: &MessageRef, text: &str) -> FaultlineResult<()>;
    async fn send_error(&self, message: &str, action_url: Option<&str>) -> FaultlineResult<()>;
    async fn send_complete(&self, text: &str) -> FaultlineResult<()>;
}

/// Failure-count breaker for a flaky notification channel. Opens after
/// `threshold` consecutive failures and stays open for the remainder of the
/// job; any success resets the streak.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    consecutive_failures: u32,
    open: bool,
    warned: bool,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            consecutive_failures: 0,
            open: false,
            warned: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.open = false;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.threshold && !self.open {
            self.open = true;
            if !self.warned {
                self.warned = true;
                warn!(
                    threshold = self.threshold,
                    "progress channel circuit breaker opened, suppressing further sends"
                );
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressConfig {
    pub breaker_threshold: u32,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self { breaker_threshold: 3 }
    }
}

struct StepState {
    message: MessageRef,
    label: String,
}

/// Per-job reporter. Implements the live-progress illusion: each new step
/// first rewrites the previous hourglass message to a checkmark, then posts
/// its own hourglass, using only update-in-place operations.
pub struct ProgressReporter {
    sink: Arc<dyn ProgressSink>,
    breaker: Mutex<CircuitBreaker>,
    last_step: Mutex<Option<StepState>>,
}

impl ProgressReporter {
    pub fn new(sink: Arc<dyn ProgressSink>, config: ProgressConfig) -> Self {
        Self {
            sink,
            breaker: Mutex::new(CircuitBreaker::new(config.breaker_threshold)),
            last_step: Mutex::new(None),
        }
    }

    pub async fn step_started(&self, label: &str) {
        self.finalize_previous_step("✅").await;
        if let Some(message) = self.guarded_post(&format!("⏳ {}", label)).await {
            *self.last_step.lock().await = Some(StepState {
                message,
                label: label.to_string(),
            });
        }
    }

    pub async fn tool_started(&self, tool: &str) {
        self.step_started(&format!("Running {}", tool)).await;
    }

    pub async fn tool_finished(&self, tool: &str) {
        debug!(tool, "tool finished");
    }

    pub async fn tool_failed(&self, tool: &str, error: &str) {
        self.finalize_previous_step("⚠️").await;
        debug!(tool, error, "tool failed");
    }

    pub async fn agent_finished(&self, summary: &str) {
        self.finalize_previous_step("✅").await;
        debug!(summary, "agent finished");
    }

    pub async fn error(&self, message: &str, action_url: Option<&str>) {
        self.finalize_previous_step("❌").await;
        self.guarded(self.sink.send_error(message, action_url)).await;
    }

    pub async fn complete(&self, text: &str) {
        self.finalize_previous_step("✅").await;
        self.guarded(self.sink.send_complete(text)).await;
    }

    async fn finalize_previous_step(&self, marker: &str) {
        let previous = self.last_step.lock().await.take();
        if let Some(step) = previous {
            let text = format!("{} {}", marker, step.label);
            self.guarded(self.sink.update_message(&step.message, &text)).await;
        }
    }

    async fn guarded_post(&self, text: &str) -> Option<MessageRef> {
        if self.breaker.lock().await.is_open() {
            return None;
        }
        match self.sink.post_message(text).await {
            Ok(message) => {
                self.breaker.lock().await.record_success();
                Some(message)
            }
            Err(e) => {
                debug!(error = %e, "progress post failed");
                self.breaker.lock().await.record_failure();
                None
            }
        }
    }

    async fn guarded<F>(&self, op: F)
    where
        F: std::future::Future<Output = FaultlineResult<()>>,
    {
        if self.breaker.lock().await.is_open() {
            return;
        }
        match op.await {
            Ok(()) => self.breaker.lock().await.record_success(),
            Err(e) => {
                debug!(error = %e, "progress send failed");
                self.breaker.lock().await.record_failure();
            }
        }
    }
}

// ==========================================
// SLACK SINK
// ==========================================

/// Slack Web API sink: chat.postMessage for new messages, chat.update for
/// the hourglass rewrites, feedback action buttons on completion.
pub struct SlackSink {
    client: Client,
    token: String,
    channel: String,
    thread_ts: Option<String>,
}

impl SlackSink {
    pub fn new(token: String, channel: String, thread_ts: Option<String>) -> FaultlineResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                FaultlineError::new(
                    ErrorCode::NetworkError,
                    ErrorCategory::Notification,
                    ErrorSeverity::Medium,
                    &format!("Failed to create HTTP client: {}", e),
                )
            })?;
        Ok(Self {
            client,
            token,
            channel,
            thread_ts,
        })
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> FaultlineResult<serde_json::Value> {
        let response = self
            .client
            .post(format!("https://slack.com/api/{}", method))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                FaultlineError::new(
                    ErrorCode::NotificationError,
                    ErrorCategory::Notification,
                    ErrorSeverity::Low,
                    &format!("Slack request failed: {}", e),
                )
            })?;

        let payload: serde_json::Value = response.json().await.map_err(|e| {
            FaultlineError::new(
                ErrorCode::NotificationError,
                ErrorCategory::Notification,
                ErrorSeverity::Low,
                &format!("Slack response unreadable: {}", e),
            )
        })?;

        if payload.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            let reason = payload
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            return Err(FaultlineError::new(
                ErrorCode::NotificationError,
                ErrorCategory::Notification,
                ErrorSeverity::Low,
                &format!("Slack API error: {}", reason),
            ));
        }

        Ok(payload)
    }

    fn base_body(&self, text: &str) -> serde_json::Value {
        let mut body = json!({
            "channel": self.channel,
            "text": text,
        });
        if let Some(ts) = &self.thread_ts {
            body["thread_ts"] = json!(ts);
        }
        body
    }
}

#[async_trait]
impl ProgressSink for SlackSink {
    async fn post_message(&self, text: &str) -> FaultlineResult<MessageRef> {
        let payload = self.call("chat.postMessage", self.base_body(text)).await?;
        payload
            .get("ts")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| {
                FaultlineError::new(
                    ErrorCode::NotificationError,
                    ErrorCategory::Notification,
                    ErrorSeverity::Low,
                    "Slack postMessage returned no ts",
                )
            })
    }

    async fn update_message(&self, message: &MessageRef, text: &str) -> FaultlineResult<()> {
        let body = json!({
            "channel": self.channel,
            "ts": message,
            "text": text,
        });
        self.call("chat.update", body).await?;
        Ok(())
    }

    async fn send_error(&self, message: &str, action_url: Option<&str>) -> FaultlineResult<()> {
        let text = match action_url {
            Some(url) => format!("{}\n<{}|Fix this in settings>", message, url),
            None => message.to_string(),
        };
        self.call("chat.postMessage", self.base_body(&text)).await?;
        Ok(())
    }

    async fn send_complete(&self, text: &str) -> FaultlineResult<()> {
        let mut body = self.base_body(text);
        body["blocks"] = json!([
            { "type": "section", "text": { "type": "mrkdwn", "text": text } },
            {
                "type": "actions",
                "elements": [
                    {
                        "type": "button",
                        "text": { "type": "plain_text", "text": "👍 Helpful" },
                        "action_id": "rca_feedback_up"
                    },
                    {
                        "type": "button",
                        "text": { "type": "plain_text", "text": "👎 Not helpful" },
                        "action_id": "rca_feedback_down"
                    }
                ]
            }
        ]);
        self.call("chat.postMessage", body).await?;
        Ok(())
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Sink that records every network attempt and fails on request.
    pub struct RecordingSink {
        pub attempts: AtomicUsize,
        pub failures_remaining: AtomicUsize,
        pub messages: StdMutex<Vec<String>>,
        pub updates: StdMutex<Vec<(MessageRef, String)>>,
    }

    impl RecordingSink {
        pub fn healthy() -> Self {
            Self::failing_first(0)
        }

        pub fn failing_first(failures: usize) -> Self {
            Self {
                attempts: AtomicUsize::new(0),
                failures_remaining: AtomicUsize::new(failures),
                messages: StdMutex::new(Vec::new()),
                updates: StdMutex::new(Vec::new()),
            }
        }

        pub fn attempt_count(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }

        fn attempt(&self) -> FaultlineResult<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
                return Err(FaultlineError::new(
                    ErrorCode::NotificationError,
                    ErrorCategory::Notification,
                    ErrorSeverity::Low,
                    "simulated send failure",
                ));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn post_message(&self, text: &str) -> FaultlineResult<MessageRef> {
            self.attempt()?;
            let mut messages = self.messages.lock().unwrap();
            messages.push(text.to_string());
            Ok(format!("msg-{}", messages.len()))
        }

        async fn update_message(&self, message: &MessageRef, text: &str) -> FaultlineResult<()> {
            self.attempt()?;
            self.updates.lock().unwrap().push((message.clone(), text.to_string()));
            Ok(())
        }

        async fn send_error(&self, message: &str, _action_url: Option<&str>) -> FaultlineResult<()> {
            self.attempt()?;
            self.messages.lock().unwrap().push(format!("error: {}", message));
            Ok(())
        }

        async fn send_complete(&self, text: &str) -> FaultlineResult<()> {
            self.attempt()?;
            self.messages.lock().unwrap().push(format!("complete: {}", text));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::RecordingSink;
    use super::*;

    #[tokio::test]
    async fn breaker_opens_after_threshold_and_skips_network() {
        let sink = Arc::new(RecordingSink::failing_first(100));
        let reporter = ProgressReporter::new(sink.clone(), ProgressConfig { breaker_threshold: 3 });

        for _ in 0..3 {
            reporter.step_started("step").await;
        }
        assert_eq!(sink.attempt_count(), 3);

        // Breaker is open: the next attempt performs no network call
        reporter.step_started("step").await;
        assert_eq!(sink.attempt_count(), 3);
    }

    #[tokio::test]
    async fn breaker_resets_after_success() {
        let mut breaker = CircuitBreaker::new(2);
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.is_open());

        breaker.record_success();
        assert!(!breaker.is_open());

        // A fresh failure streak starts from zero
        breaker.record_failure();
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.is_open());
    }

    #[tokio::test]
    async fn next_step_rewrites_previous_hourglass_to_checkmark() {
        let sink = Arc::new(RecordingSink::healthy());
        let reporter = ProgressReporter::new(sink.clone(), ProgressConfig::default());

        reporter.step_started("generating hypotheses").await;
        reporter.step_started("gathering evidence").await;

        let messages = sink.messages.lock().unwrap().clone();
        assert_eq!(messages[0], "⏳ generating hypotheses");
        assert_eq!(messages[1], "⏳ gathering evidence");

        let updates = sink.updates.lock().unwrap().clone();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].1, "✅ generating hypotheses");
    }

    #[tokio::test]
    async fn completion_finalizes_the_open_step() {
        let sink = Arc::new(RecordingSink::healthy());
        let reporter = ProgressReporter::new(sink.clone(), ProgressConfig::default());

        reporter.step_started("writing report").await;
        reporter.complete("done").await;

        let updates = sink.updates.lock().unwrap().clone();
        assert_eq!(updates[0].1, "✅ writing report");
        let messages = sink.messages.lock().unwrap().clone();
        assert!(messages.last().unwrap().starts_with("complete:"));
    }
}
