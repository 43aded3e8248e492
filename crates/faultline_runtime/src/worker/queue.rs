// Job queue transport. The queue carries only `{"job_id": "<uuid>"}`; all
// job detail lives in the database. Backoff re-enqueue reuses the same body
// with a delay applied at the transport layer.

use crate::types::JobId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Longest delay the queue transport supports for one send (the SQS cap).
pub const MAX_QUEUE_DELAY: Duration = Duration::from_secs(900);

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue transport error: {0}")]
    Transport(String),

    #[error("Queue returned malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Receipt handle unknown: {0}")]
    UnknownReceipt(String),
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Wire body of one job dispatch message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDispatch {
    pub job_id: JobId,
}

/// One received message plus the receipt needed to delete it.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub job_id: JobId,
    pub receipt: String,
}

/// Queue transport consumed by the worker. At-least-once delivery; the
/// worker's dequeue contract makes duplicates harmless.
#[async_trait::async_trait]
pub trait JobQueue: Send + Sync {
    async fn send(&self, job_id: JobId, delay: Option<Duration>) -> QueueResult<()>;
    async fn receive(&self, max_messages: u32, wait: Duration) -> QueueResult<Vec<QueueMessage>>;
    async fn delete(&self, receipt: &str) -> QueueResult<()>;
}

// ==========================================
// SQS TRANSPORT
// ==========================================

/// SQS JSON-protocol client. Talks to the queue endpoint configured for the
/// deployment (SQS or an SQS-compatible broker).
pub struct SqsQueue {
    client: reqwest::Client,
    endpoint: String,
    queue_url: String,
}

impl SqsQueue {
    pub fn new(endpoint: String, queue_url: String) -> QueueResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| QueueError::Transport(format!("client build failed: {}", e)))?;
        Ok(Self {
            client,
            endpoint,
            queue_url,
        })
    }

    async fn call(
        &self,
        action: &str,
        body: serde_json::Value,
    ) -> QueueResult<serde_json::Value> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Amz-Target", format!("AmazonSQS.{}", action))
            .header("Content-Type", "application/x-amz-json-1.0")
            .json(&body)
            .send()
            .await
            .map_err(|e| QueueError::Transport(format!("{} failed: {}", action, e)))?;

        if !response.status().is_success() {
            return Err(QueueError::Transport(format!(
                "{} returned {}",
                action,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| QueueError::MalformedPayload(format!("{}: {}", action, e)))
    }
}

#[async_trait::async_trait]
impl JobQueue for SqsQueue {
    async fn send(&self, job_id: JobId, delay: Option<Duration>) -> QueueResult<()> {
        let body = serde_json::to_string(&JobDispatch { job_id })
            .map_err(|e| QueueError::MalformedPayload(e.to_string()))?;
        let mut payload = serde_json::json!({
            "QueueUrl": self.queue_url,
            "MessageBody": body,
        });
        if let Some(delay) = delay {
            let capped = delay.min(MAX_QUEUE_DELAY);
            payload["DelaySeconds"] = serde_json::json!(capped.as_secs());
        }
        self.call("SendMessage", payload).await?;
        Ok(())
    }

    async fn receive(&self, max_messages: u32, wait: Duration) -> QueueResult<Vec<QueueMessage>> {
        let payload = serde_json::json!({
            "QueueUrl": self.queue_url,
            "MaxNumberOfMessages": max_messages,
            "WaitTimeSeconds": wait.as_secs().min(20),
        });
        let response = self.call("ReceiveMessage", payload).await?;

        let mut messages = Vec::new();
        if let Some(items) = response.get("Messages").and_then(|v| v.as_array()) {
            for item in items {
                let receipt = item
                    .get("ReceiptHandle")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        QueueError::MalformedPayload("message without receipt handle".to_string())
                    })?;
                let body = item.get("Body").and_then(|v| v.as_str()).unwrap_or("{}");
                match serde_json::from_str::<JobDispatch>(body) {
                    Ok(dispatch) => messages.push(QueueMessage {
                        job_id: dispatch.job_id,
                        receipt: receipt.to_string(),
                    }),
                    Err(e) => {
                        // A poison message is deleted rather than redelivered forever
                        tracing::warn!(error = %e, "dropping malformed queue message");
                        self.delete(receipt).await?;
                    }
                }
            }
        }
        Ok(messages)
    }

    async fn delete(&self, receipt: &str) -> QueueResult<()> {
        let payload = serde_json::json!({
            "QueueUrl": self.queue_url,
            "ReceiptHandle": receipt,
        });
        self.call("DeleteMessage", payload).await?;
        Ok(())
    }
}

// ==========================================
// IN-MEMORY TRANSPORT
// ==========================================

struct DelayedMessage {
    job_id: JobId,
    available_at: Instant,
}

#[derive(Default)]
struct InMemoryState {
    ready: VecDeque<JobId>,
    delayed: Vec<DelayedMessage>,
    in_flight: Vec<(String, JobId)>,
    receipt_counter: u64,
    sent_delays: Vec<(JobId, Option<Duration>)>,
}

/// In-process queue for local development and tests. Mirrors the SQS
/// semantics the worker relies on: delayed visibility and receipt-based
/// deletion.
#[derive(Default)]
pub struct InMemoryQueue {
    state: Mutex<InMemoryState>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays recorded per send, for asserting backoff behavior.
    pub fn sent_delays(&self) -> Vec<(JobId, Option<Duration>)> {
        self.state.lock().unwrap().sent_delays.clone()
    }

    pub fn ready_len(&self) -> usize {
        self.state.lock().unwrap().ready.len()
    }

    pub fn delayed_len(&self) -> usize {
        self.state.lock().unwrap().delayed.len()
    }
}

#[async_trait::async_trait]
impl JobQueue for InMemoryQueue {
    async fn send(&self, job_id: JobId, delay: Option<Duration>) -> QueueResult<()> {
        let mut state = self.state.lock().unwrap();
        let capped = delay.map(|d| d.min(MAX_QUEUE_DELAY));
        state.sent_delays.push((job_id, capped));
        match capped {
            Some(delay) if !delay.is_zero() => state.delayed.push(DelayedMessage {
                job_id,
                available_at: Instant::now() + delay,
            }),
            _ => state.ready.push_back(job_id),
        }
        Ok(())
    }

    async fn receive(&self, max_messages: u32, _wait: Duration) -> QueueResult<Vec<QueueMessage>> {
        let mut state = self.state.lock().unwrap();

        // Promote delayed messages whose delay elapsed
        let now = Instant::now();
        let (due, pending): (Vec<_>, Vec<_>) = state
            .delayed
            .drain(..)
            .partition(|m| m.available_at <= now);
        state.delayed = pending;
        for message in due {
            state.ready.push_back(message.job_id);
        }

        let mut messages = Vec::new();
        while messages.len() < max_messages as usize {
            let Some(job_id) = state.ready.pop_front() else {
                break;
            };
            state.receipt_counter += 1;
            let receipt = format!("receipt-{}", state.receipt_counter);
            state.in_flight.push((receipt.clone(), job_id));
            messages.push(QueueMessage { job_id, receipt });
        }
        Ok(messages)
    }

    async fn delete(&self, receipt: &str) -> QueueResult<()> {
        let mut state = self.state.lock().unwrap();
        let before = state.in_flight.len();
        state.in_flight.retain(|(r, _)| r != receipt);
        if state.in_flight.len() == before {
            return Err(QueueError::UnknownReceipt(receipt.to_string()));
        }
        Ok(())
    }
}
