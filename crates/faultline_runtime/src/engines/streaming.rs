// Web delivery of job progress: per-job broadcast channels exposed over SSE.
// The worker publishes through a WebSink; browsers subscribe by job id.

use crate::engines::progress::{MessageRef, ProgressSink};
use crate::errors::FaultlineResult;
use crate::types::JobId;
use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures_util::stream::Stream;
use futures_util::StreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;
use uuid::Uuid;

/// One event on a job's progress stream.
#[derive(Debug, Clone, Serialize)]
pub struct SseProgressEvent {
    pub id: String,
    pub event: String,
    pub text: String,
}

/// Registry of per-job broadcast channels. Channels are created lazily and
/// dropped once the job completes; the ephemeral progress state does not
/// outlive the job.
#[derive(Clone, Default)]
pub struct WebChannels {
    channels: Arc<RwLock<HashMap<JobId, broadcast::Sender<SseProgressEvent>>>>,
}

impl WebChannels {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sender(&self, job_id: JobId) -> broadcast::Sender<SseProgressEvent> {
        let mut channels = self.channels.write().await;
        channels
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }

    pub async fn subscribe(&self, job_id: JobId) -> broadcast::Receiver<SseProgressEvent> {
        self.sender(job_id).await.subscribe()
    }

    /// Discard the channel after job completion.
    pub async fn remove(&self, job_id: JobId) {
        self.channels.write().await.remove(&job_id);
    }
}

/// Progress sink publishing to a job's broadcast channel.
pub struct WebSink {
    sender: broadcast::Sender<SseProgressEvent>,
}

impl WebSink {
    pub fn new(sender: broadcast::Sender<SseProgressEvent>) -> Self {
        Self { sender }
    }

    fn publish(&self, event: SseProgressEvent) -> FaultlineResult<()> {
        // No subscriber yet is fine; events before the page attaches are lost
        // by design of a live progress stream.
        let _ = self.sender.send(event);
        Ok(())
    }
}

#[async_trait]
impl ProgressSink for WebSink {
    async fn post_message(&self, text: &str) -> FaultlineResult<MessageRef> {
        let id = Uuid::new_v4().to_string();
        self.publish(SseProgressEvent {
            id: id.clone(),
            event: "progress".to_string(),
            text: text.to_string(),
        })?;
        Ok(id)
    }

    async fn update_message(&self, message: &MessageRef, text: &str) -> FaultlineResult<()> {
        self.publish(SseProgressEvent {
            id: message.clone(),
            event: "progress_update".to_string(),
            text: text.to_string(),
        })
    }

    async fn send_error(&self, message: &str, action_url: Option<&str>) -> FaultlineResult<()> {
        let text = match action_url {
            Some(url) => format!("{} ({})", message, url),
            None => message.to_string(),
        };
        self.publish(SseProgressEvent {
            id: Uuid::new_v4().to_string(),
            event: "error".to_string(),
            text,
        })
    }

    async fn send_complete(&self, text: &str) -> FaultlineResult<()> {
        self.publish(SseProgressEvent {
            id: Uuid::new_v4().to_string(),
            event: "complete".to_string(),
            text: text.to_string(),
        })
    }
}

/// Router exposing `GET /jobs/:id/events` as an SSE stream.
pub fn sse_router(channels: WebChannels) -> Router {
    Router::new()
        .route("/jobs/:id/events", get(job_events))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(channels)
}

async fn job_events(
    Path(id): Path<String>,
    State(channels): State<WebChannels>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, axum::http::StatusCode> {
    let job_id: JobId = id
        .parse()
        .map_err(|_| axum::http::StatusCode::BAD_REQUEST)?;

    debug!(%job_id, "sse subscriber attached");
    let receiver = channels.subscribe(job_id).await;
    let stream = BroadcastStream::new(receiver).filter_map(|item| async move {
        match item {
            Ok(event) => {
                let data = serde_json::to_string(&event).ok()?;
                Some(Ok(Event::default().event(event.event).data(data)))
            }
            // Lagged receivers skip dropped events rather than erroring out
            Err(_) => None,
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
