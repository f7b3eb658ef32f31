//! Outbound message surface: status publishing and parameter prompts.
//!
//! Every invocation publishes exactly one status envelope through a
//! [`MessageClient`]. Hosts plug their transport in here; tests and embedded
//! hosts use the recording client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::handler::{Prompt, Status};
use crate::payload::{Skill, Source};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("publish request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("publish rejected: {0}")]
    Rejected(String),
}

/// Status envelope as sent to the message bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEnvelope {
    pub status: Status,
    pub correlation_id: String,
    pub team: String,
    /// Handler kind ("command", "event", "webhook").
    pub kind: String,
    /// Name of the command/event/webhook that was invoked.
    pub name: String,
    /// Origin of a command trigger, so the response can be routed back to
    /// the channel/user it came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    pub skill: Skill,
}

#[async_trait]
pub trait MessageClient: Send + Sync {
    /// Publish the terminal status of an invocation.
    async fn publish(&self, envelope: &StatusEnvelope) -> Result<(), PublishError>;

    /// Surface a parameter prompt to the user (command path only).
    async fn prompt(&self, correlation_id: &str, prompt: &Prompt) -> Result<(), PublishError>;
}

/// POSTs envelopes and prompts as JSON to a configured endpoint.
pub struct HttpMessageClient {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpMessageClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl MessageClient for HttpMessageClient {
    async fn publish(&self, envelope: &StatusEnvelope) -> Result<(), PublishError> {
        let res = self
            .client
            .post(&self.endpoint)
            .json(envelope)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(PublishError::Rejected(format!("{} {}", status, body)));
        }
        Ok(())
    }

    async fn prompt(&self, correlation_id: &str, prompt: &Prompt) -> Result<(), PublishError> {
        let res = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({
                "correlation_id": correlation_id,
                "parameter_prompt": prompt,
            }))
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(PublishError::Rejected(format!("{} {}", status, body)));
        }
        Ok(())
    }
}

/// In-memory client recording everything sent; used by tests and local hosts.
#[derive(Default)]
pub struct RecordingMessageClient {
    published: Mutex<Vec<StatusEnvelope>>,
    prompts: Mutex<Vec<Prompt>>,
}

impl RecordingMessageClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<StatusEnvelope> {
        self.published.lock().await.clone()
    }

    pub async fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl MessageClient for RecordingMessageClient {
    async fn publish(&self, envelope: &StatusEnvelope) -> Result<(), PublishError> {
        self.published.lock().await.push(envelope.clone());
        Ok(())
    }

    async fn prompt(&self, _correlation_id: &str, prompt: &Prompt) -> Result<(), PublishError> {
        self.prompts.lock().await.push(prompt.clone());
        Ok(())
    }
}
