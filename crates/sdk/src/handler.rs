//! Handler contract: statuses, outcomes, prompts, and the registry/loader.
//!
//! Handlers are async functions over a shared execution context. "Needs more
//! input" is an ordinary outcome variant matched by dispatch, not an error.
//! Resolution goes through an explicit name→handler table built at startup;
//! the loader trait keeps resolution pluggable for tests and hosts.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::context::Context;
use crate::payload::PayloadKind;

/// Whether a status is surfaced to the user. Hidden does not change code
/// semantics, only presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Hidden,
    Visible,
}

/// Normalized terminal status of an invocation. `code` 0 or absent means
/// success; anything else is failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
}

impl Status {
    pub fn success() -> Self {
        Self {
            code: Some(0),
            ..Default::default()
        }
    }

    pub fn success_with(reason: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            code: Some(1),
            reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn hidden(mut self) -> Self {
        self.visibility = Some(Visibility::Hidden);
        self
    }

    pub fn is_success(&self) -> bool {
        self.code.unwrap_or(0) == 0
    }
}

/// One parameter still required from the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptParameter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

impl PromptParameter {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            required: true,
            default_value: None,
        }
    }
}

/// A request to pause the command and ask the user for more parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Prompt {
    pub parameters: Vec<PromptParameter>,
}

impl Prompt {
    pub fn for_parameters(parameters: Vec<PromptParameter>) -> Self {
        Self { parameters }
    }
}

/// Result of a handler invocation. `NeedsInput` is only meaningful on the
/// command path; dispatch turns it into a failure elsewhere.
#[derive(Debug, Clone)]
pub enum Outcome {
    Complete(Option<Status>),
    NeedsInput(Prompt),
}

impl Outcome {
    /// Plain success with no explicit status.
    pub fn done() -> Self {
        Outcome::Complete(None)
    }

    pub fn status(status: Status) -> Self {
        Outcome::Complete(Some(status))
    }
}

/// The function type the dispatch core invokes.
pub type Handler =
    Arc<dyn Fn(Arc<Context>) -> BoxFuture<'static, anyhow::Result<Outcome>> + Send + Sync>;

/// Wrap an async closure as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Outcome>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("no {kind} handler registered for \"{name}\"")]
    NotFound { kind: &'static str, name: String },
}

/// Resolves a logical name to a handler. The dispatch core only depends on
/// this trait; the registry below is the default implementation.
#[async_trait]
pub trait HandlerLoader: Send + Sync {
    async fn load(&self, kind: PayloadKind, name: &str) -> Result<Handler, LoadError>;
}

/// Explicit registration table: (kind, name) → handler. Replaces any former
/// filesystem-convention lookup; hosts register everything at startup.
#[derive(Default)]
pub struct HandlerRegistry {
    inner: RwLock<HashMap<(PayloadKind, String), Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, kind: PayloadKind, name: impl Into<String>, handler: Handler) {
        let name = name.into();
        let mut g = self.inner.write().await;
        if g.insert((kind, name.clone()), handler).is_some() {
            log::warn!("replaced {} handler \"{}\"", kind.as_str(), name);
        }
    }

    pub async fn register_command(&self, name: impl Into<String>, handler: Handler) {
        self.register(PayloadKind::Command, name, handler).await;
    }

    pub async fn register_event(&self, name: impl Into<String>, handler: Handler) {
        self.register(PayloadKind::Event, name, handler).await;
    }

    pub async fn register_subscription(&self, name: impl Into<String>, handler: Handler) {
        self.register(PayloadKind::Subscription, name, handler).await;
    }

    pub async fn register_webhook(&self, name: impl Into<String>, handler: Handler) {
        self.register(PayloadKind::Webhook, name, handler).await;
    }
}

#[async_trait]
impl HandlerLoader for HandlerRegistry {
    async fn load(&self, kind: PayloadKind, name: &str) -> Result<Handler, LoadError> {
        let g = self.inner.read().await;
        if let Some(h) = g.get(&(kind, name.to_string())) {
            return Ok(h.clone());
        }
        // Subscriptions ride the event path; fall back to the event table.
        if kind == PayloadKind::Subscription {
            if let Some(h) = g.get(&(PayloadKind::Event, name.to_string())) {
                return Ok(h.clone());
            }
        }
        Err(LoadError::NotFound {
            kind: kind.as_str(),
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_semantics() {
        assert!(Status::default().is_success());
        assert!(Status::success().is_success());
        assert!(!Status::failure("boom").is_success());
        let hidden = Status::success().hidden();
        assert_eq!(hidden.visibility, Some(Visibility::Hidden));
        assert!(hidden.is_success());
    }

    #[tokio::test]
    async fn unknown_handler_name_is_a_load_error() {
        let registry = HandlerRegistry::new();
        let err = registry
            .load(PayloadKind::Command, "missing")
            .await
            .err()
            .unwrap();
        let msg = err.to_string();
        assert!(msg.contains("command"), "{}", msg);
        assert!(msg.contains("missing"), "{}", msg);
    }

    #[tokio::test]
    async fn subscription_falls_back_to_event_table() {
        let registry = HandlerRegistry::new();
        registry
            .register_event("on-commit", handler_fn(|_ctx| async { Ok(Outcome::done()) }))
            .await;
        assert!(registry
            .load(PayloadKind::Subscription, "on-commit")
            .await
            .is_ok());
    }
}
