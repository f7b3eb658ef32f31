//! Dispatch core: build context → invoke handler → normalize status →
//! publish → always close.
//!
//! Every invocation ends with exactly one published status; handler errors
//! never escape to the transport as errors. The only failure allowed to
//! propagate out is a payload that cannot be classified, because there is no
//! status channel to publish through before a context exists.

use serde_json::Value;
use std::sync::Arc;

use crate::context::{Context, ContextFactory};
use crate::envelope::{EnvelopeResolver, TransportEnvelope};
use crate::handler::{HandlerLoader, Outcome, Status};
use crate::payload::{
    CommandIncoming, EventIncoming, Payload, PayloadKind, SubscriptionIncoming, WebhookIncoming,
};
use crate::clients::StatusEnvelope;

/// Normalize a handler result into the status that gets published.
///
/// A handler error becomes `{code: 1, reason: "Error invoking <ns>/<name>"}`.
/// A missing status defaults to success; a missing reason gets a generated
/// success/failure phrase.
pub fn prepare_status(result: Result<Option<Status>, &anyhow::Error>, ctx: &Context) -> Status {
    let qualified = ctx.skill.qualified_name();
    match result {
        Err(_) => Status {
            code: Some(1),
            reason: Some(format!("Error invoking {}", qualified)),
            visibility: None,
        },
        Ok(status) => {
            let status = status.unwrap_or_default();
            let code = status.code.unwrap_or(0);
            let reason = status.reason.unwrap_or_else(|| {
                if code == 0 {
                    format!("Successfully invoked {}", qualified)
                } else {
                    format!("Unsuccessfully invoked {}", qualified)
                }
            });
            Status {
                code: Some(code),
                reason: Some(reason),
                visibility: status.visibility,
            }
        }
    }
}

/// Orchestrates invocations: context factory plus handler loader, both
/// injected (tests swap either).
pub struct Dispatcher {
    factory: ContextFactory,
    loader: Arc<dyn HandlerLoader>,
}

impl Dispatcher {
    pub fn new(factory: ContextFactory, loader: Arc<dyn HandlerLoader>) -> Self {
        Self { factory, loader }
    }

    /// Resolve a transport envelope and dispatch the payload it carries.
    pub async fn process_envelope(
        &self,
        resolver: &EnvelopeResolver,
        envelope: &TransportEnvelope,
        event_id: &str,
    ) -> anyhow::Result<()> {
        let payload = resolver.resolve(envelope).await?;
        self.run(payload, event_id).await;
        Ok(())
    }

    /// Classify a raw payload value and dispatch it. Classification failure
    /// is the one unrecoverable path: logged and returned to the caller.
    pub async fn process_value(&self, value: Value, event_id: &str) -> anyhow::Result<()> {
        let ctx = match self.factory.create_from_value(value, event_id) {
            Ok(ctx) => ctx,
            Err(e) => {
                log::error!("cannot build context for event {}: {}", event_id, e);
                return Err(e.into());
            }
        };
        self.execute(ctx).await;
        Ok(())
    }

    pub async fn process_command(&self, payload: CommandIncoming, event_id: &str) {
        self.run(Payload::Command(payload), event_id).await;
    }

    pub async fn process_event(&self, payload: EventIncoming, event_id: &str) {
        self.run(Payload::Event(payload), event_id).await;
    }

    /// Subscriptions ride the event path; their handlers may be registered
    /// under either the subscription or event namespace.
    pub async fn process_subscription(&self, payload: SubscriptionIncoming, event_id: &str) {
        self.run(Payload::Subscription(payload), event_id).await;
    }

    pub async fn process_webhook(&self, payload: WebhookIncoming, event_id: &str) {
        self.run(Payload::Webhook(payload), event_id).await;
    }

    async fn run(&self, payload: Payload, event_id: &str) {
        let ctx = self.factory.create(payload, event_id);
        self.execute(ctx).await;
    }

    /// The per-invocation state machine: invoke, publish, close — in that
    /// order, close unconditionally last.
    async fn execute(&self, ctx: Arc<Context>) {
        let result = self.invoke(&ctx).await;
        self.finish(&ctx, result).await;
        ctx.close().await;
    }

    async fn invoke(&self, ctx: &Arc<Context>) -> anyhow::Result<Outcome> {
        let handler = self.loader.load(ctx.kind(), &ctx.name).await?;
        ctx.audit
            .debug(format!(
                "invoking {} handler \"{}\"",
                ctx.kind().as_str(),
                ctx.name
            ))
            .await;
        handler(ctx.clone()).await
    }

    /// Publish the one terminal status for this invocation. Publish failures
    /// are logged, never propagated; teardown must still run.
    async fn finish(&self, ctx: &Arc<Context>, result: anyhow::Result<Outcome>) {
        let status = match result {
            Ok(Outcome::NeedsInput(prompt)) if ctx.kind() == PayloadKind::Command => {
                // A parameter prompt is a designed pause, not a failure.
                ctx.audit
                    .info(format!(
                        "handler \"{}\" requested {} more parameter(s)",
                        ctx.name,
                        prompt.parameters.len()
                    ))
                    .await;
                if let Err(e) = ctx.message.prompt(&ctx.correlation_id, &prompt).await {
                    log::error!(
                        "failed to send parameter prompt for {}: {}",
                        ctx.correlation_id,
                        e
                    );
                }
                Status::success()
            }
            Ok(Outcome::NeedsInput(_)) => Status::failure(format!(
                "{} handler \"{}\" requested parameters; prompts are only supported for commands",
                ctx.kind().as_str(),
                ctx.name
            )),
            Ok(Outcome::Complete(status)) => prepare_status(Ok(status), ctx),
            Err(e) => {
                log::warn!(
                    "{} handler \"{}\" failed for {}: {:#}",
                    ctx.kind().as_str(),
                    ctx.name,
                    ctx.correlation_id,
                    e
                );
                ctx.audit
                    .error(format!("handler \"{}\" failed: {:#}", ctx.name, e))
                    .await;
                prepare_status(Err(&e), ctx)
            }
        };

        let envelope = StatusEnvelope {
            status,
            correlation_id: ctx.correlation_id.clone(),
            team: ctx.workspace_id.clone(),
            kind: ctx.kind().as_str().to_string(),
            name: ctx.name.clone(),
            source: ctx.source().cloned(),
            skill: ctx.skill.clone(),
        };
        if let Err(e) = ctx.message.publish(&envelope).await {
            log::error!(
                "failed to publish status for {}: {}",
                ctx.correlation_id,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{FileStorage, RecordingMessageClient};
    use crate::config::SdkConfig;
    use serde_json::json;

    fn factory(message: Arc<RecordingMessageClient>) -> ContextFactory {
        ContextFactory::new(
            SdkConfig::default(),
            message,
            Arc::new(FileStorage::new(std::env::temp_dir())),
        )
    }

    fn command_context(message: Arc<RecordingMessageClient>) -> Arc<Context> {
        factory(message)
            .create_from_value(
                json!({
                    "command": "create-issue",
                    "correlation_id": "corr",
                    "team": { "id": "T1" },
                    "skill": { "name": "issues", "namespace": "acme" }
                }),
                "e1",
            )
            .unwrap()
    }

    #[tokio::test]
    async fn missing_status_defaults_to_generated_success() {
        let ctx = command_context(Arc::new(RecordingMessageClient::new()));
        let status = prepare_status(Ok(None), &ctx);
        assert_eq!(status.code, Some(0));
        assert_eq!(
            status.reason.as_deref(),
            Some("Successfully invoked acme/issues")
        );
    }

    #[tokio::test]
    async fn error_becomes_code_one_with_invoking_phrase() {
        let ctx = command_context(Arc::new(RecordingMessageClient::new()));
        let err = anyhow::anyhow!("boom");
        let status = prepare_status(Err(&err), &ctx);
        assert_eq!(status.code, Some(1));
        assert_eq!(status.reason.as_deref(), Some("Error invoking acme/issues"));
    }

    #[tokio::test]
    async fn explicit_failure_keeps_code_and_reason() {
        let ctx = command_context(Arc::new(RecordingMessageClient::new()));
        let status = prepare_status(Ok(Some(Status::failure("no such repo"))), &ctx);
        assert_eq!(status.code, Some(1));
        assert_eq!(status.reason.as_deref(), Some("no such repo"));
    }

    #[tokio::test]
    async fn nonzero_code_without_reason_gets_failure_phrase() {
        let ctx = command_context(Arc::new(RecordingMessageClient::new()));
        let status = prepare_status(
            Ok(Some(Status {
                code: Some(7),
                reason: None,
                visibility: None,
            })),
            &ctx,
        );
        assert_eq!(status.code, Some(7));
        assert_eq!(
            status.reason.as_deref(),
            Some("Unsuccessfully invoked acme/issues")
        );
    }
}
