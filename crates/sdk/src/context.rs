//! Per-invocation execution context: identity, capability handles, and the
//! teardown registry.
//!
//! A context is created once per dispatched payload and lives for the
//! invocation. Capability clients are constructed lazily (no network at
//! creation time). Teardown callbacks registered via `on_complete` run in
//! reverse-registration order when `close` is called; a failing callback is
//! logged and does not stop the rest.

use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;

use crate::audit::AuditLog;
use crate::clients::{
    CredentialResolver, DatalogClient, GraphQlClient, HttpClient, MessageClient, Storage,
};
use crate::config::SdkConfig;
use crate::handler::{Prompt, PromptParameter};
use crate::payload::{
    Configuration, Parameter, Payload, PayloadError, PayloadKind, Skill, Source,
};

type Teardown = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Kind-specific slice of the context.
#[derive(Debug, Clone)]
pub enum ContextView {
    Command {
        /// Declared parameters merged with any parsed from raw_message.
        parameters: Vec<Parameter>,
        raw_message: Option<String>,
        source: Option<Source>,
    },
    Event {
        data: Value,
        operation_name: String,
    },
    Subscription {
        name: String,
        tx: i64,
        /// Nested tuple rows from the datalog subscription.
        result: Value,
    },
    Webhook {
        parameter_name: String,
        body: String,
        headers: HashMap<String, String>,
        /// Body parsed as JSON when it is JSON; None otherwise.
        json: Option<Value>,
        url: Option<String>,
    },
}

/// Execution context for one invocation.
pub struct Context {
    pub name: String,
    pub workspace_id: String,
    pub correlation_id: String,
    pub execution_id: String,
    pub skill: Skill,
    pub configuration: Option<Configuration>,
    /// The classified payload that triggered this invocation.
    pub trigger: Payload,
    pub view: ContextView,

    pub graphql: GraphQlClient,
    pub datalog: DatalogClient,
    pub http: HttpClient,
    pub storage: Arc<dyn Storage>,
    pub credentials: CredentialResolver,
    pub message: Arc<dyn MessageClient>,
    pub audit: AuditLog,

    on_complete: Mutex<Vec<Teardown>>,
}

impl Context {
    pub fn kind(&self) -> PayloadKind {
        self.trigger.kind()
    }

    /// Command parameters (merged); empty for other kinds.
    pub fn parameters(&self) -> &[Parameter] {
        match &self.view {
            ContextView::Command { parameters, .. } => parameters,
            _ => &[],
        }
    }

    /// Origin of a command trigger; None for other kinds.
    pub fn source(&self) -> Option<&Source> {
        match &self.view {
            ContextView::Command { source, .. } => source.as_ref(),
            _ => None,
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters()
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }

    /// Build a prompt for the named parameters that are not yet present.
    /// Returns None when everything is already supplied.
    pub fn missing_parameters(&self, names: &[&str]) -> Option<Prompt> {
        let missing: Vec<PromptParameter> = names
            .iter()
            .filter(|n| self.parameter(n).is_none())
            .map(|n| PromptParameter::required(*n))
            .collect();
        if missing.is_empty() {
            None
        } else {
            Some(Prompt::for_parameters(missing))
        }
    }

    /// Register a teardown callback. Callbacks run LIFO at close.
    pub fn on_complete<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let cb: Teardown = Box::new(move || Box::pin(f()));
        self.on_complete
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(cb);
    }

    /// Run all registered teardown callbacks in reverse-registration order.
    /// Each callback runs exactly once; failures are logged, never
    /// propagated, and do not block later callbacks. Draining the registry
    /// makes a second close a no-op.
    pub async fn close(&self) {
        let callbacks: Vec<Teardown> = self
            .on_complete
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .drain(..)
            .collect();
        for cb in callbacks.into_iter().rev() {
            if let Err(e) = cb().await {
                log::warn!(
                    "teardown callback failed for {}: {:#}",
                    self.correlation_id,
                    e
                );
            }
        }
    }
}

/// Parse free-text `--name=value` / `--name value` parameters from a command
/// raw message. Double-quoted values may contain spaces. Leading plain words
/// (the command phrase itself) are ignored.
pub fn parse_raw_message(raw: &str) -> Vec<Parameter> {
    let tokens = tokenize(raw);
    let mut out = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i];
        if let Some(rest) = token.strip_prefix("--") {
            if rest.is_empty() {
                i += 1;
                continue;
            }
            if let Some((name, value)) = rest.split_once('=') {
                out.push(Parameter {
                    name: name.to_string(),
                    value: Value::String(value.to_string()),
                });
            } else if i + 1 < tokens.len() && !tokens[i + 1].starts_with("--") {
                out.push(Parameter {
                    name: rest.to_string(),
                    value: Value::String(tokens[i + 1].clone()),
                });
                i += 1;
            } else {
                // Bare flag with no value.
                out.push(Parameter {
                    name: rest.to_string(),
                    value: Value::Bool(true),
                });
            }
        }
        i += 1;
    }
    out
}

fn tokenize(raw: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in raw.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Builds contexts from classified payloads. Holds the host-supplied
/// collaborators every context shares (endpoints, message client, storage).
pub struct ContextFactory {
    graphql_url: String,
    datalog_url: String,
    message: Arc<dyn MessageClient>,
    storage: Arc<dyn Storage>,
}

impl ContextFactory {
    /// Endpoints are resolved once here (env overrides applied); contexts
    /// only clone the resolved strings.
    pub fn new(config: SdkConfig, message: Arc<dyn MessageClient>, storage: Arc<dyn Storage>) -> Self {
        Self {
            graphql_url: crate::config::resolve_graphql_url(&config),
            datalog_url: crate::config::resolve_datalog_url(&config),
            message,
            storage,
        }
    }

    /// Classify a raw payload value and build its context. Unclassifiable
    /// payloads fail loudly here, before any capability handle exists.
    pub fn create_from_value(
        &self,
        value: Value,
        event_id: impl Into<String>,
    ) -> Result<Arc<Context>, PayloadError> {
        let payload = Payload::from_value(value)?;
        Ok(self.create(payload, event_id))
    }

    /// Build a context for an already-classified payload.
    pub fn create(&self, payload: Payload, event_id: impl Into<String>) -> Arc<Context> {
        let api_key = payload.api_key().map(String::from);
        let workspace_id = payload.workspace_id().to_string();
        let correlation_id = payload.correlation_id().to_string();
        let skill = payload.skill().clone();
        let configuration = payload.configuration().cloned();
        let name = payload.name().to_string();

        let graphql = GraphQlClient::new(
            self.graphql_url.clone(),
            workspace_id.clone(),
            api_key.clone(),
        );
        let datalog = DatalogClient::new(
            self.datalog_url.clone(),
            workspace_id.clone(),
            api_key,
        );
        let credentials = CredentialResolver::new(graphql.clone());
        let audit = AuditLog::new(
            workspace_id.clone(),
            correlation_id.clone(),
            skill.qualified_name(),
        );

        let view = match &payload {
            Payload::Command(c) => {
                let mut parameters = c.parameters.clone();
                if let Some(raw) = &c.raw_message {
                    for parsed in parse_raw_message(raw) {
                        if !parameters.iter().any(|p| p.name == parsed.name) {
                            parameters.push(parsed);
                        }
                    }
                }
                ContextView::Command {
                    parameters,
                    raw_message: c.raw_message.clone(),
                    source: c.source.clone(),
                }
            }
            Payload::Event(e) => ContextView::Event {
                data: e.data.clone(),
                operation_name: e.extensions.operation_name.clone(),
            },
            Payload::Subscription(s) => ContextView::Subscription {
                name: s.subscription.name.clone(),
                tx: s.subscription.tx,
                result: s.subscription.result.clone(),
            },
            Payload::Webhook(w) => ContextView::Webhook {
                parameter_name: w.webhook.parameter_name.clone(),
                body: w.webhook.body.clone(),
                headers: w.webhook.headers.clone(),
                json: serde_json::from_str(&w.webhook.body).ok(),
                url: w.webhook.url.clone(),
            },
        };

        let context = Arc::new(Context {
            name,
            workspace_id,
            correlation_id,
            execution_id: event_id.into(),
            skill,
            configuration,
            trigger: payload,
            view,
            graphql,
            datalog,
            http: HttpClient::new(),
            storage: self.storage.clone(),
            credentials,
            message: self.message.clone(),
            audit: audit.clone(),
            on_complete: Mutex::new(Vec::new()),
        });

        // Flushing the audit buffer is the first registration, so it runs
        // last at close, after handler-registered teardowns.
        context.on_complete(move || async move {
            audit.flush().await;
            Ok(())
        });

        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::RecordingMessageClient;
    use crate::clients::FileStorage;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn factory() -> ContextFactory {
        ContextFactory::new(
            SdkConfig::default(),
            Arc::new(RecordingMessageClient::new()),
            Arc::new(FileStorage::new(std::env::temp_dir())),
        )
    }

    fn command_value(raw_message: Option<&str>) -> Value {
        let mut v = json!({
            "command": "create-issue",
            "correlation_id": "corr-1",
            "team": { "id": "T1" },
            "parameters": [ { "name": "repo", "value": "sdk" } ],
            "skill": { "name": "issues", "namespace": "acme" }
        });
        if let Some(raw) = raw_message {
            v["raw_message"] = json!(raw);
        }
        v
    }

    #[tokio::test]
    async fn raw_message_parameters_are_merged() {
        let ctx = factory()
            .create_from_value(command_value(Some("create issue --title=Test")), "e1")
            .unwrap();
        assert_eq!(
            ctx.parameter("title"),
            Some(&Value::String("Test".to_string()))
        );
        // Declared parameters win over raw_message duplicates.
        assert_eq!(ctx.parameter("repo"), Some(&Value::String("sdk".to_string())));
    }

    #[test]
    fn raw_message_parsing_handles_quotes_and_flags() {
        let params = parse_raw_message(r#"create issue --title="Hello World" --draft --repo sdk"#);
        assert_eq!(params.len(), 3);
        assert_eq!(params[0].name, "title");
        assert_eq!(params[0].value, Value::String("Hello World".to_string()));
        assert_eq!(params[1].name, "draft");
        assert_eq!(params[1].value, Value::Bool(true));
        assert_eq!(params[2].name, "repo");
        assert_eq!(params[2].value, Value::String("sdk".to_string()));
    }

    #[tokio::test]
    async fn teardown_runs_lifo_and_survives_a_failing_callback() {
        let ctx = factory()
            .create_from_value(command_value(None), "e1")
            .unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        let counter = Arc::new(AtomicUsize::new(0));

        let o = order.clone();
        ctx.on_complete(move || async move {
            o.lock().unwrap().push("first-registered");
            Ok(())
        });
        ctx.on_complete(|| async { anyhow::bail!("teardown boom") });
        let o = order.clone();
        let c = counter.clone();
        ctx.on_complete(move || async move {
            o.lock().unwrap().push("last-registered");
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        ctx.close().await;
        let order = order.lock().unwrap().clone();
        assert_eq!(order, vec!["last-registered", "first-registered"]);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // Second close is a no-op: the registry was drained.
        ctx.close().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn teardown_registry_survives_a_poisoned_lock() {
        let ctx = factory()
            .create_from_value(command_value(None), "e1")
            .unwrap();
        let poisoner = ctx.clone();
        std::thread::spawn(move || {
            let _guard = poisoner.on_complete.lock().unwrap();
            panic!("poison the teardown registry");
        })
        .join()
        .unwrap_err();

        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        ctx.on_complete(move || async move {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        ctx.close().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unclassifiable_payload_fails_context_construction() {
        let err = factory()
            .create_from_value(json!({ "unrelated": true }), "e1")
            .err()
            .unwrap();
        assert!(matches!(err, PayloadError::Unclassifiable));
    }

    #[tokio::test]
    async fn missing_parameters_builds_a_prompt_only_for_absent_names() {
        let ctx = factory()
            .create_from_value(command_value(None), "e1")
            .unwrap();
        assert!(ctx.missing_parameters(&["repo"]).is_none());
        let prompt = ctx.missing_parameters(&["repo", "title"]).unwrap();
        assert_eq!(prompt.parameters.len(), 1);
        assert_eq!(prompt.parameters[0].name, "title");
    }
}
