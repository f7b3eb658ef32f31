//! Incoming payload types and classification.
//!
//! The transport delivers four structurally similar shapes (command, event,
//! subscription, webhook). They are decoded into a closed tagged union via
//! distinguishing-field checks in a fixed priority order; nothing outside
//! this module may assume the shape of a raw payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Well-known secret URI carrying the workspace API key inside a payload.
pub const API_KEY_URI: &str = "atomist://api-key";

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// Payload matched none of the four known kinds. Never proceed silently.
    #[error("payload matches no known kind (expected command, event, subscription, or webhook)")]
    Unclassifiable,
    #[error("payload decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Kind of an incoming payload, in classification priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Command,
    Webhook,
    Subscription,
    Event,
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Command => "command",
            PayloadKind::Webhook => "webhook",
            PayloadKind::Subscription => "subscription",
            PayloadKind::Event => "event",
        }
    }
}

/// Skill descriptor carried on every payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Skill {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub version: String,
}

impl Skill {
    /// "namespace/name" as used in status phrases and log lines.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// A named, user-supplied parameterization of a skill within one workspace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    #[serde(default)]
    pub resource_providers: HashMap<String, Value>,
}

/// Ordered name/value command parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

/// Secret delivered inside the payload (uri + value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    pub uri: String,
    #[serde(default)]
    pub value: String,
}

/// Workspace/team reference on command payloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Team {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Origin of a command (channel/user), kept opaque beyond the ids we thread.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Source {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub identity: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandIncoming {
    pub command: String,
    #[serde(default)]
    pub correlation_id: String,
    #[serde(default)]
    pub team: Team,
    #[serde(default)]
    pub source: Option<Source>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub secrets: Vec<Secret>,
    #[serde(default)]
    pub skill: Skill,
    /// Commands carry the full configuration array; the first entry is active.
    #[serde(default)]
    pub configurations: Vec<Configuration>,
    /// Free text later parsed into `--name=value` parameters.
    #[serde(default)]
    pub raw_message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventExtensions {
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub operation_name: String,
    #[serde(default)]
    pub correlation_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventIncoming {
    pub data: Value,
    #[serde(default)]
    pub extensions: EventExtensions,
    #[serde(default)]
    pub secrets: Vec<Secret>,
    #[serde(default)]
    pub skill: Skill,
    #[serde(default)]
    pub configurations: Vec<Configuration>,
}

/// Subscription body: name, datalog transaction id, nested tuple rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionBody {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tx: i64,
    #[serde(default)]
    pub result: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionIncoming {
    pub subscription: SubscriptionBody,
    #[serde(default)]
    pub correlation_id: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub secrets: Vec<Secret>,
    #[serde(default)]
    pub skill: Skill,
    #[serde(default)]
    pub configurations: Vec<Configuration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookBody {
    #[serde(default)]
    pub parameter_name: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookIncoming {
    pub webhook: WebhookBody,
    #[serde(default)]
    pub correlation_id: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub secrets: Vec<Secret>,
    #[serde(default)]
    pub skill: Skill,
    #[serde(default)]
    pub configurations: Vec<Configuration>,
}

/// Classified incoming payload.
#[derive(Debug, Clone)]
pub enum Payload {
    Command(CommandIncoming),
    Event(EventIncoming),
    Subscription(SubscriptionIncoming),
    Webhook(WebhookIncoming),
}

/// Command predicate: a truthy `command` field.
pub fn is_command(value: &Value) -> bool {
    value
        .get("command")
        .and_then(Value::as_str)
        .map(|s| !s.is_empty())
        .unwrap_or(false)
}

/// Webhook predicate: a `webhook` object.
pub fn is_webhook(value: &Value) -> bool {
    value.get("webhook").map(Value::is_object).unwrap_or(false)
}

/// Subscription predicate: a `subscription` object. Checked before the event
/// predicate so a subscription result that also carries `data` rows cannot be
/// misclassified as an event.
pub fn is_subscription(value: &Value) -> bool {
    value
        .get("subscription")
        .map(Value::is_object)
        .unwrap_or(false)
}

/// Event predicate: a non-null `data` field.
pub fn is_event(value: &Value) -> bool {
    value.get("data").map(|d| !d.is_null()).unwrap_or(false)
}

impl Payload {
    /// Classify a raw payload by distinguishing field, in fixed priority
    /// order: command, webhook, subscription, event. Returns None when no
    /// predicate matches.
    pub fn classify(value: &Value) -> Option<PayloadKind> {
        if is_command(value) {
            Some(PayloadKind::Command)
        } else if is_webhook(value) {
            Some(PayloadKind::Webhook)
        } else if is_subscription(value) {
            Some(PayloadKind::Subscription)
        } else if is_event(value) {
            Some(PayloadKind::Event)
        } else {
            None
        }
    }

    /// Decode a raw payload into the tagged union. Unclassifiable payloads
    /// fail loudly here, before any downstream code can touch them.
    pub fn from_value(value: Value) -> Result<Payload, PayloadError> {
        match Payload::classify(&value) {
            Some(PayloadKind::Command) => Ok(Payload::Command(serde_json::from_value(value)?)),
            Some(PayloadKind::Webhook) => Ok(Payload::Webhook(serde_json::from_value(value)?)),
            Some(PayloadKind::Subscription) => {
                Ok(Payload::Subscription(serde_json::from_value(value)?))
            }
            Some(PayloadKind::Event) => Ok(Payload::Event(serde_json::from_value(value)?)),
            None => Err(PayloadError::Unclassifiable),
        }
    }

    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Command(_) => PayloadKind::Command,
            Payload::Event(_) => PayloadKind::Event,
            Payload::Subscription(_) => PayloadKind::Subscription,
            Payload::Webhook(_) => PayloadKind::Webhook,
        }
    }

    /// Handler name this payload targets (command name, operation name,
    /// subscription name, or webhook parameter name).
    pub fn name(&self) -> &str {
        match self {
            Payload::Command(c) => &c.command,
            Payload::Event(e) => &e.extensions.operation_name,
            Payload::Subscription(s) => &s.subscription.name,
            Payload::Webhook(w) => &w.webhook.parameter_name,
        }
    }

    /// Workspace id, derived by payload-kind-specific field access.
    pub fn workspace_id(&self) -> &str {
        match self {
            Payload::Command(c) => &c.team.id,
            Payload::Event(e) => &e.extensions.team_id,
            Payload::Subscription(s) => &s.team_id,
            Payload::Webhook(w) => &w.team_id,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Payload::Command(c) => &c.correlation_id,
            Payload::Event(e) => &e.extensions.correlation_id,
            Payload::Subscription(s) => &s.correlation_id,
            Payload::Webhook(w) => &w.correlation_id,
        }
    }

    pub fn skill(&self) -> &Skill {
        match self {
            Payload::Command(c) => &c.skill,
            Payload::Event(e) => &e.skill,
            Payload::Subscription(s) => &s.skill,
            Payload::Webhook(w) => &w.skill,
        }
    }

    pub fn secrets(&self) -> &[Secret] {
        match self {
            Payload::Command(c) => &c.secrets,
            Payload::Event(e) => &e.secrets,
            Payload::Subscription(s) => &s.secrets,
            Payload::Webhook(w) => &w.secrets,
        }
    }

    /// Active configuration: first entry of the configuration array.
    pub fn configuration(&self) -> Option<&Configuration> {
        let configurations = match self {
            Payload::Command(c) => &c.configurations,
            Payload::Event(e) => &e.configurations,
            Payload::Subscription(s) => &s.configurations,
            Payload::Webhook(w) => &w.configurations,
        };
        configurations.first()
    }

    /// API key from the payload's secrets, by well-known URI. Absence is
    /// tolerated; dependent clients fail on use, not here.
    pub fn api_key(&self) -> Option<&str> {
        self.secrets()
            .iter()
            .find(|s| s.uri == API_KEY_URI)
            .map(|s| s.value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn command_fixture() -> Value {
        json!({
            "command": "create-issue",
            "correlation_id": "corr-1",
            "team": { "id": "T1" },
            "parameters": [ { "name": "repo", "value": "sdk" } ],
            "secrets": [ { "uri": API_KEY_URI, "value": "key-1" } ],
            "skill": { "id": "s1", "name": "issues", "namespace": "acme", "version": "1.0.0" }
        })
    }

    fn event_fixture() -> Value {
        json!({
            "data": { "Push": [ { "branch": "main" } ] },
            "extensions": { "team_id": "T1", "operation_name": "onPush", "correlation_id": "corr-2" },
            "skill": { "name": "ci", "namespace": "acme" }
        })
    }

    fn subscription_fixture() -> Value {
        json!({
            "subscription": { "name": "on-commit", "tx": 42, "result": [[{ "sha": "abc" }]] },
            "correlation_id": "corr-3",
            "team_id": "T1",
            "skill": { "name": "policy", "namespace": "acme" }
        })
    }

    fn webhook_fixture() -> Value {
        json!({
            "webhook": {
                "parameter_name": "github",
                "body": "{\"action\":\"opened\"}",
                "headers": { "content-type": "application/json" },
                "url": "https://hook.example/github"
            },
            "correlation_id": "corr-4",
            "team_id": "T1",
            "skill": { "name": "hooks", "namespace": "acme" }
        })
    }

    #[test]
    fn exactly_one_predicate_matches_each_fixture() {
        for (value, expected) in [
            (command_fixture(), PayloadKind::Command),
            (event_fixture(), PayloadKind::Event),
            (subscription_fixture(), PayloadKind::Subscription),
            (webhook_fixture(), PayloadKind::Webhook),
        ] {
            let matches = [
                is_command(&value),
                is_webhook(&value),
                is_subscription(&value),
                is_event(&value),
            ]
            .iter()
            .filter(|m| **m)
            .count();
            assert_eq!(matches, 1, "expected exactly one predicate for {:?}", expected);
            assert_eq!(Payload::classify(&value), Some(expected));
        }
    }

    #[test]
    fn subscription_with_data_rows_is_not_an_event() {
        let mut value = subscription_fixture();
        value["data"] = json!({ "rows": [] });
        assert_eq!(Payload::classify(&value), Some(PayloadKind::Subscription));
    }

    #[test]
    fn unclassifiable_payload_is_an_error() {
        let err = Payload::from_value(json!({ "something": "else" })).unwrap_err();
        assert!(matches!(err, PayloadError::Unclassifiable));
    }

    #[test]
    fn api_key_is_extracted_by_uri() {
        let payload = Payload::from_value(command_fixture()).unwrap();
        assert_eq!(payload.api_key(), Some("key-1"));
        assert_eq!(payload.workspace_id(), "T1");
        assert_eq!(payload.name(), "create-issue");
    }

    #[test]
    fn missing_api_key_is_tolerated() {
        let payload = Payload::from_value(event_fixture()).unwrap();
        assert_eq!(payload.api_key(), None);
        assert_eq!(payload.name(), "onPush");
    }
}
