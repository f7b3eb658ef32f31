//! Transport envelope decoding and `message_uri` indirection.
//!
//! The queue delivers `{ data: base64-JSON, attributes? }` plus an event id.
//! A decoded body may carry a `message_uri` pointer instead of inline data;
//! registered message sources fetch the pointed-to body and resolution
//! recurses (capped, so a pointer cycle cannot loop forever).

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::clients::storage::Storage;
use crate::payload::{Payload, PayloadError};

/// Maximum `message_uri` hops followed during resolution.
pub const MAX_RESOLUTION_HOPS: usize = 10;

/// Invocation id for hosts whose transport does not supply one.
pub fn generate_event_id() -> String {
    format!("evt-{}", uuid::Uuid::new_v4())
}

/// Raw envelope as delivered by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportEnvelope {
    /// Base64-encoded JSON payload body.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<HashMap<String, String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("envelope data is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("envelope body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown message_uri: {0}")]
    UnknownUri(String),
    #[error("message_uri fetch failed for {uri}: {reason}")]
    Fetch { uri: String, reason: String },
    #[error("message_uri resolution exceeded {MAX_RESOLUTION_HOPS} hops")]
    TooManyHops,
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

/// A source that can fetch a pointed-to envelope body.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// True when this source handles the given URI (scheme match).
    fn supports(&self, uri: &str) -> bool;
    /// Fetch the raw JSON bytes the URI points to.
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, EnvelopeError>;
}

/// Source backed by a [`Storage`] implementation (e.g. `file://` layout).
pub struct StorageSource {
    storage: Arc<dyn Storage>,
}

impl StorageSource {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl MessageSource for StorageSource {
    fn supports(&self, uri: &str) -> bool {
        self.storage.supports(uri)
    }

    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, EnvelopeError> {
        self.storage.get(uri).await.map_err(|e| EnvelopeError::Fetch {
            uri: uri.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Source for `https://` message pointers.
pub struct HttpSource {
    client: reqwest::Client,
}

impl Default for HttpSource {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpSource {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl MessageSource for HttpSource {
    fn supports(&self, uri: &str) -> bool {
        uri.starts_with("https://") || uri.starts_with("http://")
    }

    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, EnvelopeError> {
        let res = self
            .client
            .get(uri)
            .send()
            .await
            .map_err(|e| EnvelopeError::Fetch {
                uri: uri.to_string(),
                reason: e.to_string(),
            })?;
        if !res.status().is_success() {
            return Err(EnvelopeError::Fetch {
                uri: uri.to_string(),
                reason: format!("status {}", res.status()),
            });
        }
        let bytes = res.bytes().await.map_err(|e| EnvelopeError::Fetch {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }
}

/// Ordered list of message sources; first `supports` match wins.
pub struct EnvelopeResolver {
    sources: Vec<Arc<dyn MessageSource>>,
}

impl Default for EnvelopeResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeResolver {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    pub fn register(&mut self, source: Arc<dyn MessageSource>) {
        self.sources.push(source);
    }

    /// Decode an envelope and follow any `message_uri` pointers until an
    /// inline body is reached, then classify it into a [`Payload`].
    pub async fn resolve(&self, envelope: &TransportEnvelope) -> Result<Payload, EnvelopeError> {
        let decoded = base64::engine::general_purpose::STANDARD.decode(&envelope.data)?;
        let mut body: Value = serde_json::from_slice(&decoded)?;

        let mut hops = 0;
        while let Some(uri) = body.get("message_uri").and_then(Value::as_str) {
            if hops >= MAX_RESOLUTION_HOPS {
                return Err(EnvelopeError::TooManyHops);
            }
            hops += 1;
            let uri = uri.to_string();
            let source = self
                .sources
                .iter()
                .find(|s| s.supports(&uri))
                .ok_or_else(|| EnvelopeError::UnknownUri(uri.clone()))?;
            log::debug!("resolving message_uri {} (hop {})", uri, hops);
            let bytes = source.fetch(&uri).await?;
            body = serde_json::from_slice(&bytes)?;
        }

        Ok(Payload::from_value(body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(value: &Value) -> String {
        base64::engine::general_purpose::STANDARD.encode(value.to_string())
    }

    struct MapSource(HashMap<String, Vec<u8>>);

    #[async_trait]
    impl MessageSource for MapSource {
        fn supports(&self, uri: &str) -> bool {
            uri.starts_with("mem://")
        }

        async fn fetch(&self, uri: &str) -> Result<Vec<u8>, EnvelopeError> {
            self.0.get(uri).cloned().ok_or_else(|| EnvelopeError::Fetch {
                uri: uri.to_string(),
                reason: "missing".to_string(),
            })
        }
    }

    fn command_body() -> Value {
        json!({
            "command": "deploy",
            "correlation_id": "c",
            "team": { "id": "T1" },
            "skill": { "name": "deployer", "namespace": "acme" }
        })
    }

    #[tokio::test]
    async fn inline_body_resolves_directly() {
        let resolver = EnvelopeResolver::new();
        let envelope = TransportEnvelope {
            data: encode(&command_body()),
            attributes: None,
        };
        let payload = resolver.resolve(&envelope).await.unwrap();
        assert_eq!(payload.name(), "deploy");
    }

    #[tokio::test]
    async fn message_uri_is_followed_through_two_hops() {
        let mut store = HashMap::new();
        store.insert(
            "mem://outer".to_string(),
            json!({ "message_uri": "mem://inner" }).to_string().into_bytes(),
        );
        store.insert(
            "mem://inner".to_string(),
            command_body().to_string().into_bytes(),
        );
        let mut resolver = EnvelopeResolver::new();
        resolver.register(Arc::new(MapSource(store)));
        let envelope = TransportEnvelope {
            data: encode(&json!({ "message_uri": "mem://outer" })),
            attributes: None,
        };
        let payload = resolver.resolve(&envelope).await.unwrap();
        assert_eq!(payload.name(), "deploy");
    }

    #[tokio::test]
    async fn unknown_message_uri_fails_with_the_uri() {
        let resolver = EnvelopeResolver::new();
        let envelope = TransportEnvelope {
            data: encode(&json!({ "message_uri": "gs://bucket/key" })),
            attributes: None,
        };
        let err = resolver.resolve(&envelope).await.unwrap_err();
        assert!(matches!(err, EnvelopeError::UnknownUri(u) if u == "gs://bucket/key"));
    }

    #[tokio::test]
    async fn pointer_cycle_hits_the_hop_cap() {
        let mut store = HashMap::new();
        store.insert(
            "mem://a".to_string(),
            json!({ "message_uri": "mem://a" }).to_string().into_bytes(),
        );
        let mut resolver = EnvelopeResolver::new();
        resolver.register(Arc::new(MapSource(store)));
        let envelope = TransportEnvelope {
            data: encode(&json!({ "message_uri": "mem://a" })),
            attributes: None,
        };
        let err = resolver.resolve(&envelope).await.unwrap_err();
        assert!(matches!(err, EnvelopeError::TooManyHops));
    }
}
