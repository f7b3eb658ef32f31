//! Handler chaining: sequential composition with short-circuit and an
//! explicit shared accumulator.
//!
//! Links run in order against the same context and a [`ChainState`] bag
//! created per chain run. The first link returning a status ends the chain
//! with that status; all-`None` means success. State written by earlier
//! links is visible to later ones; entries are never removed.

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::context::Context;
use crate::handler::{Handler, Outcome, Status};

/// String-keyed accumulator threaded through a chain (and the step runner).
/// Values are JSON so links can exchange arbitrary structures.
#[derive(Default)]
pub struct ChainState {
    inner: RwLock<serde_json::Map<String, Value>>,
}

impl ChainState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialization failure leaves the state untouched and surfaces the
    /// error, so a bad value never masquerades as `null` downstream.
    pub async fn insert(
        &self,
        key: impl Into<String>,
        value: impl Serialize,
    ) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.inner.write().await.insert(key.into(), value);
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.inner.read().await.get(key).cloned()
    }

    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        serde_json::from_value(value).ok()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.read().await.contains_key(key)
    }
}

/// One link of a chain: may read/write the shared state and either pass
/// (`None`) or short-circuit with a status.
pub type ChainLink = Arc<
    dyn Fn(Arc<Context>, Arc<ChainState>) -> BoxFuture<'static, anyhow::Result<Option<Status>>>
        + Send
        + Sync,
>;

/// Wrap an async closure as a [`ChainLink`].
pub fn link<F, Fut>(f: F) -> ChainLink
where
    F: Fn(Arc<Context>, Arc<ChainState>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<Status>>> + Send + 'static,
{
    Arc::new(move |ctx, state| Box::pin(f(ctx, state)))
}

/// Compose links into a single handler. A fresh [`ChainState`] is created
/// per invocation; a link error aborts the chain and propagates to dispatch.
pub fn chain(links: Vec<ChainLink>) -> Handler {
    let links = Arc::new(links);
    Arc::new(move |ctx: Arc<Context>| {
        let links = links.clone();
        Box::pin(async move {
            let state = Arc::new(ChainState::new());
            for link in links.iter() {
                if let Some(status) = link(ctx.clone(), state.clone()).await? {
                    return Ok(Outcome::Complete(Some(status)));
                }
            }
            Ok(Outcome::Complete(None))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{FileStorage, RecordingMessageClient};
    use crate::config::SdkConfig;
    use crate::context::ContextFactory;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn test_context() -> Arc<Context> {
        ContextFactory::new(
            SdkConfig::default(),
            Arc::new(RecordingMessageClient::new()),
            Arc::new(FileStorage::new(std::env::temp_dir())),
        )
        .create_from_value(
            json!({
                "command": "policy-check",
                "correlation_id": "corr",
                "team": { "id": "T1" },
                "skill": { "name": "policy", "namespace": "acme" }
            }),
            "e1",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn first_truthy_status_short_circuits() {
        let third_ran = Arc::new(AtomicBool::new(false));
        let third_ran_probe = third_ran.clone();

        let handler = chain(vec![
            link(|_ctx, _state| async { Ok(None) }),
            link(|_ctx, _state| async { Ok(Some(Status::failure("check failed"))) }),
            link(move |_ctx, _state| {
                let third_ran = third_ran_probe.clone();
                async move {
                    third_ran.store(true, Ordering::SeqCst);
                    Ok(None)
                }
            }),
        ]);

        let outcome = handler(test_context()).await.unwrap();
        match outcome {
            Outcome::Complete(Some(status)) => {
                assert_eq!(status.reason.as_deref(), Some("check failed"));
            }
            other => panic!("expected short-circuit status, got {:?}", other),
        }
        assert!(!third_ran.load(Ordering::SeqCst), "third link must not run");
    }

    #[tokio::test]
    async fn all_none_resolves_to_success() {
        let handler = chain(vec![
            link(|_ctx, _state| async { Ok(None) }),
            link(|_ctx, _state| async { Ok(None) }),
        ]);
        let outcome = handler(test_context()).await.unwrap();
        assert!(matches!(outcome, Outcome::Complete(None)));
    }

    #[tokio::test]
    async fn state_written_by_earlier_links_is_visible_later() {
        let handler = chain(vec![
            link(|_ctx, state| async move {
                state.insert("repo_id", "R42").await?;
                Ok(None)
            }),
            link(|_ctx, state| async move {
                let repo: String = state.get_as("repo_id").await.unwrap();
                assert_eq!(repo, "R42");
                Ok(Some(Status::success_with(format!("resolved {}", repo))))
            }),
        ]);
        let outcome = handler(test_context()).await.unwrap();
        match outcome {
            Outcome::Complete(Some(status)) => {
                assert_eq!(status.reason.as_deref(), Some("resolved R42"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn insert_surfaces_unserializable_values() {
        let state = ChainState::new();
        // serde_json rejects non-string map keys at serialization time.
        let bad: std::collections::HashMap<(u8, u8), u8> =
            [((1, 2), 3)].into_iter().collect();
        assert!(state.insert("bad", bad).await.is_err());
        assert!(!state.contains("bad").await);
    }

    #[tokio::test]
    async fn link_error_propagates() {
        let handler = chain(vec![link(|_ctx, _state| async {
            anyhow::bail!("link exploded")
        })]);
        let err = handler(test_context()).await.unwrap_err();
        assert!(err.to_string().contains("link exploded"));
    }
}
