//! Step runner: named steps with skip predicates, listener notification, and
//! audit logging. The higher-level alternative to raw chaining for
//! multi-stage workflows.
//!
//! Per-step state machine: Pending → (Skipped | Running → (Completed |
//! Failed)). A failed step, or a step returning a nonzero-code status, stops
//! the run and becomes the overall result. Listeners observe every
//! transition; a listener error is logged and can never abort a run.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

use crate::chain::ChainState;
use crate::context::Context;
use crate::handler::Status;

type StepFn =
    Arc<dyn Fn(Arc<Context>, Arc<ChainState>) -> BoxFuture<'static, anyhow::Result<Status>> + Send + Sync>;
type WhenFn =
    Arc<dyn Fn(Arc<Context>, Arc<ChainState>) -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync>;

/// A named unit of work sharing the run's parameter bag.
pub struct Step {
    pub name: String,
    run: StepFn,
    run_when: Option<WhenFn>,
}

impl Step {
    pub fn new<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(Arc<Context>, Arc<ChainState>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Status>> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Arc::new(move |ctx, state| Box::pin(run(ctx, state))),
            run_when: None,
        }
    }

    /// Skip this step unless the predicate holds. A predicate error counts
    /// as a step failure.
    pub fn run_when<F, Fut>(mut self, when: F) -> Self
    where
        F: Fn(Arc<Context>, Arc<ChainState>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        self.run_when = Some(Arc::new(move |ctx, state| Box::pin(when(ctx, state))));
        self
    }
}

/// Observer of step transitions. Default implementations ignore everything,
/// so listeners implement only what they care about.
#[async_trait]
pub trait StepListener: Send + Sync {
    async fn starting(&self, _step: &str) -> anyhow::Result<()> {
        Ok(())
    }
    async fn skipped(&self, _step: &str) -> anyhow::Result<()> {
        Ok(())
    }
    async fn completed(&self, _step: &str, _status: &Status) -> anyhow::Result<()> {
        Ok(())
    }
    async fn failed(&self, _step: &str, _reason: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Run steps in order against one shared [`ChainState`] bag. Returns the
/// stopping status (first failure/nonzero) or the last completed status.
pub async fn run_steps(
    ctx: Arc<Context>,
    steps: Vec<Step>,
    listeners: Vec<Arc<dyn StepListener>>,
) -> anyhow::Result<Status> {
    let state = Arc::new(ChainState::new());
    let mut last = Status::success();

    for step in &steps {
        if let Some(when) = &step.run_when {
            match when(ctx.clone(), state.clone()).await {
                Ok(true) => {}
                Ok(false) => {
                    ctx.audit
                        .info(format!("skipping step '{}'", step.name))
                        .await;
                    for l in &listeners {
                        if let Err(e) = l.skipped(&step.name).await {
                            log::warn!("step listener failed: {:#}", e);
                        }
                    }
                    continue;
                }
                Err(e) => {
                    let reason = format!("step '{}' predicate failed: {:#}", step.name, e);
                    ctx.audit.error(reason.clone()).await;
                    for l in &listeners {
                        if let Err(e) = l.failed(&step.name, &reason).await {
                            log::warn!("step listener failed: {:#}", e);
                        }
                    }
                    return Ok(Status::failure(reason));
                }
            }
        }

        ctx.audit
            .info(format!("starting step '{}'", step.name))
            .await;
        for l in &listeners {
            if let Err(e) = l.starting(&step.name).await {
                log::warn!("step listener failed: {:#}", e);
            }
        }

        match (step.run)(ctx.clone(), state.clone()).await {
            Ok(status) if status.is_success() => {
                ctx.audit
                    .info(format!("completed step '{}'", step.name))
                    .await;
                for l in &listeners {
                    if let Err(e) = l.completed(&step.name, &status).await {
                        log::warn!("step listener failed: {:#}", e);
                    }
                }
                last = status;
            }
            Ok(status) => {
                let reason = status
                    .reason
                    .clone()
                    .unwrap_or_else(|| format!("step '{}' returned a failure status", step.name));
                ctx.audit
                    .error(format!("failed step '{}': {}", step.name, reason))
                    .await;
                for l in &listeners {
                    if let Err(e) = l.failed(&step.name, &reason).await {
                        log::warn!("step listener failed: {:#}", e);
                    }
                }
                return Ok(status);
            }
            Err(e) => {
                let reason = format!("step '{}' failed: {:#}", step.name, e);
                ctx.audit.error(reason.clone()).await;
                for l in &listeners {
                    if let Err(e) = l.failed(&step.name, &reason).await {
                        log::warn!("step listener failed: {:#}", e);
                    }
                }
                return Ok(Status::failure(reason));
            }
        }
    }

    Ok(last)
}
