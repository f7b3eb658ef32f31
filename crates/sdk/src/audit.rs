//! Per-invocation audit log.
//!
//! The logger is carried on the execution context (never process-global), so
//! concurrent invocations in one process cannot interleave their identity
//! prefixes. Lines go to the `log` facade immediately and are retained on
//! the context for hosts that ship them elsewhere at close time.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl AuditLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditLevel::Debug => "debug",
            AuditLevel::Info => "info",
            AuditLevel::Warn => "warn",
            AuditLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditLine {
    pub at: DateTime<Utc>,
    pub level: AuditLevel,
    pub message: String,
}

/// Audit logger bound to one invocation's identifiers. Cloning shares the
/// underlying line buffer.
#[derive(Clone)]
pub struct AuditLog {
    workspace_id: String,
    correlation_id: String,
    skill: String,
    lines: Arc<Mutex<Vec<AuditLine>>>,
}

impl AuditLog {
    pub fn new(
        workspace_id: impl Into<String>,
        correlation_id: impl Into<String>,
        skill: impl Into<String>,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            correlation_id: correlation_id.into(),
            skill: skill.into(),
            lines: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn record(&self, level: AuditLevel, message: String) {
        let log_level = match level {
            AuditLevel::Debug => log::Level::Debug,
            AuditLevel::Info => log::Level::Info,
            AuditLevel::Warn => log::Level::Warn,
            AuditLevel::Error => log::Level::Error,
        };
        log::log!(
            target: "audit",
            log_level,
            "[{}] [{}] [{}] {}",
            self.workspace_id,
            self.correlation_id,
            self.skill,
            message
        );
        self.lines.lock().await.push(AuditLine {
            at: Utc::now(),
            level,
            message,
        });
    }

    pub async fn debug(&self, message: impl Into<String>) {
        self.record(AuditLevel::Debug, message.into()).await;
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.record(AuditLevel::Info, message.into()).await;
    }

    pub async fn warn(&self, message: impl Into<String>) {
        self.record(AuditLevel::Warn, message.into()).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.record(AuditLevel::Error, message.into()).await;
    }

    /// All lines recorded so far (clone; the buffer keeps growing until close).
    pub async fn lines(&self) -> Vec<AuditLine> {
        self.lines.lock().await.clone()
    }

    /// Drain retained lines at context close; the count is logged for tracing.
    pub async fn flush(&self) -> Vec<AuditLine> {
        let mut g = self.lines.lock().await;
        let drained: Vec<AuditLine> = g.drain(..).collect();
        log::debug!(
            "audit log for {} flushed {} lines ({})",
            self.correlation_id,
            drained.len(),
            self.skill
        );
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lines_are_retained_and_flushed_once() {
        let audit = AuditLog::new("T1", "corr", "acme/issues");
        audit.info("step one").await;
        audit.warn("step two slow").await;
        assert_eq!(audit.lines().await.len(), 2);
        let flushed = audit.flush().await;
        assert_eq!(flushed.len(), 2);
        assert_eq!(flushed[0].message, "step one");
        assert_eq!(flushed[1].level, AuditLevel::Warn);
        assert!(audit.lines().await.is_empty());
    }
}
