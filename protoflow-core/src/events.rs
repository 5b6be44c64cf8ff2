use crate::types::*;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use uuid::Uuid;

/// Session events — the audit trail for one protocol run.
///
/// The core emits these exactly once per occurrence; durable writing is the
/// collaborator's job behind [`EventSink`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionStarted {
        session_id: Uuid,
        step_count: usize,
        transitions: TransitionMode,
    },
    /// An instruction step was served. Logged once, when first shown.
    InstructionShown {
        step_index: StepIndex,
        line: LineNo,
        header: String,
        body: String,
    },
    /// The user answered a scale or branch-scale step. Logged once, when the
    /// following navigation request consumes the selection. `option_index`
    /// is 1-based in the log.
    ResponseRecorded {
        step_index: StepIndex,
        kind: StepKind,
        header: String,
        body: String,
        item: String,
        option_index: usize,
        display: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    /// An explicit label jump was taken.
    JumpTaken {
        from: StepIndex,
        to: StepIndex,
        label: String,
    },
    /// The cursor advanced sequentially to a step.
    Advanced { to: StepIndex },
    SessionCompleted { at: Timestamp },
}

/// Durable-logging collaborator boundary.
///
/// Synchronous and object-safe: the core is pure computation with no
/// suspension points, so sinks that need real I/O buffer or block on their
/// own terms. `append` returns the event's sequence number.
pub trait EventSink: Send + Sync {
    fn append(&self, event: &SessionEvent) -> Result<u64>;
}

// ── MemorySink ──

/// In-memory EventSink for tests and the POC.
pub struct MemorySink {
    inner: RwLock<Vec<SessionEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Vec::new()),
        }
    }

    /// Snapshot of everything appended so far, in order.
    pub fn events(&self) -> Vec<SessionEvent> {
        self.inner.read().map(|v| v.clone()).unwrap_or_default()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for MemorySink {
    fn append(&self, event: &SessionEvent) -> Result<u64> {
        let mut events = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        events.push(event.clone());
        Ok(events.len() as u64)
    }
}

/// Current wall-clock time as epoch milliseconds.
pub fn now_ms() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}
