//! # Trace Recorder
//!
//! Hierarchical spans around turns, model calls, validation and delegate
//! invocations. A [`Span`] closes exactly once: explicitly through
//! [`Span::succeed`] / [`Span::fail`], or as failed when it is dropped
//! (early return, `?`, cancellation).
//!
//! Recorders:
//! - [`NoopTracer`]: discards everything
//! - [`LogTracer`]: emits `tracing` events with elapsed time
//! - [`MemoryTracer`]: keeps the span tree for inspection and rendering

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, warn};

pub type SpanId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    /// A multi-step unit of work (a request, a turn, a delegate)
    Chain,
    /// A model completion
    Llm,
    /// Program validation
    Parser,
    /// A skill or built-in invocation
    Tool,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Chain => "chain",
            SpanKind::Llm => "llm",
            SpanKind::Parser => "parser",
            SpanKind::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SpanOutcome {
    Succeeded { outputs: Value },
    Failed { message: String, outputs: Value },
}

impl SpanOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SpanOutcome::Succeeded { .. })
    }
}

/// Receives span lifecycle events
pub trait Tracer: Send + Sync {
    fn begin_span(&self, parent: Option<SpanId>, name: &str, kind: SpanKind, inputs: &Value) -> SpanId;
    fn end_span(&self, id: SpanId, outcome: SpanOutcome);
}

const DROPPED_MESSAGE: &str = "span closed without completion";

/// An open span. Closes as failed on drop unless finished explicitly.
pub struct Span {
    tracer: Arc<dyn Tracer>,
    id: SpanId,
    name: String,
    open: bool,
}

impl Span {
    pub fn root(tracer: Arc<dyn Tracer>, name: impl Into<String>, kind: SpanKind, inputs: Value) -> Self {
        let name = name.into();
        let id = tracer.begin_span(None, &name, kind, &inputs);
        Self {
            tracer,
            id,
            name,
            open: true,
        }
    }

    pub fn child(&self, name: impl Into<String>, kind: SpanKind, inputs: Value) -> Self {
        let name = name.into();
        let id = self.tracer.begin_span(Some(self.id), &name, kind, &inputs);
        Self {
            tracer: Arc::clone(&self.tracer),
            id,
            name,
            open: true,
        }
    }

    pub fn id(&self) -> SpanId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn succeed(mut self, outputs: Value) {
        self.close(SpanOutcome::Succeeded { outputs });
    }

    pub fn fail(mut self, message: impl Into<String>, outputs: Value) {
        self.close(SpanOutcome::Failed {
            message: message.into(),
            outputs,
        });
    }

    fn close(&mut self, outcome: SpanOutcome) {
        if self.open {
            self.open = false;
            self.tracer.end_span(self.id, outcome);
        }
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        self.close(SpanOutcome::Failed {
            message: DROPPED_MESSAGE.into(),
            outputs: Value::Null,
        });
    }
}

// =============================================================================
// NoopTracer
// =============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl NoopTracer {
    pub fn shared() -> Arc<dyn Tracer> {
        Arc::new(NoopTracer)
    }
}

impl Tracer for NoopTracer {
    fn begin_span(&self, _parent: Option<SpanId>, _name: &str, _kind: SpanKind, _inputs: &Value) -> SpanId {
        0
    }

    fn end_span(&self, _id: SpanId, _outcome: SpanOutcome) {}
}

// =============================================================================
// LogTracer
// =============================================================================

/// Emits span open/close as `tracing` events
#[derive(Debug, Default)]
pub struct LogTracer {
    next_id: AtomicU64,
    open: Mutex<HashMap<SpanId, (String, Instant)>>,
}

impl LogTracer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tracer for LogTracer {
    fn begin_span(&self, parent: Option<SpanId>, name: &str, kind: SpanKind, _inputs: &Value) -> SpanId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, (name.to_string(), Instant::now()));
        debug!(span_id = id, parent = ?parent, kind = kind.as_str(), "{} started", name);
        id
    }

    fn end_span(&self, id: SpanId, outcome: SpanOutcome) {
        let entry = self
            .open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        let (name, started) = match entry {
            Some(entry) => entry,
            None => return,
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            SpanOutcome::Succeeded { .. } => {
                debug!(span_id = id, elapsed_ms, "{} succeeded", name)
            }
            SpanOutcome::Failed { message, .. } => {
                warn!(span_id = id, elapsed_ms, error = %message, "{} failed", name)
            }
        }
    }
}

// =============================================================================
// MemoryTracer
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SpanRecord {
    pub id: SpanId,
    pub parent: Option<SpanId>,
    pub name: String,
    pub kind: SpanKind,
    pub inputs: Value,
    pub outcome: Option<SpanOutcome>,
}

/// Keeps every span in memory, in opening order
#[derive(Debug, Default)]
pub struct MemoryTracer {
    records: Mutex<Vec<SpanRecord>>,
}

impl MemoryTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SpanRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Spans with exactly this name
    pub fn find(&self, name: &str) -> Vec<SpanRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.name == name)
            .collect()
    }

    /// Spans whose name starts with `prefix`
    pub fn find_prefix(&self, prefix: &str) -> Vec<SpanRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.name.starts_with(prefix))
            .collect()
    }

    /// True when every opened span has been closed
    pub fn all_closed(&self) -> bool {
        self.records().iter().all(|r| r.outcome.is_some())
    }

    /// Indented tree, one span per line
    pub fn render_tree(&self) -> String {
        let records = self.records();
        let mut out = String::new();
        for root in records.iter().filter(|r| r.parent.is_none()) {
            render_node(&records, root, 0, &mut out);
        }
        out
    }
}

fn render_node(records: &[SpanRecord], node: &SpanRecord, depth: usize, out: &mut String) {
    let status = match &node.outcome {
        Some(SpanOutcome::Succeeded { .. }) => "ok".to_string(),
        Some(SpanOutcome::Failed { message, .. }) => format!("failed: {}", message),
        None => "open".to_string(),
    };
    let _ = writeln!(
        out,
        "{}{} [{}] {}",
        "  ".repeat(depth),
        node.name,
        node.kind.as_str(),
        status
    );
    for child in records.iter().filter(|r| r.parent == Some(node.id)) {
        render_node(records, child, depth + 1, out);
    }
}

impl Tracer for MemoryTracer {
    fn begin_span(&self, parent: Option<SpanId>, name: &str, kind: SpanKind, inputs: &Value) -> SpanId {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let id = records.len() as SpanId + 1;
        records.push(SpanRecord {
            id,
            parent,
            name: name.to_string(),
            kind,
            inputs: inputs.clone(),
            outcome: None,
        });
        id
    }

    fn end_span(&self, id: SpanId, outcome: SpanOutcome) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(record) = records.iter_mut().find(|r| r.id == id) {
            if record.outcome.is_none() {
                record.outcome = Some(outcome);
            }
        }
    }
}
