//! # Plancraft VM
//!
//! The execution layer for model-written programs.
//!
//! ## Core Concepts
//! - **Program**: a JSON sequence of function calls with back-references
//! - **Interpreter**: evaluates programs against a `Dispatch` target
//! - **Trace**: hierarchical spans closed on every exit path
//! - **Schema**: prompt-ready grammar and API declarations
//! - **Provider**: trait-based completion services (OpenAI-compatible, scripted)

pub mod error;
pub mod interpreter;
pub mod program;
pub mod provider;
pub mod schema;
pub mod trace;

pub use error::{Error, ErrorKind, ErrorStatus, Result};
pub use interpreter::{Dispatch, Interpreter, StepScheduling};
pub use program::{Expression, FunctionCall, Program};
pub use provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
    OpenAIProvider, ProviderConfig, ProviderError, ProviderType, Role, ScriptedProvider, Usage,
    UsageTracker,
};
pub use schema::{ApiFunction, ApiParam, ApiSchema, PROGRAM_GRAMMAR};
pub use trace::{
    LogTracer, MemoryTracer, NoopTracer, Span, SpanId, SpanKind, SpanOutcome, SpanRecord, Tracer,
};
