//! # Turn Orchestrator
//!
//! Drives one request through a bounded sequence of turns:
//!
//! ```text
//! advance turn ──► plan (validated program) ──► evaluate ──► intermediate? ──► next turn
//!      │                                                  └─► final ──► Outcome
//!      └─ budget spent ──► StackOverflow escalation
//! ```
//!
//! Built-ins are handled locally, every other call goes to the delegate
//! registry. Delegate failures become the recorded answer; an unknown name,
//! an exhausted planner or a spent budget ends the request. Every failure is
//! converted into an [`Outcome`] at the [`Orchestrator::execute`] boundary.

use crate::builtin::{format_output_message, value_text, Builtin};
use crate::config::AgentConfig;
use crate::delegate::DelegateRegistry;
use crate::outcome::{EscalationKind, Outcome};
use crate::planner::{PlanGenerator, Transcript};
use crate::prompt::{first_turn_prompt, next_turn_prompt, orchestrator_api};
use crate::state::{Memory, MemoryEntry, TurnState};
use crate::validator::{ProgramKind, TurnValidator};
use async_trait::async_trait;
use plancraft_error::{Error, Result};
use plancraft_vm::schema::system_prompt;
use plancraft_vm::{
    ApiSchema, Dispatch, Interpreter, NoopTracer, Program, Span, SpanKind, StepScheduling, Tracer,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

pub struct Orchestrator {
    planner: Arc<PlanGenerator>,
    registry: Arc<DelegateRegistry>,
    config: AgentConfig,
    tracer: Arc<dyn Tracer>,
}

/// What one evaluated turn produced
struct TurnReport {
    kind: ProgramKind,
    results: Vec<Value>,
    record: TurnRecord,
}

#[derive(Debug, Default)]
struct TurnRecord {
    entries: Vec<MemoryEntry>,
    reflection: Option<Value>,
    responses: Vec<String>,
}

impl Orchestrator {
    pub fn new(planner: Arc<PlanGenerator>, registry: DelegateRegistry, config: AgentConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            planner,
            registry: Arc::new(registry),
            config,
            tracer: NoopTracer::shared(),
        })
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn registry(&self) -> &DelegateRegistry {
        &self.registry
    }

    pub fn api_schema(&self) -> ApiSchema {
        orchestrator_api(&self.registry)
    }

    pub fn system_prompt(&self) -> String {
        system_prompt(&self.api_schema())
    }

    /// Answer `request`. Never fails: every error becomes an escalation.
    pub async fn execute(&self, request: &str) -> Outcome {
        let span = Span::root(
            Arc::clone(&self.tracer),
            "Orchestrator",
            SpanKind::Chain,
            self.span_inputs(request),
        );
        self.execute_in(request, span).await
    }

    /// Same as [`Orchestrator::execute`], traced under `parent`
    pub async fn execute_within(&self, request: &str, parent: &Span) -> Outcome {
        let span = parent.child("Orchestrator", SpanKind::Chain, self.span_inputs(request));
        self.execute_in(request, span).await
    }

    fn span_inputs(&self, request: &str) -> Value {
        json!({
            "prompt": request,
            "maxTurns": self.config.max_turns,
            "agents": self.registry.names().collect::<Vec<_>>(),
        })
    }

    async fn execute_in(&self, request: &str, span: Span) -> Outcome {
        let outcome = match self.drive(request, &span).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "request escalated");
                Outcome::from_error(&err)
            }
        };

        let outputs = serde_json::to_value(&outcome).unwrap_or(Value::Null);
        match outcome.escalation_kind() {
            None => span.succeed(outputs),
            Some(kind) => span.fail(kind.to_string(), outputs),
        }
        outcome
    }

    async fn drive(&self, request: &str, span: &Span) -> Result<Outcome> {
        let mut state = TurnState::new(self.config.max_turns);
        let mut transcript = Transcript::new(self.system_prompt());
        let mut prompt = first_turn_prompt(request);

        loop {
            let turn = state.advance()?;
            info!(turn, max_turns = state.max_turns(), "starting turn");
            let turn_span = span.child(
                format!("Orchestrator.Turn[{}]", turn),
                SpanKind::Chain,
                json!({ "prompt": request, "memory": state.memory() }),
            );

            transcript.push_user(prompt);
            let report = match self.run_turn(&mut transcript, state.memory(), &turn_span).await {
                Ok(report) => report,
                Err(err) => {
                    turn_span.fail(err.message().to_string(), json!({ "kind": err.kind().to_string() }));
                    return Err(err);
                }
            };

            let TurnReport { kind, results, record } = report;
            debug!(turn, answers = record.entries.len(), "turn evaluated");
            state.record_turn(record.entries, record.reflection);

            match kind {
                ProgramKind::Intermediate => {
                    turn_span.succeed(json!({ "results": results }));
                    prompt = next_turn_prompt(
                        request,
                        turn + 1,
                        state.reflection(),
                        &record.responses,
                        state.memory(),
                    );
                }
                ProgramKind::Success => {
                    let answer = results.last().map(value_text).unwrap_or_default();
                    turn_span.succeed(json!({ "answer": answer }));
                    info!(turn, "request answered");
                    return Ok(Outcome::answer(answer));
                }
                ProgramKind::GiveUp => {
                    let reason = results.last().map(value_text).unwrap_or_default();
                    turn_span.succeed(json!({ "escalation": reason }));
                    info!(turn, "request cannot be handled");
                    return Ok(Outcome::escalation(EscalationKind::DeadEnd, reason));
                }
            }
        }
    }

    async fn run_turn(&self, transcript: &mut Transcript, memory: &Memory, span: &Span) -> Result<TurnReport> {
        let validate = |program: Program| TurnValidator::new(memory).validate(program);
        let validated = self.planner.plan(transcript, &validate, span).await?;
        if validated.corrected {
            info!("program had no terminal step, continuing with ThinkMore");
        }
        debug!("evaluating program\n{}", validated.program);

        let dispatch = TurnDispatch {
            registry: &self.registry,
            span,
            permits: Semaphore::new(self.config.max_concurrent_delegates),
            record: Mutex::new(TurnRecord::default()),
        };
        let results = self.interpreter().evaluate(&validated.program, &dispatch).await?;

        Ok(TurnReport {
            kind: validated.kind,
            results,
            record: dispatch.finish(),
        })
    }

    fn interpreter(&self) -> Interpreter {
        let scheduling = if self.config.parallel_steps {
            StepScheduling::Independent
        } else {
            StepScheduling::Sequential
        };
        Interpreter::new().with_scheduling(scheduling)
    }
}

/// Dispatch target for one turn's program
struct TurnDispatch<'a> {
    registry: &'a DelegateRegistry,
    span: &'a Span,
    permits: Semaphore,
    record: Mutex<TurnRecord>,
}

impl TurnDispatch<'_> {
    fn finish(self) -> TurnRecord {
        self.record.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn builtin(&self, builtin: Builtin, args: Vec<Value>) -> Value {
        let first = args.first().cloned().unwrap_or(Value::Null);
        match builtin {
            Builtin::WriteThoughts => {
                self.record
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .reflection = Some(first.clone());
                first
            }
            Builtin::ThinkMore => Value::Null,
            Builtin::CompleteAssignment | Builtin::DeadEnd => Value::String(value_text(&first)),
            Builtin::OutputMessage => Value::String(format_output_message(&first, args.get(1))),
        }
    }

    async fn delegate(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let delegate = self.registry.get(name).ok_or_else(|| {
            Error::unknown_capability(name).with_operation("orchestrator::dispatch")
        })?;
        let question = args.first().map(value_text).unwrap_or_default();

        let _permit = self.permits.acquire().await.map_err(|err| {
            Error::unexpected("delegate permits closed")
                .with_operation("orchestrator::dispatch")
                .set_source(err)
        })?;

        let span = self.span.child(
            format!("Orchestrator.{}", name),
            SpanKind::Chain,
            json!({ "prompt": question }),
        );
        let answer = match delegate.invoke(&question, &span).await {
            Ok(answer) => {
                span.succeed(json!({ "response": answer }));
                answer
            }
            Err(err) => {
                warn!(agent = name, error = %err, "agent failed, recording error as answer");
                span.fail(
                    format!("Agent {} failed to handle request", name),
                    json!({ "message": err.message() }),
                );
                err.message().to_string()
            }
        };

        let mut record = self.record.lock().unwrap_or_else(PoisonError::into_inner);
        record.entries.push(MemoryEntry {
            agent: name.to_string(),
            question,
            answer: answer.clone(),
        });
        record.responses.push(answer.clone());
        Ok(Value::String(answer))
    }
}

#[async_trait]
impl Dispatch for TurnDispatch<'_> {
    async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        match Builtin::from_name(name) {
            Some(builtin) => Ok(self.builtin(builtin, args)),
            None => self.delegate(name, args).await,
        }
    }
}
