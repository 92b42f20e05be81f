//! # Program Interpreter
//!
//! Evaluates a [`Program`] against a [`Dispatch`] target, producing one
//! result per step.
//!
//! ## Evaluation rules
//! - Steps run in order; step `i` only sees results `0..i`.
//! - Sibling expressions (a call's arguments, array elements, object values)
//!   are evaluated concurrently and their results keep source order.
//! - Any failure aborts the evaluation; partial results are discarded.
//!
//! With [`StepScheduling::Independent`], consecutive steps that do not
//! reference each other are grouped into waves and run concurrently. Result
//! order is still step order.

use crate::error::{self, Result};
use crate::program::{Expression, FunctionCall, Program};
use async_trait::async_trait;
use futures_util::future::{try_join_all, BoxFuture, FutureExt};
use serde_json::Value;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, trace};

/// Resolves a function name with evaluated arguments to a value
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value>;
}

#[async_trait]
impl<T: Dispatch + ?Sized> Dispatch for Arc<T> {
    async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        (**self).call(name, args).await
    }
}

/// How top-level steps are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepScheduling {
    /// One step at a time
    #[default]
    Sequential,
    /// Consecutive steps without mutual references run together
    Independent,
}

#[derive(Debug, Clone, Default)]
pub struct Interpreter {
    scheduling: StepScheduling,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scheduling(mut self, scheduling: StepScheduling) -> Self {
        self.scheduling = scheduling;
        self
    }

    pub fn scheduling(&self) -> StepScheduling {
        self.scheduling
    }

    /// Evaluate every step, returning the results in step order
    pub async fn evaluate(&self, program: &Program, dispatch: &dyn Dispatch) -> Result<Vec<Value>> {
        let steps = program.steps();
        let mut results: Vec<Value> = Vec::with_capacity(steps.len());

        for wave in self.waves(program) {
            debug!(start = wave.start, end = wave.end, "evaluating steps");
            let values = {
                let available = &results;
                try_join_all(
                    steps[wave]
                        .iter()
                        .map(|step| eval_call(step, available, dispatch)),
                )
                .await?
            };
            results.extend(values);
        }

        Ok(results)
    }

    fn waves(&self, program: &Program) -> Vec<Range<usize>> {
        match self.scheduling {
            StepScheduling::Sequential => (0..program.len()).map(|i| i..i + 1).collect(),
            StepScheduling::Independent => independent_waves(program),
        }
    }
}

/// Split steps into maximal runs where no step references another in the run
fn independent_waves(program: &Program) -> Vec<Range<usize>> {
    let mut waves = Vec::new();
    let mut start = 0;
    for (index, step) in program.steps().iter().enumerate() {
        if index > start && step.references().iter().any(|r| *r >= start) {
            waves.push(start..index);
            start = index;
        }
    }
    if start < program.len() {
        waves.push(start..program.len());
    }
    waves
}

fn eval_call<'a>(
    call: &'a FunctionCall,
    results: &'a [Value],
    dispatch: &'a dyn Dispatch,
) -> BoxFuture<'a, Result<Value>> {
    async move {
        let args = eval_all(&call.args, results, dispatch).await?;
        trace!(func = %call.name, args = args.len(), "dispatching call");
        dispatch.call(&call.name, args).await
    }
    .boxed()
}

async fn eval_all(
    exprs: &[Expression],
    results: &[Value],
    dispatch: &dyn Dispatch,
) -> Result<Vec<Value>> {
    try_join_all(exprs.iter().map(|e| eval_expr(e, results, dispatch))).await
}

fn eval_expr<'a>(
    expr: &'a Expression,
    results: &'a [Value],
    dispatch: &'a dyn Dispatch,
) -> BoxFuture<'a, Result<Value>> {
    async move {
        match expr {
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Ref(index) => results
                .get(*index)
                .cloned()
                .ok_or_else(|| error::invalid_reference(*index, results.len())),
            Expression::Array(items) => Ok(Value::Array(eval_all(items, results, dispatch).await?)),
            Expression::Object(fields) => {
                let values =
                    try_join_all(fields.values().map(|e| eval_expr(e, results, dispatch))).await?;
                Ok(Value::Object(fields.keys().cloned().zip(values).collect()))
            }
            Expression::Call(call) => eval_call(call, results, dispatch).await,
        }
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use plancraft_error::{Error, ErrorKind};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Echoes `name(args)` and records the order in which calls finished
    #[derive(Default)]
    struct Recorder {
        finished: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Dispatch for Recorder {
        async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            if name == "slow" {
                tokio::time::sleep(Duration::from_millis(30)).await;
            } else {
                tokio::task::yield_now().await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if name == "fail" {
                return Err(Error::new(ErrorKind::DelegateFailed, "boom"));
            }
            self.finished.lock().unwrap().push(name.to_string());
            Ok(json!({ "func": name, "args": args }))
        }
    }

    fn parse(text: &str) -> Program {
        Program::parse(text).unwrap()
    }

    #[tokio::test]
    async fn test_results_in_step_order() {
        let program = parse(
            r#"{"@steps": [
                {"@func": "a", "@args": ["x"]},
                {"@func": "b", "@args": [{"@ref": 0}]}
            ]}"#,
        );
        let dispatch = Recorder::default();
        let results = Interpreter::new().evaluate(&program, &dispatch).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0], json!({"func": "a", "args": ["x"]}));
        assert_eq!(results[1]["args"][0], results[0]);
    }

    #[tokio::test]
    async fn test_siblings_run_concurrently_and_keep_order() {
        let program = parse(
            r#"{"@steps": [
                {"@func": "combine", "@args": [{"@func": "slow"}, {"@func": "fast"}, {"k": {"@func": "fast"}}]}
            ]}"#,
        );
        let dispatch = Recorder::default();
        let results = Interpreter::new().evaluate(&program, &dispatch).await.unwrap();

        let args = &results[0]["args"];
        assert_eq!(args[0]["func"], "slow");
        assert_eq!(args[1]["func"], "fast");
        assert_eq!(args[2]["k"]["func"], "fast");

        let finished = dispatch.finished.lock().unwrap().clone();
        assert_eq!(finished.last().map(String::as_str), Some("combine"));
        assert_ne!(finished.first().map(String::as_str), Some("slow"));
        assert!(dispatch.peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_sequential_steps_do_not_overlap() {
        let program = parse(r#"{"@steps": [{"@func": "slow"}, {"@func": "fast"}]}"#);
        let dispatch = Recorder::default();
        Interpreter::new().evaluate(&program, &dispatch).await.unwrap();

        assert_eq!(dispatch.peak.load(Ordering::SeqCst), 1);
        assert_eq!(*dispatch.finished.lock().unwrap(), vec!["slow", "fast"]);
    }

    #[tokio::test]
    async fn test_independent_steps_overlap() {
        let program = parse(
            r#"{"@steps": [
                {"@func": "slow"},
                {"@func": "fast"},
                {"@func": "after", "@args": [{"@ref": 1}]}
            ]}"#,
        );
        let dispatch = Recorder::default();
        let results = Interpreter::new()
            .with_scheduling(StepScheduling::Independent)
            .evaluate(&program, &dispatch)
            .await
            .unwrap();

        assert_eq!(results[0]["func"], "slow");
        assert_eq!(results[1]["func"], "fast");
        assert_eq!(results[2]["args"][0]["func"], "fast");
        assert_eq!(dispatch.peak.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_independent_waves() {
        let program = parse(
            r#"{"@steps": [
                {"@func": "a"},
                {"@func": "b"},
                {"@func": "c", "@args": [{"@ref": 0}]},
                {"@func": "d", "@args": [{"@ref": 2}]},
                {"@func": "e"}
            ]}"#,
        );
        assert_eq!(independent_waves(&program), vec![0..2, 2..3, 3..5]);
    }

    #[tokio::test]
    async fn test_failure_aborts_evaluation() {
        let program = parse(
            r#"{"@steps": [{"@func": "a"}, {"@func": "fail"}, {"@func": "never"}]}"#,
        );
        let dispatch = Recorder::default();

        let err = Interpreter::new().evaluate(&program, &dispatch).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DelegateFailed);
        assert!(!dispatch.finished.lock().unwrap().contains(&"never".to_string()));
    }

    #[test]
    fn test_unresolvable_reference() {
        // Hand-built expression that bypasses parse-time checks
        let call = FunctionCall::new("x", vec![Expression::Ref(3)]);
        let dispatch = Recorder::default();

        let err = tokio_test::block_on(eval_call(&call, &[json!(1)], &dispatch)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidReference);
        assert_eq!(err.context_value("available"), Some("1"));
    }
}
