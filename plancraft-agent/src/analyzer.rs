//! Typed JSON analyzers: a prompt in, a checked `T` out

use crate::planner::{PlanGenerator, Transcript};
use plancraft_error::Result;
use plancraft_vm::schema::{object_request_prompt, object_system_prompt};
use plancraft_vm::{Span, SpanKind};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

type Check<T> = dyn Fn(&T) -> Result<()> + Send + Sync;

/// Asks the model for one JSON object of a declared TypeScript type and
/// deserializes it into `T`
pub struct Analyzer<T> {
    name: String,
    type_name: String,
    schema: String,
    planner: Arc<PlanGenerator>,
    check: Box<Check<T>>,
    _output: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for Analyzer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analyzer")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .finish()
    }
}

impl<T> Analyzer<T>
where
    T: DeserializeOwned + Serialize + Send + 'static,
{
    /// `name` labels the span, `schema` declares `type_name` in TypeScript
    pub fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
        schema: impl Into<String>,
        planner: Arc<PlanGenerator>,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            schema: schema.into(),
            planner,
            check: Box::new(accept_any::<T>),
            _output: PhantomData,
        }
    }

    /// Rules the type declaration cannot express. A failed check is sent
    /// back to the model as a repair reason.
    pub fn with_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        self.check = Box::new(check);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn system_prompt(&self) -> String {
        object_system_prompt(&self.type_name, &self.schema)
    }

    pub async fn execute(&self, prompt: &str, span: &Span) -> Result<T> {
        let span = span.child(self.name.clone(), SpanKind::Tool, json!({ "prompt": prompt }));

        let mut transcript = Transcript::new(self.system_prompt());
        transcript.push_user(object_request_prompt(&self.type_name, prompt));

        match self.planner.translate(&mut transcript, self.check.as_ref(), &span).await {
            Ok(value) => {
                let response = serde_json::to_value(&value).unwrap_or(Value::Null);
                debug!(analyzer = %self.name, %response, "analysis done");
                span.succeed(json!({ "response": response }));
                Ok(value)
            }
            Err(err) => {
                span.fail(err.message().to_string(), json!({ "kind": err.kind().to_string() }));
                Err(err.with_context("analyzer", self.name.clone()))
            }
        }
    }
}

fn accept_any<T>(_: &T) -> Result<()> {
    Ok(())
}
