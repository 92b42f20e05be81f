//! # Skill Agents
//!
//! A delegate that answers by planning and running its own single-turn
//! program over a set of named skills. The program always ends with
//! `OutputMessage` (after at least one skill call) or is a lone
//! `ErrorMessage` step.
//!
//! A mocked agent asks the model for a dataset covering the skills its
//! program calls and answers every skill call from that dataset.

use crate::builtin::{format_output_message, value_text};
use crate::delegate::Delegate;
use crate::mock::{mock_prompt, mock_request, MockData};
use crate::planner::{PlanGenerator, Transcript};
use async_trait::async_trait;
use plancraft_error::{Error, Result};
use plancraft_vm::schema::{request_prompt, system_prompt};
use plancraft_vm::{ApiFunction, ApiParam, ApiSchema, Dispatch, Interpreter, Program, Span, SpanKind};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

const GET_PROPERTY: &str = "getProperty";
const OUTPUT_MESSAGE: &str = "OutputMessage";
const ERROR_MESSAGE: &str = "ErrorMessage";

const AGENT_GUIDE: &str = "\
Every program must call \"OutputMessage\" as its last step.
When the request is missing information a skill needs, return a program with a single \"ErrorMessage\" step that says exactly which information is missing.";

/// A single capability of a skill agent
#[async_trait]
pub trait Skill: Send + Sync {
    /// Signature and description shown to the model
    fn api(&self) -> ApiFunction;

    async fn call(&self, args: Vec<Value>) -> Result<Value>;
}

type SkillFn = dyn Fn(Vec<Value>) -> Result<Value> + Send + Sync;

/// A skill backed by a plain function
pub struct FnSkill {
    api: ApiFunction,
    handler: Box<SkillFn>,
}

impl FnSkill {
    pub fn new<F>(api: ApiFunction, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            api,
            handler: Box::new(handler),
        }
    }
}

#[async_trait]
impl Skill for FnSkill {
    fn api(&self) -> ApiFunction {
        self.api.clone()
    }

    async fn call(&self, args: Vec<Value>) -> Result<Value> {
        (self.handler)(args)
    }
}

/// A signature with no backend, answered only by mock data
struct DeclaredSkill(ApiFunction);

#[async_trait]
impl Skill for DeclaredSkill {
    fn api(&self) -> ApiFunction {
        self.0.clone()
    }

    async fn call(&self, _args: Vec<Value>) -> Result<Value> {
        Err(Error::delegate_failed(&self.0.name, format!("{} has no implementation", self.0.name))
            .with_operation("skill_agent::call"))
    }
}

pub struct SkillAgent {
    name: String,
    description: String,
    types: Vec<String>,
    skills: BTreeMap<String, Arc<dyn Skill>>,
    planner: Arc<PlanGenerator>,
    mocked: bool,
}

impl fmt::Debug for SkillAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkillAgent")
            .field("name", &self.name)
            .field("skills", &self.skills.keys().collect::<Vec<_>>())
            .field("mocked", &self.mocked)
            .finish()
    }
}

impl SkillAgent {
    pub fn new(name: impl Into<String>, description: impl Into<String>, planner: Arc<PlanGenerator>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            types: Vec::new(),
            skills: BTreeMap::new(),
            planner,
            mocked: false,
        }
    }

    /// Answer skill calls from model-generated mock data
    pub fn mocked(mut self) -> Self {
        self.mocked = true;
        self
    }

    pub fn is_mocked(&self) -> bool {
        self.mocked
    }

    /// A type declaration the skill signatures refer to
    pub fn with_type(mut self, declaration: impl Into<String>) -> Self {
        self.types.push(declaration.into());
        self
    }

    pub fn with_skill(mut self, skill: impl Skill + 'static) -> Result<Self> {
        let name = skill.api().name;
        if is_agent_builtin(&name) || self.skills.contains_key(&name) {
            return Err(Error::config_invalid(format!(
                "skill name '{}' is already taken in agent {}",
                name, self.name
            ))
            .with_operation("skill_agent::with_skill"));
        }
        self.skills.insert(name, Arc::new(skill));
        Ok(self)
    }

    /// A skill with a signature only. Calling it fails unless the agent is mocked.
    pub fn with_declared_skill(self, api: ApiFunction) -> Result<Self> {
        self.with_skill(DeclaredSkill(api))
    }

    pub fn skill_names(&self) -> impl Iterator<Item = &str> {
        self.skills.keys().map(String::as_str)
    }

    pub fn api_schema(&self) -> ApiSchema {
        let mut api = ApiSchema::new("API")
            .with_preamble(format!("{} agent: {}", self.name, self.description))
            .with_preamble(AGENT_GUIDE)
            .with_type("type PropertyKey = string | number;");
        for declaration in &self.types {
            api = api.with_type(declaration.clone());
        }

        api = api
            .with_function(
                ApiFunction::new(
                    GET_PROPERTY,
                    "Gets target[propertyKey]. Use it to pass part of an earlier output to another function.",
                )
                .param(ApiParam::new("target", "object").describe("always a reference to an earlier step"))
                .param(ApiParam::new("propertyKey", "PropertyKey"))
                .returns("any"),
            )
            .with_function(
                ApiFunction::new(
                    OUTPUT_MESSAGE,
                    "Outputs the result. Positional placeholders such as {{0}} in message are filled from a substitution list; an object is shown after the message.",
                )
                .param(ApiParam::new("message", "string"))
                .param(ApiParam::new("data", "any[] | object").optional())
                .returns("string"),
            )
            .with_function(
                ApiFunction::new(
                    ERROR_MESSAGE,
                    "Informs that the request cannot be handled. Name the missing information that would allow a program to be written.",
                )
                .param(ApiParam::new("reason", "string"))
                .returns("string"),
            );

        for skill in self.skills.values() {
            api = api.with_function(skill.api());
        }
        api
    }

    /// Structural checks for one agent program
    pub fn validate(&self, program: Program) -> Result<Program> {
        let mut errors = Vec::new();
        let mut skill_calls = 0;

        program.walk_calls(&mut |index, call| {
            let arity = match call.name.as_str() {
                GET_PROPERTY => Some((2, 2)),
                OUTPUT_MESSAGE => Some((1, 2)),
                ERROR_MESSAGE => Some((1, 1)),
                name if self.skills.contains_key(name) => {
                    skill_calls += 1;
                    None
                }
                name => {
                    errors.push(format!(
                        "Invalid program. @steps[{}] calls \"{}\", which is not a function of the API. Available skills: {}.",
                        index,
                        name,
                        self.skill_names().collect::<Vec<_>>().join(", ")
                    ));
                    None
                }
            };
            if let Some((min, max)) = arity {
                if call.args.len() < min || call.args.len() > max {
                    errors.push(format!(
                        "Invalid program. @steps[{}] calls \"{}\" with {} argument(s).",
                        index,
                        call.name,
                        call.args.len()
                    ));
                }
            }
        });

        for (index, step) in program.steps().iter().enumerate() {
            let last = index + 1 == program.len();
            if !last && matches!(step.name.as_str(), OUTPUT_MESSAGE | ERROR_MESSAGE) {
                errors.push(format!(
                    "Invalid program. @steps[{}] calls \"{}\", which must be the last step.",
                    index, step.name
                ));
            }
        }

        match program.last_step().map(|s| s.name.as_str()) {
            Some(OUTPUT_MESSAGE) if skill_calls == 0 => errors.push(format!(
                "Invalid program. Call at least one skill before \"{}\", or use a single \"{}\" step if no skill can help.",
                OUTPUT_MESSAGE, ERROR_MESSAGE
            )),
            Some(OUTPUT_MESSAGE) => {}
            Some(ERROR_MESSAGE) if program.len() > 1 => errors.push(format!(
                "Invalid program. An error program must have \"{}\" as its only step.",
                ERROR_MESSAGE
            )),
            Some(ERROR_MESSAGE) => {}
            _ => errors.push(format!(
                "Invalid program. The last step must call \"{}\" or \"{}\".",
                OUTPUT_MESSAGE, ERROR_MESSAGE
            )),
        }

        if errors.is_empty() {
            Ok(program)
        } else {
            Err(Error::validation_failed(errors.join("\n")).with_operation("skill_agent::validate"))
        }
    }

    async fn run(&self, prompt: &str, span: &Span) -> Result<String> {
        let mut transcript = Transcript::new(system_prompt(&self.api_schema()));
        transcript.push_user(request_prompt(prompt));

        let program = self
            .planner
            .plan(&mut transcript, &|program| self.validate(program), span)
            .await?;
        debug!(agent = %self.name, "running program\n{}", program);

        let mock = match self.mocked {
            true => Some(self.mock_data(&program, span).await?),
            false => None,
        };
        let dispatch = SkillDispatch {
            agent: self,
            span,
            mock: mock.as_ref(),
        };
        let results = Interpreter::new().evaluate(&program, &dispatch).await?;
        Ok(results.last().map(value_text).unwrap_or_default())
    }

    async fn mock_data(&self, program: &Program, span: &Span) -> Result<MockData> {
        let mock_span = span.child(
            format!("{}.mock", self.name),
            SpanKind::Chain,
            json!({ "program": program.to_value() }),
        );

        let mut transcript = Transcript::new(mock_prompt(&self.api_schema().to_prompt()));
        transcript.push_user(mock_request(program));

        let accept = |_: &MockData| -> Result<()> { Ok(()) };
        match self.planner.translate::<MockData>(&mut transcript, &accept, &mock_span).await {
            Ok(data) => {
                debug!(agent = %self.name, skills = ?data.skills().collect::<Vec<_>>(), "mock data generated");
                mock_span.succeed(json!({ "response": data }));
                Ok(data)
            }
            Err(err) => {
                mock_span.fail("Internal Error", json!({ "error": err.message() }));
                Err(err.with_context("mock", self.name.clone()))
            }
        }
    }
}

#[async_trait]
impl Delegate for SkillAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn invoke(&self, prompt: &str, span: &Span) -> Result<String> {
        let agent_span = span.child(format!("Agent.{}", self.name), SpanKind::Chain, json!({ "prompt": prompt }));
        match self.run(prompt, &agent_span).await {
            Ok(answer) => {
                info!(agent = %self.name, "request handled");
                agent_span.succeed(json!({ "response": answer }));
                Ok(answer)
            }
            Err(err) => {
                agent_span.fail(err.message().to_string(), json!({ "kind": err.kind().to_string() }));
                Err(err.with_context("agent", self.name.clone()))
            }
        }
    }
}

struct SkillDispatch<'a> {
    agent: &'a SkillAgent,
    span: &'a Span,
    mock: Option<&'a MockData>,
}

#[async_trait]
impl Dispatch for SkillDispatch<'_> {
    async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        match name {
            GET_PROPERTY => get_property(&args),
            OUTPUT_MESSAGE => output_message(&args).map(Value::String),
            ERROR_MESSAGE => {
                let reason = args.first().map(value_text).unwrap_or_default();
                Ok(Value::String(format!("Sorry, I cannot help you with that. {}", reason)))
            }
            _ => {
                let skill = self.agent.skills.get(name).ok_or_else(|| {
                    Error::unknown_capability(name)
                        .with_operation("skill_agent::dispatch")
                        .with_context("agent", self.agent.name.clone())
                })?;
                let skill_span = self
                    .span
                    .child(format!("Skill.{}", name), SpanKind::Tool, json!({ "args": args }));
                let result = match self.mock {
                    Some(data) => data.lookup(name, &args),
                    None => skill.call(args).await,
                };
                match result {
                    Ok(value) => {
                        skill_span.succeed(json!({ "response": value }));
                        Ok(value)
                    }
                    Err(err) => {
                        skill_span.fail(err.message().to_string(), Value::Null);
                        Err(err)
                    }
                }
            }
        }
    }
}

fn is_agent_builtin(name: &str) -> bool {
    matches!(name, GET_PROPERTY | OUTPUT_MESSAGE | ERROR_MESSAGE)
}

fn get_property(args: &[Value]) -> Result<Value> {
    let (target, key) = match args {
        [target, key] => (target, key),
        _ => {
            return Err(Error::invalid_argument("getProperty takes a target and a property key")
                .with_operation("skill_agent::get_property"))
        }
    };
    let value = match (target, key) {
        (Value::Object(map), Value::String(key)) => map.get(key),
        (Value::Array(items), Value::Number(index)) => {
            index.as_u64().and_then(|i| items.get(i as usize))
        }
        (Value::Array(items), Value::String(index)) => {
            index.parse::<usize>().ok().and_then(|i| items.get(i))
        }
        _ => None,
    };
    Ok(value.cloned().unwrap_or(Value::Null))
}

/// Fill `{{n}}` placeholders from a substitution list, or append an object
fn output_message(args: &[Value]) -> Result<String> {
    let message = args.first().map(value_text).unwrap_or_default();
    match args.get(1) {
        Some(Value::Array(substitutions)) => interpolate(&message, substitutions),
        data => Ok(format_output_message(&Value::String(message), data)),
    }
}

fn interpolate(message: &str, substitutions: &[Value]) -> Result<String> {
    let mut out = String::with_capacity(message.len());
    let mut rest = message;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let placeholder = after
            .find("}}")
            .and_then(|end| after[..end].parse::<usize>().ok().map(|index| (index, end)));
        match placeholder {
            Some((index, end)) => {
                let value = substitutions.get(index).ok_or_else(|| {
                    Error::invalid_argument(format!("missing substitution for {{{{{}}}}}", index))
                        .with_operation("skill_agent::output_message")
                })?;
                out.push_str(&value_text(value));
                rest = &after[end + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use plancraft_error::ErrorKind;
    use plancraft_vm::{MemoryTracer, ScriptedProvider, Tracer};

    fn track_skill() -> FnSkill {
        FnSkill::new(
            ApiFunction::new("TrackShipment", "Track a parcel")
                .param(ApiParam::new("trackingNumber", "string"))
                .returns("{ status: string }"),
            |args| match args.first().and_then(Value::as_str) {
                Some("123456789") => Ok(json!({"trackingNumber": "123456789", "status": "Pending"})),
                _ => Err(Error::delegate_failed("TrackShipment", "Unknown tracking number")),
            },
        )
    }

    fn agent(responses: Vec<&str>) -> (SkillAgent, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider::new(responses));
        let planner = Arc::new(PlanGenerator::new(provider.clone(), &AgentConfig::default()));
        let agent = SkillAgent::new("Shipment", "Tracks parcels", planner)
            .with_skill(track_skill())
            .unwrap();
        (agent, provider)
    }

    fn program(text: &str) -> Program {
        Program::parse(text).unwrap()
    }

    #[test]
    fn test_validate() {
        let (agent, _) = agent(vec![]);

        assert!(agent
            .validate(program(
                r#"{"@steps": [{"@func": "TrackShipment", "@args": ["1"]}, {"@func": "OutputMessage", "@args": ["ok"]}]}"#
            ))
            .is_ok());
        assert!(agent
            .validate(program(r#"{"@steps": [{"@func": "ErrorMessage", "@args": ["need a number"]}]}"#))
            .is_ok());

        let err = agent
            .validate(program(r#"{"@steps": [{"@func": "OutputMessage", "@args": ["hi"]}]}"#))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
        assert!(err.message().contains("at least one skill"));

        let err = agent
            .validate(program(r#"{"@steps": [{"@func": "Teleport"}, {"@func": "OutputMessage", "@args": ["x"]}]}"#))
            .unwrap_err();
        assert!(err.message().contains("\"Teleport\", which is not a function"));

        let err = agent
            .validate(program(
                r#"{"@steps": [{"@func": "TrackShipment", "@args": ["1"]}, {"@func": "ErrorMessage", "@args": ["x"]}]}"#
            ))
            .unwrap_err();
        assert!(err.message().contains("only step"));
    }

    #[test]
    fn test_interpolate() {
        assert_eq!(
            interpolate("Package {{0}} is {{1}}.", &[json!("123"), json!("Pending")]).unwrap(),
            "Package 123 is Pending."
        );
        assert_eq!(interpolate("no {{placeholders}}", &[]).unwrap(), "no {{placeholders}}");
        let err = interpolate("{{2}}", &[json!("a")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_get_property() {
        let target = json!({"status": "Pending"});
        assert_eq!(get_property(&[target, json!("status")]).unwrap(), json!("Pending"));
        assert_eq!(get_property(&[json!([1, 2]), json!(1)]).unwrap(), json!(2));
        assert_eq!(get_property(&[json!({}), json!("missing")]).unwrap(), Value::Null);
        assert!(get_property(&[json!({})]).is_err());
    }

    #[tokio::test]
    async fn test_invoke_runs_program() {
        let (agent, provider) = agent(vec![
            r#"{"@steps": [
                {"@func": "TrackShipment", "@args": ["123456789"]},
                {"@func": "getProperty", "@args": [{"@ref": 0}, "status"]},
                {"@func": "OutputMessage", "@args": ["The package is {{0}}.", [{"@ref": 1}]]}
            ]}"#,
        ]);
        let tracer = Arc::new(MemoryTracer::new());
        let span = Span::root(tracer.clone() as Arc<dyn Tracer>, "Orchestrator.Shipment", SpanKind::Chain, Value::Null);

        let answer = agent.invoke("Track package 123456789", &span).await.unwrap();
        span.succeed(Value::Null);

        assert_eq!(answer, "The package is Pending.");
        assert_eq!(provider.calls(), 1);
        assert_eq!(tracer.find("Agent.Shipment").len(), 1);
        assert_eq!(tracer.find("Skill.TrackShipment").len(), 1);
        assert!(tracer.all_closed());
    }

    #[tokio::test]
    async fn test_invoke_error_message() {
        let (agent, _) = agent(vec![
            r#"{"@steps": [{"@func": "ErrorMessage", "@args": ["A tracking number is required."]}]}"#,
        ]);
        let span = Span::root(plancraft_vm::NoopTracer::shared(), "test", SpanKind::Chain, Value::Null);
        let answer = agent.invoke("Where is my package?", &span).await.unwrap();
        assert_eq!(answer, "Sorry, I cannot help you with that. A tracking number is required.");
    }

    #[tokio::test]
    async fn test_invoke_skill_failure() {
        let (agent, _) = agent(vec![
            r#"{"@steps": [{"@func": "TrackShipment", "@args": ["000"]}, {"@func": "OutputMessage", "@args": ["{{0}}", [{"@ref": 0}]]}]}"#,
        ]);
        let tracer = Arc::new(MemoryTracer::new());
        let span = Span::root(tracer.clone() as Arc<dyn Tracer>, "test", SpanKind::Chain, Value::Null);

        let err = agent.invoke("Track package 000", &span).await.unwrap_err();
        drop(span);

        assert_eq!(err.message(), "Unknown tracking number");
        assert_eq!(err.context_value("agent"), Some("Shipment"));
        assert!(tracer.all_closed());
    }

    fn mocked_agent(responses: Vec<&str>) -> (SkillAgent, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider::new(responses));
        let planner = Arc::new(PlanGenerator::new(provider.clone(), &AgentConfig::default()));
        let agent = SkillAgent::new("Shipment", "Tracks parcels", planner)
            .with_declared_skill(
                ApiFunction::new("TrackShipment", "Track a parcel")
                    .param(ApiParam::new("trackingNumber", "string"))
                    .returns("{ status: string }"),
            )
            .unwrap()
            .mocked();
        (agent, provider)
    }

    #[tokio::test]
    async fn test_mocked_agent_answers_from_generated_data() {
        let (agent, provider) = mocked_agent(vec![
            r#"{"@steps": [
                {"@func": "TrackShipment", "@args": ["123456789"]},
                {"@func": "getProperty", "@args": [{"@ref": 0}, "status"]},
                {"@func": "OutputMessage", "@args": ["The package is {{0}}.", [{"@ref": 1}]]}
            ]}"#,
            r#"{"TrackShipment": {"[\"123456789\"]": {"status": "In transit"}}}"#,
        ]);
        let tracer = Arc::new(MemoryTracer::new());
        let span = Span::root(tracer.clone() as Arc<dyn Tracer>, "test", SpanKind::Chain, Value::Null);

        let answer = agent.invoke("Track package 123456789", &span).await.unwrap();
        span.succeed(Value::Null);

        assert_eq!(answer, "The package is In transit.");
        assert_eq!(provider.calls(), 2);

        let mock_request = &provider.requests()[1];
        assert!(mock_request.messages[0].content.contains("mock data"));
        assert!(mock_request.messages[0].content.contains("TrackShipment"));
        assert!(mock_request.messages[1].content.contains("\"@func\": \"TrackShipment\""));

        assert_eq!(tracer.find("Shipment.mock").len(), 1);
        assert_eq!(tracer.find("Skill.TrackShipment").len(), 1);
        assert!(tracer.all_closed());
    }

    #[tokio::test]
    async fn test_mock_failure_closes_span() {
        let (agent, provider) = mocked_agent(vec![
            r#"{"@steps": [{"@func": "TrackShipment", "@args": ["1"]}, {"@func": "OutputMessage", "@args": ["{{0}}", [{"@ref": 0}]]}]}"#,
            "no data",
            "[]",
            "still nothing",
        ]);
        let tracer = Arc::new(MemoryTracer::new());
        let span = Span::root(tracer.clone() as Arc<dyn Tracer>, "test", SpanKind::Chain, Value::Null);

        let err = agent.invoke("Track package 1", &span).await.unwrap_err();
        drop(span);

        assert_eq!(err.kind(), ErrorKind::RepairExhausted);
        assert_eq!(err.context_value("mock"), Some("Shipment"));
        assert_eq!(provider.calls(), 4);
        let mock = &tracer.find("Shipment.mock")[0];
        assert!(!mock.outcome.as_ref().unwrap().is_success());
        assert!(tracer.find("Skill.TrackShipment").is_empty());
        assert!(tracer.all_closed());
    }

    #[tokio::test]
    async fn test_declared_skill_needs_mock() {
        let (agent, _) = mocked_agent(vec![]);
        assert!(agent.is_mocked());
        let err = agent.skills["TrackShipment"].call(vec![json!("1")]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DelegateFailed);
        assert!(err.message().contains("has no implementation"));
    }
}
