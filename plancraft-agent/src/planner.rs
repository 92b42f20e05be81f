//! # Plan Generator
//!
//! Owns the conversation with the completion service. One [`PlanGenerator::plan`]
//! call turns the transcript into a validated value:
//!
//! 1. send the transcript, receive raw text
//! 2. extract the first balanced `{...}` region
//! 3. parse it as a [`Program`] and hand it to the caller's validator
//! 4. on failure, resend with the failed output and a repair prompt, up to
//!    `max_repair_attempts` times
//! 5. if the primary model is exhausted, run the whole sequence once more on
//!    the fallback model
//!
//! [`PlanGenerator::translate`] runs the same loop for plain typed JSON
//! objects, such as the chat analyzers and mock data.
//!
//! Failed exchanges live on a branch that is replaced after every attempt.
//! Only the accepted assistant output is merged back into the transcript.

use crate::config::AgentConfig;
use plancraft_error::{Error, ErrorKind, Result};
use plancraft_vm::schema::{object_repair_prompt, repair_prompt};
use plancraft_vm::{ChatMessage, CompletionRequest, LlmProvider, Program, Span, SpanKind, UsageTracker};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

const LOG_PREVIEW_CHARS: usize = 240;

/// Append-only message history of one planning conversation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(system)],
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::assistant(content));
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The transcript followed by an uncommitted branch
    fn with_branch(&self, branch: &[ChatMessage]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.messages.len() + branch.len());
        messages.extend_from_slice(&self.messages);
        messages.extend_from_slice(branch);
        messages
    }
}

/// Accepted output of one planning call
struct Accepted<T> {
    raw: String,
    value: T,
}

/// Turns the extracted JSON text into a value plus what the parser span records
type Acceptor<'a, T> = dyn Fn(&str) -> Result<(T, Value)> + Send + Sync + 'a;

/// How one kind of output is checked and repaired
struct Translation<'a, T> {
    accept: &'a Acceptor<'a, T>,
    repair: fn(&str) -> String,
}

pub struct PlanGenerator {
    provider: Arc<dyn LlmProvider>,
    model: String,
    fallback_model: Option<String>,
    max_repair_attempts: usize,
    temperature: f32,
    usage: Mutex<UsageTracker>,
}

impl PlanGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, config: &AgentConfig) -> Self {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| provider.default_model().to_string());
        Self {
            provider,
            model,
            fallback_model: config.fallback_model.clone(),
            max_repair_attempts: config.max_repair_attempts,
            temperature: config.temperature,
            usage: Mutex::new(UsageTracker::new()),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn fallback_model(&self) -> Option<&str> {
        self.fallback_model.as_deref()
    }

    /// Token usage across every completion this generator made
    pub fn usage(&self) -> UsageTracker {
        self.usage.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Produce a program accepted by `validate` from the transcript.
    ///
    /// The transcript must already end with the request message. On success
    /// the accepted model output is appended to it; on failure it is left as
    /// it was.
    pub async fn plan<T: Send>(
        &self,
        transcript: &mut Transcript,
        validate: &(dyn Fn(Program) -> Result<T> + Send + Sync),
        span: &Span,
    ) -> Result<T> {
        let accept = |json: &str| -> Result<(T, Value)> {
            let program = Program::parse(json)?;
            let rendered = program.to_value();
            validate(program).map(|value| (value, json!({ "program": rendered })))
        };
        let translation = Translation {
            accept: &accept,
            repair: repair_prompt,
        };
        self.generate(transcript, &translation, span).await
    }

    /// Produce a JSON object of type `T` that also passes `check`.
    ///
    /// Same repair and fallback rules as [`PlanGenerator::plan`]; a payload
    /// that does not deserialize into `T` counts as a parse failure.
    pub async fn translate<T>(
        &self,
        transcript: &mut Transcript,
        check: &(dyn Fn(&T) -> Result<()> + Send + Sync),
        span: &Span,
    ) -> Result<T>
    where
        T: DeserializeOwned + Send,
    {
        let accept = |json: &str| -> Result<(T, Value)> {
            let value: Value = serde_json::from_str(json).map_err(|err| {
                Error::parse_failed(format!("invalid JSON: {}", err))
                    .with_operation("planner::translate")
                    .set_source(err)
            })?;
            let typed = T::deserialize(&value).map_err(|err| {
                Error::parse_failed(err.to_string())
                    .with_operation("planner::translate")
                    .set_source(err)
            })?;
            check(&typed)?;
            Ok((typed, json!({ "value": value })))
        };
        let translation = Translation {
            accept: &accept,
            repair: object_repair_prompt,
        };
        self.generate(transcript, &translation, span).await
    }

    async fn generate<T: Send>(
        &self,
        transcript: &mut Transcript,
        translation: &Translation<'_, T>,
        span: &Span,
    ) -> Result<T> {
        let primary = self.round(&self.model, transcript, translation, span).await;
        let failure = match primary {
            Ok(accepted) => return Ok(self.commit(transcript, accepted)),
            Err(err) => err,
        };

        let fallback = match self.fallback_model.as_deref() {
            Some(fallback) if fallback != self.model => fallback,
            _ => return Err(failure.persist()),
        };

        warn!(
            model = %self.model,
            fallback = %fallback,
            error = %failure,
            "primary model failed, retrying with fallback model"
        );
        match self.round(fallback, transcript, translation, span).await {
            Ok(accepted) => Ok(self.commit(transcript, accepted)),
            Err(err) => Err(err.with_context("fallback_model", fallback).persist()),
        }
    }

    fn commit<T>(&self, transcript: &mut Transcript, accepted: Accepted<T>) -> T {
        transcript.push_assistant(accepted.raw);
        accepted.value
    }

    /// One initial attempt plus the repair attempts, all on `model`
    async fn round<T: Send>(
        &self,
        model: &str,
        transcript: &Transcript,
        translation: &Translation<'_, T>,
        span: &Span,
    ) -> Result<Accepted<T>> {
        let attempts = self.max_repair_attempts + 1;
        let mut branch: Vec<ChatMessage> = Vec::new();
        let mut last_reason = String::new();

        for attempt in 1..=attempts {
            let raw = self
                .complete(model, transcript.with_branch(&branch), attempt, span)
                .await?;

            match self.accept(&raw, translation.accept, span) {
                Ok(value) => {
                    info!(model, attempt, "output accepted");
                    return Ok(Accepted { raw, value });
                }
                Err(err) if is_repairable(&err) => {
                    debug!(model, attempt, reason = %err.message(), "output rejected");
                    last_reason = err.message().to_string();
                    branch = vec![
                        ChatMessage::assistant(raw),
                        ChatMessage::user((translation.repair)(&last_reason)),
                    ];
                }
                Err(err) => return Err(err),
            }
        }

        warn!(model, attempts, "repair attempts exhausted");
        Err(Error::repair_exhausted(attempts, last_reason)
            .with_operation("planner::plan")
            .with_context("model", model))
    }

    async fn complete(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        attempt: usize,
        span: &Span,
    ) -> Result<String> {
        let prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        let llm_span = span.child(
            "Planner.Complete",
            SpanKind::Llm,
            json!({ "model": model, "attempt": attempt, "prompt": prompt }),
        );
        debug!(
            model,
            attempt,
            messages = messages.len(),
            prompt = %truncate_for_log(&prompt, LOG_PREVIEW_CHARS),
            "requesting completion"
        );

        let request = CompletionRequest::new(messages)
            .with_model(model)
            .with_temperature(self.temperature);

        let response = match self.provider.complete(request).await {
            Ok(response) => response,
            Err(err) => {
                let err = err
                    .into_error("planner::complete")
                    .with_context("model", model);
                llm_span.fail(err.message().to_string(), json!(null));
                return Err(err);
            }
        };

        self.usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .track(&response.model, &response.usage);

        match response.content {
            Some(content) => {
                debug!(
                    model,
                    attempt,
                    response = %truncate_for_log(&content, LOG_PREVIEW_CHARS),
                    "completion received"
                );
                llm_span.succeed(json!({ "response": content }));
                Ok(content)
            }
            None => {
                let err = Error::inference_failed("No content in response")
                    .with_operation("planner::complete")
                    .with_context("model", model);
                llm_span.fail(err.message().to_string(), json!(null));
                Err(err)
            }
        }
    }

    /// Extract and check one model output
    fn accept<T>(&self, raw: &str, accept: &Acceptor<'_, T>, span: &Span) -> Result<T> {
        let parser_span = span.child("Planner.Validation", SpanKind::Parser, json!({ "response": raw }));
        match extract_json(raw).and_then(accept) {
            Ok((value, recorded)) => {
                parser_span.succeed(recorded);
                Ok(value)
            }
            Err(err) => {
                parser_span.fail(err.message().to_string(), json!({ "kind": err.kind().to_string() }));
                Err(err)
            }
        }
    }
}

/// Errors fed back to the model instead of ending the round
fn is_repairable(err: &Error) -> bool {
    matches!(err.kind(), ErrorKind::ParseFailed | ErrorKind::ValidationFailed)
}

/// The first balanced `{...}` region of `text`, ignoring braces inside strings
pub fn extract_json(text: &str) -> Result<&str> {
    let not_found = || {
        Error::parse_failed("Response does not contain a JSON object")
            .with_operation("planner::extract_json")
    };

    let start = text.find('{').ok_or_else(not_found)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }

    Err(not_found())
}

fn truncate_for_log(input: &str, max_chars: usize) -> String {
    let char_count = input.chars().count();
    if char_count <= max_chars {
        return input.to_string();
    }
    let mut preview: String = input.chars().take(max_chars).collect();
    preview.push_str(&format!("... [truncated, total_chars={}]", char_count));
    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use plancraft_vm::{MemoryTracer, ProviderError, Role, ScriptedProvider, Tracer};

    const GOOD: &str = r#"{"@steps": [{"@func": "Answer", "@args": ["42"]}]}"#;
    const WRONG: &str = r#"{"@steps": [{"@func": "Other"}]}"#;

    fn only_answer(program: Program) -> Result<String> {
        match program.last_step() {
            Some(step) if step.name == "Answer" => Ok(step.first_str_arg().unwrap_or_default().to_string()),
            Some(step) => Err(Error::validation_failed(format!("unexpected call {}", step.name))),
            None => Err(Error::validation_failed("empty")),
        }
    }

    fn setup(
        responses: Vec<&str>,
        config: AgentConfig,
    ) -> (Arc<ScriptedProvider>, PlanGenerator, Arc<MemoryTracer>, Span) {
        let provider = Arc::new(ScriptedProvider::new(responses));
        let planner = PlanGenerator::new(provider.clone(), &config);
        let tracer = Arc::new(MemoryTracer::new());
        let span = Span::root(tracer.clone() as Arc<dyn Tracer>, "test", SpanKind::Chain, json!(null));
        (provider, planner, tracer, span)
    }

    fn transcript() -> Transcript {
        let mut transcript = Transcript::new("system");
        transcript.push_user("request");
        transcript
    }

    #[test]
    fn test_extract_json() {
        assert_eq!(extract_json(r#"Sure! {"a": 1} done"#).unwrap(), r#"{"a": 1}"#);
        assert_eq!(
            extract_json(r#"```json
{"a": {"b": "}"}} trailing {"c": 2}"#)
            .unwrap(),
            r#"{"a": {"b": "}"}}"#
        );
        assert_eq!(extract_json(r#"{"q": "say \"{\""}"#).unwrap(), r#"{"q": "say \"{\""}"#);

        let err = extract_json("no json here").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseFailed);
        assert_eq!(err.message(), "Response does not contain a JSON object");
        assert!(extract_json(r#"{"unterminated": 1"#).is_err());
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("short", 10), "short");
        assert_eq!(truncate_for_log("abcdef", 3), "abc... [truncated, total_chars=6]");
    }

    #[tokio::test]
    async fn test_first_attempt_accepted() {
        let (provider, planner, tracer, span) = setup(vec![GOOD], AgentConfig::default());
        let mut transcript = transcript();

        let answer = planner.plan(&mut transcript, &only_answer, &span).await.unwrap();
        span.succeed(json!(null));

        assert_eq!(answer, "42");
        assert_eq!(provider.calls(), 1);
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript.messages()[2].role, Role::Assistant);
        assert_eq!(tracer.find("Planner.Complete").len(), 1);
        assert!(tracer.all_closed());
    }

    #[tokio::test]
    async fn test_repair_branch_is_discarded() {
        let (provider, planner, _tracer, span) =
            setup(vec!["not json", WRONG, GOOD], AgentConfig::default());
        let mut transcript = transcript();

        let answer = planner.plan(&mut transcript, &only_answer, &span).await.unwrap();
        assert_eq!(answer, "42");
        assert_eq!(provider.calls(), 3);

        let requests = provider.requests();
        assert_eq!(requests[0].messages.len(), 2);
        // only the latest failed exchange is resent
        assert_eq!(requests[1].messages.len(), 4);
        assert_eq!(requests[1].messages[2].content, "not json");
        assert!(requests[1].messages[3].content.contains("does not contain a JSON object"));
        assert_eq!(requests[2].messages.len(), 4);
        assert_eq!(requests[2].messages[2].content, WRONG);
        assert!(requests[2].messages[3].content.contains("unexpected call Other"));

        // only the accepted output is merged back
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript.messages()[2].content, GOOD);
    }

    #[tokio::test]
    async fn test_repair_exhausted_after_bound() {
        let (provider, planner, _tracer, span) =
            setup(vec![WRONG, WRONG, WRONG, GOOD], AgentConfig::default());
        let mut transcript = transcript();

        let err = planner.plan(&mut transcript, &only_answer, &span).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RepairExhausted);
        assert_eq!(provider.calls(), 3);
        assert_eq!(transcript.len(), 2);
    }

    #[tokio::test]
    async fn test_fallback_model_round() {
        let config = AgentConfig::default()
            .with_model("primary")
            .with_max_repair_attempts(1)
            .with_fallback_model("backup");
        let (provider, planner, _tracer, span) = setup(vec![WRONG, WRONG, GOOD], config);
        let mut transcript = transcript();

        let answer = planner.plan(&mut transcript, &only_answer, &span).await.unwrap();
        assert_eq!(answer, "42");

        let models: Vec<_> = provider
            .requests()
            .into_iter()
            .map(|r| r.model.unwrap_or_default())
            .collect();
        assert_eq!(models, vec!["primary", "primary", "backup"]);
        // the fallback round starts from the clean transcript
        assert_eq!(provider.requests()[2].messages.len(), 2);
        assert_eq!(planner.usage().total_calls, 3);
    }

    #[tokio::test]
    async fn test_service_error_ends_round() {
        let (provider, planner, tracer, span) = setup(vec![], AgentConfig::default());
        provider.push_error(ProviderError::RateLimited { retry_after: None });
        provider.push_response(GOOD);
        let mut transcript = transcript();

        let err = planner.plan(&mut transcript, &only_answer, &span).await.unwrap_err();
        span.succeed(json!(null));

        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert_eq!(provider.calls(), 1);
        assert!(tracer.all_closed());
        assert!(!tracer.find("Planner.Complete")[0].outcome.as_ref().unwrap().is_success());
    }

    #[derive(Debug, PartialEq, serde::Deserialize)]
    struct Sentiment {
        label: String,
        score: f64,
    }

    fn scored(sentiment: &Sentiment) -> Result<()> {
        if (0.0..=1.0).contains(&sentiment.score) {
            Ok(())
        } else {
            Err(Error::validation_failed("score must be within 0..=1"))
        }
    }

    #[tokio::test]
    async fn test_translate_typed_object() {
        let (provider, planner, tracer, span) = setup(
            vec![
                r#"Here you go: {"label": "positive"}"#,
                r#"{"label": "positive", "score": 7}"#,
                r#"{"label": "positive", "score": 0.9}"#,
            ],
            AgentConfig::default(),
        );
        let mut transcript = transcript();

        let sentiment: Sentiment = planner.translate::<Sentiment>(&mut transcript, &scored, &span).await.unwrap();
        span.succeed(json!(null));

        assert_eq!(sentiment, Sentiment { label: "positive".into(), score: 0.9 });
        assert_eq!(provider.calls(), 3);

        let requests = provider.requests();
        let missing = &requests[1].messages[3].content;
        assert!(missing.contains("missing field `score`"));
        assert!(missing.contains("The JSON object is invalid"));
        assert!(requests[2].messages[3].content.contains("score must be within"));

        assert_eq!(transcript.len(), 3);
        let validations = tracer.find("Planner.Validation");
        assert_eq!(validations.len(), 3);
        assert!(tracer.all_closed());
    }

    #[tokio::test]
    async fn test_translate_exhausted() {
        let (provider, planner, _tracer, span) =
            setup(vec!["[]", "[]", "[]"], AgentConfig::default());
        let mut transcript = transcript();

        let err = planner
            .translate::<Sentiment>(&mut transcript, &scored, &span)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RepairExhausted);
        assert_eq!(provider.calls(), 3);
    }
}
