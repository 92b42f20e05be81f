//! # Chat front-end
//!
//! Sits between a conversation and the orchestrator:
//!
//! ```text
//! messages ──► Question.Analyzer ──► answer expected? ──► Orchestrator ──► Answer.Analyzer ──► Answer
//!                                          └─ no ──► None
//! ```
//!
//! The question analyzer turns the last user message into a self-contained
//! request in English. The answer analyzer turns the orchestrator's outcome
//! back into a reply in the language of the conversation, or a follow-up
//! question for the user.

use crate::analyzer::Analyzer;
use crate::orchestrator::Orchestrator;
use crate::planner::PlanGenerator;
use chrono::{SecondsFormat, Utc};
use plancraft_error::{Error, Result};
use plancraft_vm::{ChatMessage, NoopTracer, Role, Span, SpanKind, Tracer};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

const LAST_USER_MESSAGE_SCHEMA: &str = r#"/*
Analysis of the last user message in a conversation between a user and an assistant.
Decide whether the last message needs an answer. If it does, write the program specs: a request in plain English for an agent that cannot see the conversation or the context, so every relevant value must be written inline.
- Do not assume which operations the program will run.
- Stay factual, based on what the conversation says.
- Avoid ambiguous instructions.
- Never assume the user confirmed an operation; the orchestrator must ask for confirmation instead.
*/
export interface LastUserMessage {
  // The last message from the user
  message: string;
  // Language detected in the last message from the user
  language: string;
  // Sentiment of the interaction
  sentiment: "negative" | "neutral" | "positive";
  // Whether the last message from the user needs an answer
  answerExpected: boolean;
  // Self-contained program specs for the agent, in English
  programSpecs?: string;
}"#;

const ANSWER_SCHEMA: &str = r#"/*
Reply to the user, given the conversation, the analysis of the last user message and an agent's answer in English.
Interpret the agent's answer in the context of the conversation and reply in the language of the interaction. When the agent's answer is a question because information is missing or ambiguous, ask that question in the same language.
*/
type AnswerType = "date" | "time" | "datetime" | "text" | "number" | "selection" | "multiselect";

// Details of the answer expected from the user
type AnswerConfig = {
  type: AnswerType;
  // a number for "number", a list for "selection" and "multiselect", a string otherwise
  defaultValue?: number | string | string[];
  // only for "selection" and "multiselect"
  options?: string[];
};

export type Answer = {
  // Whether the assistant asks the user a follow-up question
  isQuestion: boolean;
  // Language of the answer and all its elements; the language detected in the last user message
  language: string;
  // The answer shown to the user; empty when isQuestion is true
  text?: string;
  // Required when isQuestion is true
  expectedAnswerType?: AnswerType;
  expectedAnswerConfig?: AnswerConfig;
  // The question shown to the user; required when isQuestion is true
  question?: string;
};"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Negative,
    Neutral,
    Positive,
}

/// What the question analyzer extracts from the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastUserMessage {
    pub message: String,
    pub language: String,
    pub sentiment: Sentiment,
    pub answer_expected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_specs: Option<String>,
}

impl LastUserMessage {
    /// The request for the orchestrator, when the message needs an answer
    pub fn request(&self) -> Option<&str> {
        if !self.answer_expected {
            return None;
        }
        self.program_specs
            .as_deref()
            .map(str::trim)
            .filter(|specs| !specs.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerType {
    Date,
    Time,
    Datetime,
    Text,
    Number,
    Selection,
    Multiselect,
}

impl AnswerType {
    pub fn has_options(&self) -> bool {
        matches!(self, AnswerType::Selection | AnswerType::Multiselect)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerConfig {
    #[serde(rename = "type")]
    pub answer_type: AnswerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

/// Reply for the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub is_question: bool,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_answer_type: Option<AnswerType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_answer_config: Option<AnswerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
}

impl Answer {
    /// What to show the user: the follow-up question or the answer text
    pub fn display_text(&self) -> &str {
        let shown = if self.is_question { &self.question } else { &self.text };
        shown.as_deref().unwrap_or_default()
    }
}

fn is_blank(text: &Option<String>) -> bool {
    text.as_deref().map_or(true, |t| t.trim().is_empty())
}

fn check_question(question: &LastUserMessage) -> Result<()> {
    if question.answer_expected && is_blank(&question.program_specs) {
        return Err(Error::validation_failed(
            "\"programSpecs\" must be set when \"answerExpected\" is true.",
        )
        .with_operation("chat::check_question"));
    }
    Ok(())
}

fn check_answer(answer: &Answer) -> Result<()> {
    let mut errors = Vec::new();

    if answer.is_question {
        if is_blank(&answer.question) {
            errors.push("\"question\" must be set when \"isQuestion\" is true.");
        }
        if answer.expected_answer_type.is_none() {
            errors.push("\"expectedAnswerType\" must be set when \"isQuestion\" is true.");
        }
        if !is_blank(&answer.text) {
            errors.push("\"text\" must be empty when \"isQuestion\" is true.");
        }
    } else if is_blank(&answer.text) {
        errors.push("\"text\" must be set when \"isQuestion\" is false.");
    }

    if let Some(config) = &answer.expected_answer_config {
        if config.options.is_some() && !config.answer_type.has_options() {
            errors.push("\"options\" are only allowed for \"selection\" and \"multiselect\" answers.");
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::validation_failed(errors.join("\n")).with_operation("chat::check_answer"))
    }
}

fn question_prompt(messages: &[ChatMessage], context: &BTreeMap<String, Value>) -> String {
    format!(
        "Given the following contextual information about the conversation:\n{}\n\
         And given the following messages log:\n{}\n\
         Produce the \"LastUserMessage\" object",
        json!(context),
        json!(messages)
    )
}

fn answer_prompt(messages: &[ChatMessage], question: &LastUserMessage, answer: &str) -> String {
    format!(
        "Given the following messages log:\n{}\n\
         Given the following inferred question from the messages log:\n{}\n\
         And given the answer in English:\n{}\n\
         Produce the \"Answer\" object",
        json!(messages),
        json!(question),
        answer
    )
}

pub struct Chat {
    orchestrator: Arc<Orchestrator>,
    question: Analyzer<LastUserMessage>,
    answer: Analyzer<Answer>,
    context: BTreeMap<String, Value>,
    tracer: Arc<dyn Tracer>,
}

impl Chat {
    /// `planner` drives both analyzers; the orchestrator keeps its own
    pub fn new(orchestrator: Arc<Orchestrator>, planner: Arc<PlanGenerator>) -> Self {
        Self {
            orchestrator,
            question: Analyzer::new("Question.Analyzer", "LastUserMessage", LAST_USER_MESSAGE_SCHEMA, planner.clone())
                .with_check(check_question),
            answer: Analyzer::new("Answer.Analyzer", "Answer", ANSWER_SCHEMA, planner).with_check(check_answer),
            context: BTreeMap::new(),
            tracer: NoopTracer::shared(),
        }
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    /// Extra facts about the conversation shown to the question analyzer.
    /// `today` defaults to the current UTC time.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Reply to the last user message of `messages`. `None` when the message
    /// needs no answer, e.g. a thank-you.
    pub async fn analyze(&self, messages: &[ChatMessage]) -> Result<Option<Answer>> {
        let span = Span::root(
            Arc::clone(&self.tracer),
            "Chat",
            SpanKind::Tool,
            json!({ "messages": messages }),
        );

        match self.respond(messages, &span).await {
            Ok(answer) => {
                span.succeed(json!({ "answer": answer }));
                Ok(answer)
            }
            Err(err) => {
                span.fail(err.message().to_string(), json!({ "kind": err.kind().to_string() }));
                Err(err)
            }
        }
    }

    async fn respond(&self, messages: &[ChatMessage], span: &Span) -> Result<Option<Answer>> {
        if !matches!(messages.last(), Some(message) if message.role == Role::User) {
            return Err(Error::invalid_argument("the last message must come from the user")
                .with_operation("chat::analyze"));
        }

        let question = self
            .question
            .execute(&question_prompt(messages, &self.context()), span)
            .await?;
        let request = match question.request() {
            Some(request) => request,
            None => {
                info!(message = %question.message, "no answer expected");
                return Ok(None);
            }
        };

        info!(language = %question.language, "delegating question to the orchestrator");
        let outcome = self.orchestrator.execute_within(request, span).await;
        let answer = self
            .answer
            .execute(&answer_prompt(messages, &question, outcome.text()), span)
            .await?;
        Ok(Some(answer))
    }

    fn context(&self) -> BTreeMap<String, Value> {
        let mut context = self.context.clone();
        context
            .entry("today".to_string())
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)));
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(value: Value) -> Answer {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_last_user_message_request() {
        let question: LastUserMessage = serde_json::from_value(json!({
            "message": "¿Dónde está mi paquete 123456789?",
            "language": "Spanish",
            "sentiment": "neutral",
            "answerExpected": true,
            "programSpecs": "  Track DHL package 123456789  "
        }))
        .unwrap();
        assert_eq!(question.sentiment, Sentiment::Neutral);
        assert_eq!(question.request(), Some("Track DHL package 123456789"));

        let thanks = LastUserMessage {
            message: "thanks!".into(),
            language: "English".into(),
            sentiment: Sentiment::Positive,
            answer_expected: false,
            program_specs: None,
        };
        assert_eq!(thanks.request(), None);
        assert!(check_question(&thanks).is_ok());
        assert!(!serde_json::to_string(&thanks).unwrap().contains("programSpecs"));
    }

    #[test]
    fn test_check_question() {
        let question = LastUserMessage {
            message: "where is it?".into(),
            language: "English".into(),
            sentiment: Sentiment::Negative,
            answer_expected: true,
            program_specs: Some(" ".into()),
        };
        let err = check_question(&question).unwrap_err();
        assert!(err.message().contains("\"programSpecs\" must be set"));
    }

    #[test]
    fn test_check_answer() {
        let text = answer(json!({"isQuestion": false, "language": "English", "text": "It is pending."}));
        assert!(check_answer(&text).is_ok());
        assert_eq!(text.display_text(), "It is pending.");

        let question = answer(json!({
            "isQuestion": true,
            "language": "English",
            "question": "Which date works for you?",
            "expectedAnswerType": "selection",
            "expectedAnswerConfig": {"type": "selection", "options": ["2023-09-24", "2023-10-24"]}
        }));
        assert!(check_answer(&question).is_ok());
        assert_eq!(question.display_text(), "Which date works for you?");

        let err = check_answer(&answer(json!({"isQuestion": true, "language": "English", "text": "hm"}))).unwrap_err();
        let lines: Vec<_> = err.message().lines().collect();
        assert_eq!(lines.len(), 3);

        let err = check_answer(&answer(json!({
            "isQuestion": true,
            "language": "English",
            "question": "How many?",
            "expectedAnswerType": "number",
            "expectedAnswerConfig": {"type": "number", "options": ["1"]}
        })))
        .unwrap_err();
        assert!(err.message().contains("\"options\" are only allowed"));

        assert!(check_answer(&answer(json!({"isQuestion": false, "language": "English"}))).is_err());
    }

    #[test]
    fn test_prompts() {
        let messages = vec![
            ChatMessage::assistant("Hi! How can I help?"),
            ChatMessage::user("Where is 123456789?"),
        ];
        let mut context = BTreeMap::new();
        context.insert("today".to_string(), json!("2023-08-24T00:00:00.000Z"));

        let prompt = question_prompt(&messages, &context);
        assert!(prompt.contains(r#"{"today":"2023-08-24T00:00:00.000Z"}"#));
        assert!(prompt.contains(r#"{"role":"user","content":"Where is 123456789?"}"#));
        assert!(prompt.ends_with("Produce the \"LastUserMessage\" object"));

        let question = LastUserMessage {
            message: "Where is 123456789?".into(),
            language: "English".into(),
            sentiment: Sentiment::Neutral,
            answer_expected: true,
            program_specs: Some("Track DHL package 123456789".into()),
        };
        let prompt = answer_prompt(&messages, &question, "The package is Pending.");
        assert!(prompt.contains("\"programSpecs\":\"Track DHL package 123456789\""));
        assert!(prompt.contains("And given the answer in English:\nThe package is Pending."));
    }
}
