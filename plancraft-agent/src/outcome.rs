//! Terminal, caller-visible results of a request

use plancraft_error::{Error, ErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscalationKind {
    /// The model decided the request cannot be handled
    DeadEnd,
    /// Planning or dispatch failed
    InternalError,
    /// The turn budget ran out
    StackOverflow,
}

impl EscalationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationKind::DeadEnd => "DeadEnd",
            EscalationKind::InternalError => "InternalError",
            EscalationKind::StackOverflow => "StackOverflow",
        }
    }
}

impl fmt::Display for EscalationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Either a final answer or an escalation.
///
/// Serializes as `{"CompleteAssignment": "..."}` or
/// `{"Error": "DeadEnd", "Escalation": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outcome {
    Answer {
        #[serde(rename = "CompleteAssignment")]
        answer: String,
    },
    Escalation {
        #[serde(rename = "Error")]
        kind: EscalationKind,
        #[serde(rename = "Escalation")]
        message: String,
    },
}

impl Outcome {
    pub fn answer(answer: impl Into<String>) -> Self {
        Outcome::Answer {
            answer: answer.into(),
        }
    }

    pub fn escalation(kind: EscalationKind, message: impl Into<String>) -> Self {
        Outcome::Escalation {
            kind,
            message: message.into(),
        }
    }

    /// Map a request-fatal error to its escalation
    pub fn from_error(err: &Error) -> Self {
        let kind = match err.kind() {
            ErrorKind::BudgetExceeded => EscalationKind::StackOverflow,
            _ => EscalationKind::InternalError,
        };
        Outcome::escalation(kind, err.message())
    }

    pub fn is_answer(&self) -> bool {
        matches!(self, Outcome::Answer { .. })
    }

    pub fn escalation_kind(&self) -> Option<EscalationKind> {
        match self {
            Outcome::Answer { .. } => None,
            Outcome::Escalation { kind, .. } => Some(*kind),
        }
    }

    /// The answer or the escalation message
    pub fn text(&self) -> &str {
        match self {
            Outcome::Answer { answer } => answer,
            Outcome::Escalation { message, .. } => message,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Answer { answer } => write!(f, "{}", answer),
            Outcome::Escalation { kind, message } => write!(f, "[{}] {}", kind, message),
        }
    }
}
