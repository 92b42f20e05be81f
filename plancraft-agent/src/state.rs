//! Request-scoped turn state: turn counter, memory log and reflection

use plancraft_error::{Error, Result};
use serde::Serialize;
use serde_json::Value;

/// One answered delegate question
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryEntry {
    pub agent: String,
    pub question: String,
    pub answer: String,
}

/// Ordered log of delegate answers, in the order they were recorded
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Memory {
    entries: Vec<MemoryEntry>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: MemoryEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The recorded answer for an exact question, from any agent
    pub fn answer_for(&self, question: &str) -> Option<&MemoryEntry> {
        self.entries.iter().find(|e| e.question == question)
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(&self.entries).unwrap_or_default()
    }
}

/// State threaded through the turns of a single request
#[derive(Debug, Clone)]
pub struct TurnState {
    turn: usize,
    max_turns: usize,
    memory: Memory,
    reflection: Option<Value>,
}

impl TurnState {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turn: 0,
            max_turns,
            memory: Memory::new(),
            reflection: None,
        }
    }

    /// Start the next turn, or fail once the budget is spent
    pub fn advance(&mut self) -> Result<usize> {
        self.turn += 1;
        if self.turn > self.max_turns {
            return Err(Error::budget_exceeded(self.max_turns)
                .with_operation("orchestrator::advance")
                .with_context("turn", self.turn.to_string()));
        }
        Ok(self.turn)
    }

    pub fn turn(&self) -> usize {
        self.turn
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn reflection(&self) -> Option<&Value> {
        self.reflection.as_ref()
    }

    /// Fold one turn's delegate answers and scratchpad into the state
    pub fn record_turn(&mut self, entries: Vec<MemoryEntry>, reflection: Option<Value>) {
        for entry in entries {
            self.memory.push(entry);
        }
        if reflection.is_some() {
            self.reflection = reflection;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plancraft_error::ErrorKind;
    use serde_json::json;

    fn entry(question: &str, answer: &str) -> MemoryEntry {
        MemoryEntry {
            agent: "Shipment".into(),
            question: question.into(),
            answer: answer.into(),
        }
    }

    #[test]
    fn test_budget() {
        let mut state = TurnState::new(2);
        assert_eq!(state.advance().unwrap(), 1);
        assert_eq!(state.advance().unwrap(), 2);

        let err = state.advance().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BudgetExceeded);
        assert_eq!(err.context_value("turn"), Some("3"));
    }

    #[test]
    fn test_record_turn() {
        let mut state = TurnState::new(3);
        state.record_turn(vec![entry("Track 1", "Pending")], Some(json!({"reasoning": "r"})));
        state.record_turn(vec![entry("Track 2", "Delivered")], None);

        assert_eq!(state.memory().len(), 2);
        assert_eq!(state.memory().answer_for("Track 2").unwrap().answer, "Delivered");
        assert!(state.memory().answer_for("Track 3").is_none());
        assert_eq!(state.reflection(), Some(&json!({"reasoning": "r"})));
    }

    #[test]
    fn test_memory_serializes_as_list() {
        let mut memory = Memory::new();
        memory.push(entry("q", "a"));
        assert_eq!(
            serde_json::to_value(&memory).unwrap(),
            json!([{"agent": "Shipment", "question": "q", "answer": "a"}])
        );
    }
}
