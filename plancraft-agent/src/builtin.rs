//! Built-in orchestrator functions
//!
//! Every call in a turn program is either one of these or a delegate name.

use serde_json::Value;

/// How a program ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    /// Another turn is needed
    Continue,
    /// The request is answered
    Success,
    /// The request cannot be handled
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// Records the turn's scratchpad
    WriteThoughts,
    /// Marks the program as intermediate; arguments are ignored
    ThinkMore,
    /// Final answer text
    CompleteAssignment,
    /// Gives up with a reason
    DeadEnd,
    /// Final answer with optional structured data
    OutputMessage,
}

impl Builtin {
    pub const ALL: [Builtin; 5] = [
        Builtin::WriteThoughts,
        Builtin::ThinkMore,
        Builtin::CompleteAssignment,
        Builtin::DeadEnd,
        Builtin::OutputMessage,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::WriteThoughts => "WriteThoughts",
            Builtin::ThinkMore => "ThinkMore",
            Builtin::CompleteAssignment => "CompleteAssignment",
            Builtin::DeadEnd => "DeadEnd",
            Builtin::OutputMessage => "OutputMessage",
        }
    }

    /// The classification a program gets when this call is its last step
    pub fn terminal(&self) -> Option<Terminal> {
        match self {
            Builtin::WriteThoughts => None,
            Builtin::ThinkMore => Some(Terminal::Continue),
            Builtin::CompleteAssignment | Builtin::OutputMessage => Some(Terminal::Success),
            Builtin::DeadEnd => Some(Terminal::GiveUp),
        }
    }

    /// Inclusive bounds on the number of arguments
    pub fn arity(&self) -> (usize, Option<usize>) {
        match self {
            Builtin::WriteThoughts => (1, Some(1)),
            Builtin::ThinkMore => (0, None),
            Builtin::CompleteAssignment | Builtin::DeadEnd => (1, Some(1)),
            Builtin::OutputMessage => (1, Some(2)),
        }
    }

    pub fn accepts_arity(&self, count: usize) -> bool {
        let (min, max) = self.arity();
        count >= min && max.map_or(true, |max| count <= max)
    }

    pub fn describe_arity(&self) -> String {
        match self.arity() {
            (min, Some(max)) if min == max => format!("exactly {}", min),
            (min, Some(max)) => format!("{} to {}", min, max),
            (min, None) => format!("at least {}", min),
        }
    }
}

/// Render a value as answer text; strings are used verbatim
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// `message`, followed by the pretty-printed `data` object when it has entries
pub fn format_output_message(message: &Value, data: Option<&Value>) -> String {
    let message = value_text(message);
    match data {
        Some(Value::Object(map)) if !map.is_empty() => {
            let pretty = serde_json::to_string_pretty(map).unwrap_or_default();
            format!("{}\n\n{}", message, pretty)
        }
        Some(Value::Array(items)) if !items.is_empty() => {
            let pretty = serde_json::to_string_pretty(items).unwrap_or_default();
            format!("{}\n\n{}", message, pretty)
        }
        _ => message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_name() {
        assert_eq!(Builtin::from_name("ThinkMore"), Some(Builtin::ThinkMore));
        assert_eq!(Builtin::from_name("thinkmore"), None);
        assert_eq!(Builtin::from_name("Shipment"), None);
    }

    #[test]
    fn test_terminal_classification() {
        assert_eq!(Builtin::ThinkMore.terminal(), Some(Terminal::Continue));
        assert_eq!(Builtin::OutputMessage.terminal(), Some(Terminal::Success));
        assert_eq!(Builtin::DeadEnd.terminal(), Some(Terminal::GiveUp));
        assert_eq!(Builtin::WriteThoughts.terminal(), None);
    }

    #[test]
    fn test_arity() {
        assert!(Builtin::ThinkMore.accepts_arity(0));
        assert!(Builtin::ThinkMore.accepts_arity(3));
        assert!(!Builtin::CompleteAssignment.accepts_arity(0));
        assert!(Builtin::OutputMessage.accepts_arity(2));
        assert!(!Builtin::OutputMessage.accepts_arity(3));
        assert_eq!(Builtin::OutputMessage.describe_arity(), "1 to 2");
        assert_eq!(Builtin::DeadEnd.describe_arity(), "exactly 1");
    }

    #[test]
    fn test_format_output_message() {
        let text = format_output_message(&json!("Your package is pending."), Some(&json!({"status": "Pending"})));
        assert_eq!(text, "Your package is pending.\n\n{\n  \"status\": \"Pending\"\n}");

        let text = format_output_message(&json!("Done."), Some(&json!({})));
        assert_eq!(text, "Done.");

        assert_eq!(format_output_message(&json!(42), None), "42");
    }
}
