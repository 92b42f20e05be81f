//! # Turn Validator
//!
//! Accepts or rejects a parsed turn program against the turn grammar and the
//! request's memory.
//!
//! ```text
//! WriteThoughts+  (agent calls)*  ThinkMore                        intermediate
//! WriteThoughts+                  CompleteAssignment | OutputMessage  final, success
//! WriteThoughts+                  DeadEnd                             final, give-up
//! ```
//!
//! Every violated rule is reported in one combined message so a single
//! repair round can fix all of them. The one exception to rejecting is
//! auto-correction: agent calls without any terminal call get a `ThinkMore`
//! appended when nothing else is wrong.

use crate::builtin::{Builtin, Terminal};
use crate::state::Memory;
use plancraft_error::{Error, Result};
use plancraft_vm::{Expression, FunctionCall, Program};
use std::collections::HashSet;
use tracing::debug;

/// Classification of an accepted program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramKind {
    Intermediate,
    Success,
    GiveUp,
}

impl From<Terminal> for ProgramKind {
    fn from(terminal: Terminal) -> Self {
        match terminal {
            Terminal::Continue => ProgramKind::Intermediate,
            Terminal::Success => ProgramKind::Success,
            Terminal::GiveUp => ProgramKind::GiveUp,
        }
    }
}

/// A program that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedProgram {
    pub program: Program,
    pub kind: ProgramKind,
    /// The terminal `ThinkMore` step was synthesized
    pub corrected: bool,
}

impl ValidatedProgram {
    pub fn is_final(&self) -> bool {
        self.kind != ProgramKind::Intermediate
    }
}

/// Validates turn programs against the memory of one request
pub struct TurnValidator<'a> {
    memory: &'a Memory,
}

struct AgentCall<'a> {
    step: usize,
    name: &'a str,
    question: Option<&'a str>,
}

impl<'a> TurnValidator<'a> {
    pub fn new(memory: &'a Memory) -> Self {
        Self { memory }
    }

    pub fn validate(&self, program: Program) -> Result<ValidatedProgram> {
        let mut errors: Vec<String> = Vec::new();

        self.check_reflection(&program, &mut errors);
        let finals = self.check_builtins(&program, &mut errors);
        let agent_calls = collect_agent_calls(&program);
        self.check_agent_calls(&agent_calls, &mut errors);

        let last = program.last_step().map(|s| s.name.as_str()).unwrap_or_default();
        let terminal = Builtin::from_name(last).and_then(|b| b.terminal());

        let (kind, corrected) = match terminal {
            Some(Terminal::Continue) => {
                if agent_calls.is_empty() {
                    errors.push(format!(
                        "Invalid intermediate program. \"{}\" requires at least one agent call to gather more information. If the information in memory is enough, end the program with \"{}\" instead.",
                        Builtin::ThinkMore.name(),
                        Builtin::CompleteAssignment.name()
                    ));
                }
                (ProgramKind::Intermediate, false)
            }
            Some(terminal) => {
                if !agent_calls.is_empty() {
                    let names: Vec<&str> = agent_calls.iter().map(|c| c.name).collect();
                    errors.push(format!(
                        "Ambiguous program. It ends with \"{}\" but also calls {}. If more information is needed, call the agents and end with \"{}\"; otherwise answer from memory without calling any agent.",
                        last,
                        names.join(", "),
                        Builtin::ThinkMore.name()
                    ));
                }
                if finals > 1 {
                    errors.push(format!(
                        "Invalid final program. Exactly one of \"{}\", \"{}\" or \"{}\" is permitted, found {}.",
                        Builtin::CompleteAssignment.name(),
                        Builtin::OutputMessage.name(),
                        Builtin::DeadEnd.name(),
                        finals
                    ));
                }
                (ProgramKind::from(terminal), false)
            }
            None if !agent_calls.is_empty() && errors.is_empty() => {
                (ProgramKind::Intermediate, true)
            }
            None => {
                errors.push(format!(
                    "Invalid program. The last step must call \"{}\", \"{}\" or \"{}\", found \"{}\".",
                    Builtin::ThinkMore.name(),
                    Builtin::CompleteAssignment.name(),
                    Builtin::DeadEnd.name(),
                    last
                ));
                (ProgramKind::Intermediate, false)
            }
        };

        if !errors.is_empty() {
            debug!(errors = errors.len(), "program rejected");
            return Err(Error::validation_failed(errors.join("\n"))
                .with_operation("validator::validate")
                .with_context("violations", errors.len().to_string()));
        }

        let program = if corrected {
            debug!("appending missing ThinkMore step");
            program.with_marker_step(Builtin::ThinkMore.name())
        } else {
            program
        };

        Ok(ValidatedProgram {
            program,
            kind,
            corrected,
        })
    }

    /// The program opens with one or more `WriteThoughts` steps and uses it nowhere else
    fn check_reflection(&self, program: &Program, errors: &mut Vec<String>) {
        let name = Builtin::WriteThoughts.name();
        let steps = program.steps();
        if steps.first().map(|s| s.name.as_str()) != Some(name) {
            errors.push(format!(
                "Invalid program. The first step must call \"{}\" to record your reasoning and plan.",
                name
            ));
        }

        let leading = steps.iter().take_while(|s| s.name == name).count();
        for (index, step) in steps.iter().enumerate().skip(leading) {
            if step.name == name {
                errors.push(format!(
                    "Invalid program. @steps[{}] calls \"{}\", which may only appear at the start of the program.",
                    index, name
                ));
            }
        }

        for step in &steps[..leading] {
            if !matches!(step.args.first(), Some(Expression::Object(_))) {
                errors.push(format!(
                    "Invalid program. \"{}\" takes a single scratchpad object with \"reasoning\" and \"plan\".",
                    name
                ));
                break;
            }
        }
    }

    /// Arity, placement and nesting of built-ins; returns the number of final calls
    fn check_builtins(&self, program: &Program, errors: &mut Vec<String>) -> usize {
        let steps = program.steps();
        let mut finals = 0;

        for (index, step) in steps.iter().enumerate() {
            if let Some(builtin) = Builtin::from_name(&step.name) {
                if !builtin.accepts_arity(step.args.len()) {
                    errors.push(format!(
                        "Invalid program. @steps[{}] calls \"{}\" with {} argument(s), expected {}.",
                        index,
                        step.name,
                        step.args.len(),
                        builtin.describe_arity()
                    ));
                }
                if let Some(terminal) = builtin.terminal() {
                    if terminal != Terminal::Continue {
                        finals += 1;
                    }
                    if index + 1 != steps.len() {
                        errors.push(format!(
                            "Invalid program. @steps[{}] calls \"{}\", which must be the last step.",
                            index, step.name
                        ));
                    }
                }
            }

            let mut nested = Vec::new();
            for arg in &step.args {
                collect_calls(arg, &mut nested);
            }
            for call in nested {
                check_nested(index, call, errors);
            }
        }

        finals
    }

    fn check_agent_calls(&self, calls: &[AgentCall<'_>], errors: &mut Vec<String>) {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut answered = 0;

        for call in calls {
            let question = match call.question {
                Some(question) if !question.trim().is_empty() => question,
                _ => {
                    errors.push(format!(
                        "Invalid program. @steps[{}] calls agent \"{}\", which takes exactly one string argument with a complete, self-contained request.",
                        call.step, call.name
                    ));
                    continue;
                }
            };

            if self.memory.answer_for(question).is_some() {
                answered += 1;
                errors.push(format!(
                    "Invalid program. @steps[{}] asks \"{}\" the question \"{}\", which already has an answer in memory. You must not ask the same question twice.",
                    call.step, call.name, question
                ));
            } else if !seen.insert(question) {
                errors.push(format!(
                    "Invalid program. @steps[{}] asks the question \"{}\" more than once in the same program.",
                    call.step, question
                ));
            }
        }

        if !calls.is_empty() && answered == calls.len() {
            errors.push(format!(
                "All the information needed to answer the request is already in memory. Write a final program that ends with \"{}\".",
                Builtin::CompleteAssignment.name()
            ));
        }
    }
}

/// Built-ins are only valid as top-level steps
fn check_nested(step: usize, call: &FunctionCall, errors: &mut Vec<String>) {
    let mut calls = Vec::new();
    call.walk_calls(&mut |c| calls.push(c));
    for nested in calls {
        if Builtin::from_name(&nested.name).is_some() {
            errors.push(format!(
                "Invalid program. @steps[{}] nests a call to \"{}\"; built-in functions must be top-level steps.",
                step, nested.name
            ));
        }
    }
}

fn collect_calls<'a>(expr: &'a Expression, out: &mut Vec<&'a FunctionCall>) {
    match expr {
        Expression::Call(call) => out.push(call),
        Expression::Array(items) => items.iter().for_each(|e| collect_calls(e, out)),
        Expression::Object(fields) => fields.values().for_each(|e| collect_calls(e, out)),
        Expression::Literal(_) | Expression::Ref(_) => {}
    }
}

/// Every non-built-in call, nested calls included, in program order
fn collect_agent_calls(program: &Program) -> Vec<AgentCall<'_>> {
    let mut calls = Vec::new();
    program.walk_calls(&mut |step, call| {
        if Builtin::from_name(&call.name).is_none() {
            let question = if call.args.len() == 1 {
                call.first_str_arg()
            } else {
                None
            };
            calls.push(AgentCall {
                step,
                name: call.name.as_str(),
                question,
            });
        }
    });
    calls
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryEntry;
    use plancraft_error::ErrorKind;

    const THOUGHTS: &str = r#"{"@func": "WriteThoughts", "@args": [{"reasoning": "r", "plan": ["p"]}]}"#;

    fn program(steps: &[&str]) -> Program {
        Program::parse(&format!(r#"{{"@steps": [{}]}}"#, steps.join(","))).unwrap()
    }

    fn ask(agent: &str, question: &str) -> String {
        format!(r#"{{"@func": "{}", "@args": ["{}"]}}"#, agent, question)
    }

    fn memory_with(question: &str) -> Memory {
        let mut memory = Memory::new();
        memory.push(MemoryEntry {
            agent: "Shipment".into(),
            question: question.into(),
            answer: "Pending".into(),
        });
        memory
    }

    fn reject(memory: &Memory, steps: &[&str]) -> String {
        let err = TurnValidator::new(memory).validate(program(steps)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
        err.message().to_string()
    }

    #[test]
    fn test_accepts_intermediate() {
        let memory = Memory::new();
        let q = ask("Shipment", "Track package 123456789");
        let validated = TurnValidator::new(&memory)
            .validate(program(&[THOUGHTS, &q, r#"{"@func": "ThinkMore"}"#]))
            .unwrap();
        assert_eq!(validated.kind, ProgramKind::Intermediate);
        assert!(!validated.corrected);
        assert!(!validated.is_final());
    }

    #[test]
    fn test_accepts_final_programs() {
        let memory = Memory::new();
        let validated = TurnValidator::new(&memory)
            .validate(program(&[THOUGHTS, r#"{"@func": "CompleteAssignment", "@args": ["done"]}"#]))
            .unwrap();
        assert_eq!(validated.kind, ProgramKind::Success);

        let validated = TurnValidator::new(&memory)
            .validate(program(&[THOUGHTS, r#"{"@func": "DeadEnd", "@args": ["no agent can help"]}"#]))
            .unwrap();
        assert_eq!(validated.kind, ProgramKind::GiveUp);

        let validated = TurnValidator::new(&memory)
            .validate(program(&[
                THOUGHTS,
                THOUGHTS,
                r#"{"@func": "OutputMessage", "@args": ["done", {"status": "Pending"}]}"#,
            ]))
            .unwrap();
        assert_eq!(validated.kind, ProgramKind::Success);
    }

    #[test]
    fn test_rejects_missing_reflection() {
        let message = reject(&Memory::new(), &[r#"{"@func": "CompleteAssignment", "@args": ["x"]}"#]);
        assert!(message.contains("first step must call \"WriteThoughts\""));

        let message = reject(
            &Memory::new(),
            &[THOUGHTS, &ask("Shipment", "q"), THOUGHTS, r#"{"@func": "ThinkMore"}"#],
        );
        assert!(message.contains("@steps[2] calls \"WriteThoughts\""));
    }

    #[test]
    fn test_rejects_ambiguous_final() {
        let q = ask("Shipment", "Track package 123456789");
        let message = reject(
            &Memory::new(),
            &[THOUGHTS, &q, r#"{"@func": "CompleteAssignment", "@args": ["done"]}"#],
        );
        assert!(message.starts_with("Ambiguous program."));
        assert!(message.contains("Shipment"));
    }

    #[test]
    fn test_rejects_think_more_without_agents() {
        let message = reject(&Memory::new(), &[THOUGHTS, r#"{"@func": "ThinkMore"}"#]);
        assert!(message.contains("requires at least one agent call"));
    }

    #[test]
    fn test_rejects_duplicate_question_from_memory() {
        let memory = memory_with("Track package 123456789");
        let q = ask("Shipment", "Track package 123456789");
        let message = reject(&memory, &[THOUGHTS, &q, r#"{"@func": "ThinkMore"}"#]);
        assert!(message.contains("\"Track package 123456789\", which already has an answer in memory"));
        assert!(message.contains("All the information needed"));
    }

    #[test]
    fn test_partial_memory_match_has_no_hint() {
        let memory = memory_with("Track package 1");
        let a = ask("Shipment", "Track package 1");
        let b = ask("Shipment", "Track package 2");
        let message = reject(&memory, &[THOUGHTS, &a, &b, r#"{"@func": "ThinkMore"}"#]);
        assert!(message.contains("already has an answer"));
        assert!(!message.contains("All the information needed"));
    }

    #[test]
    fn test_rejects_duplicate_question_within_program() {
        let q = ask("Shipment", "Track package 1");
        let message = reject(&Memory::new(), &[THOUGHTS, &q, &q, r#"{"@func": "ThinkMore"}"#]);
        assert!(message.contains("more than once"));
    }

    #[test]
    fn test_auto_corrects_missing_terminal() {
        let memory = Memory::new();
        let q = ask("Shipment", "Track package 123456789");
        let validated = TurnValidator::new(&memory).validate(program(&[THOUGHTS, &q])).unwrap();
        assert!(validated.corrected);
        assert_eq!(validated.kind, ProgramKind::Intermediate);
        assert_eq!(validated.program.len(), 3);
        assert_eq!(validated.program.last_step().unwrap().name, "ThinkMore");
    }

    #[test]
    fn test_no_auto_correction_when_other_errors() {
        let q = ask("Shipment", "Track package 123456789");
        let message = reject(&Memory::new(), &[&q]);
        assert!(message.contains("first step must call \"WriteThoughts\""));
        assert!(message.contains("last step must call"));
    }

    #[test]
    fn test_rejects_without_terminal_or_agents() {
        let message = reject(&Memory::new(), &[THOUGHTS]);
        assert!(message.contains("last step must call"));
    }

    #[test]
    fn test_rejects_multiple_finals_and_misplaced_terminal() {
        let message = reject(
            &Memory::new(),
            &[
                THOUGHTS,
                r#"{"@func": "CompleteAssignment", "@args": ["a"]}"#,
                r#"{"@func": "CompleteAssignment", "@args": ["b"]}"#,
            ],
        );
        assert!(message.contains("@steps[1] calls \"CompleteAssignment\", which must be the last step"));
        assert!(message.contains("found 2"));
        assert_eq!(message.lines().count(), 2);
    }

    #[test]
    fn test_rejects_bad_agent_arguments() {
        let message = reject(
            &Memory::new(),
            &[THOUGHTS, r#"{"@func": "Shipment", "@args": [123]}"#, r#"{"@func": "ThinkMore"}"#],
        );
        assert!(message.contains("exactly one string argument"));
    }

    #[test]
    fn test_rejects_builtin_arity_and_nesting() {
        let message = reject(&Memory::new(), &[THOUGHTS, r#"{"@func": "CompleteAssignment"}"#]);
        assert!(message.contains("with 0 argument(s), expected exactly 1"));

        let message = reject(
            &Memory::new(),
            &[
                THOUGHTS,
                r#"{"@func": "OutputMessage", "@args": [{"@func": "CompleteAssignment", "@args": ["x"]}]}"#,
            ],
        );
        assert!(message.contains("nests a call to \"CompleteAssignment\""));
    }

    #[test]
    fn test_nested_agent_call_counts() {
        let message = reject(
            &Memory::new(),
            &[
                THOUGHTS,
                r#"{"@func": "OutputMessage", "@args": ["status", {"s": {"@func": "Shipment", "@args": ["Track 1"]}}]}"#,
            ],
        );
        assert!(message.starts_with("Ambiguous program."));
    }
}
