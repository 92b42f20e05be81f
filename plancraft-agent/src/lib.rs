//! # Plancraft Agent
//!
//! Multi-turn orchestration of model-written programs:
//! 1. The user provides a request
//! 2. The plan generator asks the model for a turn program and repairs it until the
//!    turn validator accepts it
//! 3. The interpreter runs the program; built-ins are handled locally, every other
//!    call goes to a named delegate
//! 4. Delegate answers land in memory and feed the next turn's prompt
//! 5. The request ends with an answer, a give-up, or once the turn budget is spent
//!
//! The model writes the plan, the delegates do the work.
//!
//! [`Chat`] puts a conversation in front of the orchestrator: a question
//! analyzer decides whether the last user message needs an answer, and an
//! answer analyzer turns the orchestrator's result into a reply.

mod analyzer;
mod builtin;
mod chat;
mod config;
mod delegate;
mod mock;
mod orchestrator;
mod outcome;
mod planner;
mod prompt;
mod skill_agent;
mod state;
mod validator;

pub use analyzer::Analyzer;
pub use builtin::{format_output_message, value_text, Builtin, Terminal};
pub use chat::{Answer, AnswerConfig, AnswerType, Chat, LastUserMessage, Sentiment};
pub use config::AgentConfig;
pub use delegate::{Delegate, DelegateRegistry, FnDelegate};
pub use mock::MockData;
pub use orchestrator::Orchestrator;
pub use outcome::{EscalationKind, Outcome};
pub use planner::{extract_json, PlanGenerator, Transcript};
pub use prompt::{first_turn_prompt, next_turn_prompt, orchestrator_api};
pub use skill_agent::{FnSkill, Skill, SkillAgent};
pub use state::{Memory, MemoryEntry, TurnState};
pub use validator::{ProgramKind, TurnValidator, ValidatedProgram};
