//! Orchestrator API surface and per-turn request prompts

use crate::builtin::Builtin;
use crate::delegate::DelegateRegistry;
use crate::state::Memory;
use plancraft_vm::schema::request_prompt;
use plancraft_vm::{ApiFunction, ApiParam, ApiSchema};
use serde_json::Value;

const ORCHESTRATOR_GUIDE: &str = "\
You orchestrate a set of domain agents to answer the user's request. Each program you write is one execution turn; answering may take several turns.

A program always starts with one or more \"WriteThoughts\" calls where you think step by step, and always ends with exactly one of \"ThinkMore\", \"CompleteAssignment\", \"OutputMessage\" or \"DeadEnd\".
End with \"ThinkMore\" when the turn gathers information from agents; the answers are shown to you in the next turn.
End with \"CompleteAssignment\" when the answer is known, or with \"OutputMessage\" to attach structured data to it. A final program must not call any agent.
End with \"DeadEnd\" when no agent can help.
Agents cannot see this conversation. Every agent request must be complete and self-contained, with all needed values written inline.
Never ask an agent a question that already has an answer in memory.
Every agent call has a cost. Use the fewest steps that answer the request.";

const SCRATCHPAD_TYPE: &str = "\
type Scratchpad = {
  // Reasoning for this turn
  reasoning: string;
  // Short bulleted long-term plan
  plan: string[];
  // Is the result correct and based on real data?
  critique?: string;
  // What the previous turn revealed
  observation?: string;
};";

const ESCALATION_TYPE: &str = "\
// Final message when the request cannot be handled
type EscalationMessage = {
  Error: 'DeadEnd' | 'InternalError' | 'StackOverflow';
  Escalation: string;
};";

const FINAL_ANSWER_TYPE: &str = "\
// Final message when the request was answered
type FinalAnswer = {
  CompleteAssignment: string;
};";

/// API the orchestrator programs are written against: built-ins plus one
/// function per registered delegate
pub fn orchestrator_api(registry: &DelegateRegistry) -> ApiSchema {
    let mut api = ApiSchema::new("API")
        .with_preamble(ORCHESTRATOR_GUIDE)
        .with_type(SCRATCHPAD_TYPE)
        .with_type(ESCALATION_TYPE)
        .with_type(FINAL_ANSWER_TYPE);

    for builtin in Builtin::ALL {
        api = api.with_function(builtin_api(builtin));
    }

    for delegate in registry.iter() {
        api = api.with_function(
            ApiFunction::new(delegate.name(), delegate.description())
                .param(ApiParam::new("prompt", "string"))
                .returns("string"),
        );
    }

    api
}

fn builtin_api(builtin: Builtin) -> ApiFunction {
    let function = ApiFunction::new(builtin.name(), builtin_description(builtin));
    match builtin {
        Builtin::WriteThoughts => function
            .param(ApiParam::new("input", "Scratchpad"))
            .returns("Scratchpad"),
        Builtin::ThinkMore => function
            .param(ApiParam::new("prompt", "string").describe("the original request").optional())
            .param(ApiParam::new("info", "string[]").describe("information gathered so far").optional())
            .returns("void"),
        Builtin::CompleteAssignment => function
            .param(ApiParam::new("answer", "string").describe("user friendly answer with insights"))
            .returns("FinalAnswer"),
        Builtin::DeadEnd => function
            .param(ApiParam::new("escalation", "string").describe("why the request cannot be handled"))
            .returns("EscalationMessage"),
        Builtin::OutputMessage => function
            .param(ApiParam::new("message", "string"))
            .param(ApiParam::new("data", "object").describe("structured data shown after the message").optional())
            .returns("FinalAnswer"),
    }
}

fn builtin_description(builtin: Builtin) -> &'static str {
    match builtin {
        Builtin::WriteThoughts => "Write your reasoning and plan in the scratchpad.",
        Builtin::ThinkMore => "Ends an intermediate turn; another turn follows with the agents' answers.",
        Builtin::CompleteAssignment => "Ends the request with the final answer.",
        Builtin::DeadEnd => "Ends the request when it cannot be handled.",
        Builtin::OutputMessage => "Ends the request with the final answer and optional structured data.",
    }
}

/// Request message for the first turn
pub fn first_turn_prompt(request: &str) -> String {
    request_prompt(&format!(
        "{}. Utilize information from memory when possible to avoid asking an agent again.",
        request.trim_end_matches('.')
    ))
}

/// Request message for every turn after the first.
///
/// `responses` are the agent answers of the previous turn, `memory` the full log.
pub fn next_turn_prompt(
    request: &str,
    turn: usize,
    reflection: Option<&Value>,
    responses: &[String],
    memory: &Memory,
) -> String {
    let scratchpad = reflection
        .map(|r| serde_json::to_string_pretty(r).unwrap_or_default())
        .unwrap_or_else(|| "{}".to_string());
    let responses = serde_json::to_string_pretty(responses).unwrap_or_default();

    request_prompt(&format!(
        "This is turn {} for the original request:\n{}\n\n\
         Your scratchpad from the previous turn:\n{}\n\n\
         Agent responses from the previous turn:\n{}\n\n\
         Memory of every agent question answered so far:\n{}\n\n\
         Utilize information from memory when possible to avoid asking an agent again. \
         If memory holds everything needed, write a final program.",
        turn,
        request,
        scratchpad,
        responses,
        memory.to_json_pretty()
    ))
}
