//! Model-generated mock data for skill agents that have no backend yet

use plancraft_error::{Error, Result};
use plancraft_vm::Program;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Mocked skill results: skill name, then JSON-encoded argument list, then result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MockData(BTreeMap<String, BTreeMap<String, Value>>);

impl MockData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, skill: impl Into<String>, args: &[Value], result: Value) {
        self.0
            .entry(skill.into())
            .or_default()
            .insert(args_key(args), result);
    }

    pub fn skills(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Mocked result for one call.
    ///
    /// Keys are matched exactly, then as JSON, then by the lone argument.
    /// Arguments that came from earlier steps are unknown when the data is
    /// generated, so a skill with no matching key answers with its first entry.
    pub fn lookup(&self, skill: &str, args: &[Value]) -> Result<Value> {
        let entries = self
            .0
            .get(skill)
            .filter(|entries| !entries.is_empty())
            .ok_or_else(|| {
                Error::delegate_failed(skill, format!("No mock data for {}", skill))
                    .with_operation("mock::lookup")
            })?;

        if let Some(value) = entries.get(&args_key(args)) {
            return Ok(value.clone());
        }

        let wanted = Value::Array(args.to_vec());
        let single = match args {
            [arg] => Some(arg),
            _ => None,
        };
        let matched = entries.iter().find(|(key, _)| {
            let raw = matches!(single, Some(Value::String(s)) if s.as_str() == key.as_str());
            raw || serde_json::from_str::<Value>(key.as_str())
                .map_or(false, |parsed| parsed == wanted || single == Some(&parsed))
        });

        let (_, value) = matched.or_else(|| entries.iter().next()).ok_or_else(|| {
            Error::delegate_failed(skill, format!("No mock data for {}", skill)).with_operation("mock::lookup")
        })?;
        Ok(value.clone())
    }
}

fn args_key(args: &[Value]) -> String {
    Value::Array(args.to_vec()).to_string()
}

/// System prompt for the mock data generator
pub(crate) fn mock_prompt(api: &str) -> String {
    format!(
        "You generate mock data for an API declared in TypeScript:\n\
         ```ts\n{}\n```\n\
         Given a program that calls the API, produce a realistic dataset for every API function the program calls, and for no other function. \
         The output must be a JSON object of this shape:\n\
         ```\n\
         {{\n  \"<functionName>\": {{\n    \"<JSON-encoded argument list>\": <mocked result>\n  }}\n}}\n\
         ```\n\
         Encode argument lists as compact JSON arrays, e.g. [\"123456789\"] or [{{\"trackingNumber\":\"123456789\"}}].",
        api
    )
}

/// User prompt carrying the program to mock
pub(crate) fn mock_request(program: &Program) -> String {
    format!(
        "The following is the program:\n```json\n{}\n```\n\
         Here is the mock data in JSON with 2 spaces of indentation:",
        program.to_json_pretty()
    )
}
