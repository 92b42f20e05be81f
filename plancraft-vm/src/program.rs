//! # Program Model
//!
//! The restricted JSON program representation a completion service is asked
//! to produce for one turn.
//!
//! ```json
//! {"@steps": [
//!   {"@func": "WriteThoughts", "@args": [{"reasoning": "...", "plan": ["..."]}]},
//!   {"@func": "Shipment", "@args": ["Track package 123456789"]},
//!   {"@func": "ThinkMore"}
//! ]}
//! ```
//!
//! - A program is a non-empty, ordered list of function calls.
//! - Arguments are expressions: JSON scalars, arrays and objects (which may
//!   nest calls and references), function calls, or `{"@ref": n}` result
//!   references to a preceding step.

use crate::error::{self, Result};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

pub const STEPS_KEY: &str = "@steps";
pub const FUNC_KEY: &str = "@func";
pub const ARGS_KEY: &str = "@args";
pub const REF_KEY: &str = "@ref";

/// An ordered, non-empty sequence of function calls
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    steps: Vec<FunctionCall>,
}

/// A named call with argument expressions
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<Expression>,
}

/// An argument expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A JSON scalar (null, bool, number or string)
    Literal(Value),
    /// An array whose elements are evaluated independently
    Array(Vec<Expression>),
    /// An object whose values are evaluated independently
    Object(BTreeMap<String, Expression>),
    /// A nested function call
    Call(FunctionCall),
    /// Index of a preceding step's result
    Ref(usize),
}

impl Program {
    /// Build a program from steps, enforcing the same invariants as parsing
    pub fn new(steps: Vec<FunctionCall>) -> Result<Self> {
        let program = Self { steps };
        // Round through the wire format so hand-built programs obey the
        // non-empty and backward-reference rules too.
        Self::from_value(&program.to_value())
    }

    /// Parse a program from raw JSON text
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text).map_err(|e| {
            error::parse_error(format!("invalid JSON: {}", e))
                .with_operation("program::parse")
                .set_source(e)
        })?;
        Self::from_value(&value)
    }

    /// Parse a program from an already decoded JSON value
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value.as_object().ok_or_else(|| {
            error::parse_error_at("$", "expected an object with a \"@steps\" array")
        })?;

        for key in obj.keys() {
            if key != STEPS_KEY {
                return Err(error::parse_error_at(
                    "$",
                    format!("unexpected property \"{}\", only \"@steps\" is allowed", key),
                ));
            }
        }

        let steps = obj
            .get(STEPS_KEY)
            .ok_or_else(|| error::parse_error_at("$", "missing required property \"@steps\""))?
            .as_array()
            .ok_or_else(|| error::parse_error_at(STEPS_KEY, "expected an array of function calls"))?;

        if steps.is_empty() {
            return Err(error::parse_error_at(
                STEPS_KEY,
                "a program must contain at least one step",
            ));
        }

        let mut parsed = Vec::with_capacity(steps.len());
        for (index, step) in steps.iter().enumerate() {
            let path = format!("{}[{}]", STEPS_KEY, index);
            match parse_expression(step, &path, index)? {
                Expression::Call(call) => parsed.push(call),
                _ => {
                    return Err(error::parse_error_at(
                        &path,
                        "each step must be a function call object with \"@func\"",
                    ))
                }
            }
        }

        Ok(Self { steps: parsed })
    }

    pub fn steps(&self) -> &[FunctionCall] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn first_step(&self) -> Option<&FunctionCall> {
        self.steps.first()
    }

    pub fn last_step(&self) -> Option<&FunctionCall> {
        self.steps.last()
    }

    /// Append a step without arguments or references (used for terminal markers)
    pub fn with_marker_step(mut self, name: impl Into<String>) -> Self {
        self.steps.push(FunctionCall::new(name, Vec::new()));
        self
    }

    /// Encode into the wire format
    pub fn to_value(&self) -> Value {
        let steps = self.steps.iter().map(FunctionCall::to_value).collect();
        let mut obj = Map::new();
        obj.insert(STEPS_KEY.to_string(), Value::Array(steps));
        Value::Object(obj)
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(&self.to_value()).unwrap_or_default()
    }

    /// Visit every call in the program, nested calls included, depth-first
    pub fn walk_calls<'a>(&'a self, visit: &mut impl FnMut(usize, &'a FunctionCall)) {
        for (index, step) in self.steps.iter().enumerate() {
            step.walk_calls(&mut |call| visit(index, call));
        }
    }
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, args: Vec<Expression>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// The call's first argument, if it is a string literal
    pub fn first_str_arg(&self) -> Option<&str> {
        self.args.first().and_then(Expression::as_str)
    }

    /// All step indexes this call references, nested calls included
    pub fn references(&self) -> Vec<usize> {
        let mut refs = Vec::new();
        for arg in &self.args {
            arg.collect_refs(&mut refs);
        }
        refs
    }

    /// Visit this call and every call nested in its arguments
    pub fn walk_calls<'a>(&'a self, visit: &mut impl FnMut(&'a FunctionCall)) {
        visit(self);
        for arg in &self.args {
            arg.walk_calls(visit);
        }
    }

    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert(FUNC_KEY.to_string(), Value::String(self.name.clone()));
        if !self.args.is_empty() {
            let args = self.args.iter().map(Expression::to_value).collect();
            obj.insert(ARGS_KEY.to_string(), Value::Array(args));
        }
        Value::Object(obj)
    }
}

impl Expression {
    pub fn string(s: impl Into<String>) -> Self {
        Expression::Literal(Value::String(s.into()))
    }

    pub fn reference(index: usize) -> Self {
        Expression::Ref(index)
    }

    pub fn call(name: impl Into<String>, args: Vec<Expression>) -> Self {
        Expression::Call(FunctionCall::new(name, args))
    }

    /// Convert a plain JSON value (no calls or references) into an expression
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Array(items) => Expression::Array(items.into_iter().map(Self::from_json).collect()),
            Value::Object(map) => Expression::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
            scalar => Expression::Literal(scalar),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Expression::Literal(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Expression::Literal(_))
    }

    fn collect_refs(&self, refs: &mut Vec<usize>) {
        match self {
            Expression::Ref(index) => refs.push(*index),
            Expression::Array(items) => items.iter().for_each(|e| e.collect_refs(refs)),
            Expression::Object(map) => map.values().for_each(|e| e.collect_refs(refs)),
            Expression::Call(call) => call.args.iter().for_each(|e| e.collect_refs(refs)),
            Expression::Literal(_) => {}
        }
    }

    fn walk_calls<'a>(&'a self, visit: &mut impl FnMut(&'a FunctionCall)) {
        match self {
            Expression::Call(call) => call.walk_calls(visit),
            Expression::Array(items) => items.iter().for_each(|e| e.walk_calls(visit)),
            Expression::Object(map) => map.values().for_each(|e| e.walk_calls(visit)),
            Expression::Literal(_) | Expression::Ref(_) => {}
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Expression::Literal(v) => v.clone(),
            Expression::Array(items) => Value::Array(items.iter().map(Self::to_value).collect()),
            Expression::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
            Expression::Call(call) => call.to_value(),
            Expression::Ref(index) => {
                let mut obj = Map::new();
                obj.insert(REF_KEY.to_string(), Value::from(*index));
                Value::Object(obj)
            }
        }
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Parse an expression found inside step `step` at `path`
fn parse_expression(value: &Value, path: &str, step: usize) -> Result<Expression> {
    match value {
        Value::Object(map) if map.contains_key(FUNC_KEY) => {
            parse_call(map, path, step).map(Expression::Call)
        }
        Value::Object(map) if map.contains_key(REF_KEY) => parse_ref(map, path, step),
        Value::Object(map) => {
            let mut fields = BTreeMap::new();
            for (key, item) in map {
                if key.starts_with('@') {
                    return Err(error::parse_error_at(
                        path,
                        format!("unexpected property \"{}\"", key),
                    ));
                }
                let child = format!("{}.{}", path, key);
                fields.insert(key.clone(), parse_expression(item, &child, step)?);
            }
            Ok(Expression::Object(fields))
        }
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| parse_expression(item, &format!("{}[{}]", path, i), step))
            .collect::<Result<Vec<_>>>()
            .map(Expression::Array),
        scalar => Ok(Expression::Literal(scalar.clone())),
    }
}

fn parse_call(map: &Map<String, Value>, path: &str, step: usize) -> Result<FunctionCall> {
    let name = match map.get(FUNC_KEY) {
        Some(Value::String(name)) if !name.trim().is_empty() => name.clone(),
        Some(Value::String(_)) => {
            return Err(error::parse_error_at(path, "\"@func\" must not be empty"))
        }
        _ => return Err(error::parse_error_at(path, "\"@func\" must be a string")),
    };

    for key in map.keys() {
        if key != FUNC_KEY && key != ARGS_KEY {
            return Err(error::parse_error_at(
                path,
                format!(
                    "unexpected property \"{}\" in call to \"{}\", only \"@func\" and \"@args\" are allowed",
                    key, name
                ),
            ));
        }
    }

    let args = match map.get(ARGS_KEY) {
        None => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| parse_expression(item, &format!("{}.{}[{}]", path, ARGS_KEY, i), step))
            .collect::<Result<Vec<_>>>()?,
        Some(_) => {
            return Err(error::parse_error_at(
                path,
                format!("\"@args\" of \"{}\" must be an array", name),
            ))
        }
    };

    Ok(FunctionCall { name, args })
}

fn parse_ref(map: &Map<String, Value>, path: &str, step: usize) -> Result<Expression> {
    if map.len() != 1 {
        return Err(error::parse_error_at(
            path,
            "a result reference must only contain \"@ref\"",
        ));
    }
    let index = map
        .get(REF_KEY)
        .and_then(Value::as_u64)
        .ok_or_else(|| error::parse_error_at(path, "\"@ref\" must be a non-negative integer"))?
        as usize;
    if index >= step {
        return Err(error::parse_error_at(
            path,
            format!(
                "\"@ref\" {} must refer to a preceding step (less than {})",
                index, step
            ),
        ));
    }
    Ok(Expression::Ref(index))
}

// =============================================================================
// Serde - the wire format is the serialized form
// =============================================================================

impl Serialize for Program {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Program {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Program::from_value(&value).map_err(|e| de::Error::custom(e.message().to_string()))
    }
}

// =============================================================================
// Display - one line per step
// =============================================================================

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{:3} | {}", i, step)?;
        }
        Ok(())
    }
}

impl fmt::Display for FunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(v) => write!(f, "{}", v),
            Expression::Ref(index) => write!(f, "${}", index),
            Expression::Call(call) => write!(f, "{}", call),
            Expression::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Expression::Object(map) => {
                write!(f, "{{")?;
                for (i, (key, item)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", Value::String(key.clone()), item)?;
                }
                write!(f, "}}")
            }
        }
    }
}
