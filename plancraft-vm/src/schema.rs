//! # Program Schema for LLM Code Generation
//!
//! Prompt-ready descriptions of the program grammar and of the functions a
//! program may call. The model sees both as TypeScript-style declarations
//! and answers with a JSON program.

use serde::Serialize;

/// Grammar of the JSON program object
pub const PROGRAM_GRAMMAR: &str = r#"// A program is an ordered sequence of function calls, evaluated one step at a time.
type Program = {
  "@steps": FunctionCall[];
};

// A call names a function and lists argument expressions. Arguments may nest calls and result references.
type FunctionCall = {
  "@func": string;
  "@args"?: Expression[];
};

// An expression is a JSON value, a function call, or the result of an earlier step.
type Expression = JsonValue | FunctionCall | ResultReference;

type JsonValue = string | number | boolean | null | { [key: string]: Expression } | Expression[];

// The value produced by an earlier step.
type ResultReference = {
  // Index into "@steps"; it must be lower than the index of the step that uses it
  "@ref": number;
};"#;

/// One parameter of an API function
#[derive(Debug, Clone, Serialize)]
pub struct ApiParam {
    pub name: String,
    pub ty: String,
    pub description: Option<String>,
    pub optional: bool,
}

impl ApiParam {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            description: None,
            optional: false,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// A callable function as presented to the model
#[derive(Debug, Clone, Serialize)]
pub struct ApiFunction {
    pub name: String,
    pub description: String,
    pub params: Vec<ApiParam>,
    pub returns: String,
}

impl ApiFunction {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
            returns: "unknown".into(),
        }
    }

    pub fn param(mut self, param: ApiParam) -> Self {
        self.params.push(param);
        self
    }

    pub fn returns(mut self, ty: impl Into<String>) -> Self {
        self.returns = ty.into();
        self
    }

    fn render(&self, out: &mut String) {
        for line in self.description.lines() {
            out.push_str(&format!("  // {}\n", line));
        }
        if self.params.iter().all(|p| p.description.is_none()) {
            let params: Vec<String> = self.params.iter().map(render_param).collect();
            out.push_str(&format!("  {}({}): {};\n", self.name, params.join(", "), self.returns));
            return;
        }
        out.push_str(&format!("  {}(\n", self.name));
        for param in &self.params {
            if let Some(description) = &param.description {
                out.push_str(&format!("    // {}\n", description));
            }
            out.push_str(&format!("    {},\n", render_param(param)));
        }
        out.push_str(&format!("  ): {};\n", self.returns));
    }
}

fn render_param(param: &ApiParam) -> String {
    let marker = if param.optional { "?" } else { "" };
    format!("{}{}: {}", param.name, marker, param.ty)
}

/// The API surface a program may call
#[derive(Debug, Clone, Serialize)]
pub struct ApiSchema {
    pub name: String,
    pub preamble: Vec<String>,
    pub types: Vec<String>,
    pub functions: Vec<ApiFunction>,
}

impl ApiSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            preamble: Vec::new(),
            types: Vec::new(),
            functions: Vec::new(),
        }
    }

    /// Free-form guidance rendered as a leading comment block
    pub fn with_preamble(mut self, text: impl Into<String>) -> Self {
        self.preamble.push(text.into());
        self
    }

    /// A type declaration rendered verbatim ahead of the interface
    pub fn with_type(mut self, declaration: impl Into<String>) -> Self {
        self.types.push(declaration.into());
        self
    }

    pub fn with_function(mut self, function: ApiFunction) -> Self {
        self.functions.push(function);
        self
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().map(|f| f.name.as_str())
    }

    /// Render as TypeScript-style declarations
    pub fn to_prompt(&self) -> String {
        let mut out = String::new();

        if !self.preamble.is_empty() {
            out.push_str("/*\n");
            for paragraph in &self.preamble {
                out.push_str(paragraph.trim());
                out.push('\n');
            }
            out.push_str("*/\n\n");
        }

        for declaration in &self.types {
            out.push_str(declaration.trim());
            out.push_str("\n\n");
        }

        out.push_str(&format!("export interface {} {{\n", self.name));
        for function in &self.functions {
            function.render(&mut out);
        }
        out.push('}');
        out
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// System prompt pairing the grammar with an API surface
pub fn system_prompt(api: &ApiSchema) -> String {
    format!(
        "You are a service that translates user requests into programs represented as JSON using the following TypeScript definitions:\n\
         ```\n{}\n```\n\
         The programs can call functions from the API defined in the following TypeScript definitions:\n\
         ```\n{}\n```",
        PROGRAM_GRAMMAR,
        api.to_prompt()
    )
}

/// User prompt asking for a program for `request`
pub fn request_prompt(request: &str) -> String {
    format!(
        "The following is a user request:\n\"\"\"\n{}\n\"\"\"\n\
         The following is the user request translated into a JSON program object with 2 spaces of indentation and no properties with the value undefined:\n",
        request
    )
}

/// User prompt asking to fix a rejected program
pub fn repair_prompt(reason: &str) -> String {
    format!(
        "The JSON program object is invalid for the following reason:\n\"\"\"\n{}\n\"\"\"\n\
         The following is a revised JSON program object:\n",
        reason
    )
}

/// System prompt asking for a JSON object of `type_name` described by `schema`
pub fn object_system_prompt(type_name: &str, schema: &str) -> String {
    format!(
        "You are a service that translates user requests into JSON objects of type \"{}\" according to the following TypeScript definitions:\n\
         ```\n{}\n```",
        type_name, schema
    )
}

/// User prompt asking for the `type_name` object for `request`
pub fn object_request_prompt(type_name: &str, request: &str) -> String {
    format!(
        "The following is a user request:\n\"\"\"\n{}\n\"\"\"\n\
         The following is the user request translated into a JSON object of type \"{}\" with 2 spaces of indentation and no properties with the value undefined:\n",
        request, type_name
    )
}

/// User prompt asking to fix a rejected JSON object
pub fn object_repair_prompt(reason: &str) -> String {
    format!(
        "The JSON object is invalid for the following reason:\n\"\"\"\n{}\n\"\"\"\n\
         The following is a revised JSON object:\n",
        reason
    )
}
