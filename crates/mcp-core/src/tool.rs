//! Static tool descriptions and typed access to call arguments.
//!
//! A [`ToolSpec`] enumerates the parameters a tool recognizes. It renders the JSON
//! schema advertised through `tools/list`, and [`ArgumentsExt`] reads the matching
//! values back out of a `tools/call` argument object.

use rmcp::model::{Tool, ToolAnnotations};
use serde_json::{json, Value};

use crate::handler::{ToolError, ToolResult};
use crate::protocol::JsonObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    StringArray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

impl ParamSpec {
    fn schema(&self) -> Value {
        match self.kind {
            ParamKind::String => json!({
                "type": "string",
                "description": self.description,
            }),
            ParamKind::StringArray => json!({
                "type": "array",
                "items": {"type": "string"},
                "description": self.description,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub params: &'static [ParamSpec],
    pub read_only: bool,
    pub idempotent: bool,
    pub open_world: bool,
}

impl ToolSpec {
    pub fn input_schema(&self) -> JsonObject {
        let mut properties = JsonObject::new();
        let mut required = Vec::new();
        for param in self.params {
            properties.insert(param.name.to_string(), param.schema());
            if param.required {
                required.push(Value::from(param.name));
            }
        }

        let mut schema = JsonObject::new();
        schema.insert("type".to_string(), Value::from("object"));
        schema.insert("properties".to_string(), Value::Object(properties));
        if !required.is_empty() {
            schema.insert("required".to_string(), Value::Array(required));
        }
        schema
    }

    pub fn to_tool(&self) -> Tool {
        Tool::new(self.name, self.description, self.input_schema()).annotate(ToolAnnotations {
            title: Some(self.title.to_string()),
            read_only_hint: Some(self.read_only),
            destructive_hint: Some(!self.read_only),
            idempotent_hint: Some(self.idempotent),
            open_world_hint: Some(self.open_world),
        })
    }
}

/// Typed lookups over a `tools/call` argument object.
pub trait ArgumentsExt {
    /// A string argument that must be present and non-empty.
    fn require_string(&self, name: &str) -> ToolResult<String>;

    /// An optional array of strings. Anything other than an array reads as `None`
    /// and non-string elements are skipped.
    fn optional_string_array(&self, name: &str) -> Option<Vec<String>>;
}

impl ArgumentsExt for JsonObject {
    fn require_string(&self, name: &str) -> ToolResult<String> {
        match self.get(name) {
            None | Some(Value::Null) => Err(ToolError::InvalidParameters(format!(
                "{name} is required"
            ))),
            Some(Value::String(s)) if s.is_empty() => Err(ToolError::InvalidParameters(
                format!("{name} is required"),
            )),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(_) => Err(ToolError::InvalidParameters(format!(
                "{name} must be a string"
            ))),
        }
    }

    fn optional_string_array(&self, name: &str) -> Option<Vec<String>> {
        let items = self.get(name)?.as_array()?;
        Some(
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
        )
    }
}
