//! Conversion of third-party parameter descriptions into JSON Schema.
//!
//! The registry only ever stores JSON Schema. Anything else is run through a
//! [`SchemaAdapter`] first.

use agentigraph_core::{Error, Result};
use serde::Deserialize;
use serde_json::{json, Map, Value};

pub trait SchemaAdapter: Send + Sync {
    fn to_json_schema(&self, input: &Value) -> Result<Value>;
}

/// Accepts JSON Schema as-is, filling in an object root when omitted
/// (MCP servers commonly send `{"properties": {...}}` alone).
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSchemaAdapter;

impl SchemaAdapter for JsonSchemaAdapter {
    fn to_json_schema(&self, input: &Value) -> Result<Value> {
        let Value::Object(map) = input else {
            return Err(Error::ConfigError(format!("schema must be an object, got {}", input)));
        };
        let mut map = map.clone();
        map.entry("type").or_insert_with(|| json!("object"));
        if map.get("type") == Some(&json!("object")) {
            map.entry("properties").or_insert_with(|| json!({}));
        }
        Ok(Value::Object(map))
    }
}

#[derive(Deserialize)]
struct ParameterSpec {
    name: String,
    #[serde(rename = "type", default = "default_type")]
    kind: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    required: bool,
    #[serde(default, rename = "enum")]
    choices: Option<Vec<Value>>,
}

fn default_type() -> String {
    "string".into()
}

/// Flat parameter lists: `[{"name", "type", "description", "required", "enum"}]`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ParameterListAdapter;

impl SchemaAdapter for ParameterListAdapter {
    fn to_json_schema(&self, input: &Value) -> Result<Value> {
        let params: Vec<ParameterSpec> = serde_json::from_value(input.clone())
            .map_err(|e| Error::ConfigError(format!("invalid parameter list: {}", e)))?;

        let mut properties = Map::new();
        let mut required = Vec::new();
        for p in params {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(p.kind));
            if let Some(d) = p.description {
                prop.insert("description".into(), json!(d));
            }
            if let Some(choices) = p.choices {
                prop.insert("enum".into(), Value::Array(choices));
            }
            if p.required {
                required.push(json!(p.name));
            }
            properties.insert(p.name, Value::Object(prop));
        }

        Ok(json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }))
    }
}
