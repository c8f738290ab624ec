//! Tool-call argument parsing with best-effort repair of sloppy model JSON.

use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::OnceLock;

/// Key under which unparseable argument text is handed to the tool verbatim.
pub const RAW_ARGUMENTS_KEY: &str = "__raw_arguments";

#[derive(Clone, Debug, PartialEq)]
pub enum ParsedArguments {
    Valid(Value),
    Repaired(Value),
    /// `{"__raw_arguments": "<original text>"}`
    Raw(Value),
}

impl ParsedArguments {
    pub fn value(&self) -> &Value {
        match self {
            Self::Valid(v) | Self::Repaired(v) | Self::Raw(v) => v,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Self::Valid(v) | Self::Repaired(v) | Self::Raw(v) => v,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Raw(_))
    }
}

pub fn parse_tool_arguments(raw: &str) -> ParsedArguments {
    let trimmed = strip_fences(raw.trim());
    if trimmed.is_empty() {
        return ParsedArguments::Valid(Value::Object(Map::new()));
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(v @ Value::Object(_)) => return ParsedArguments::Valid(v),
        Ok(_) => return raw_sentinel(raw),
        Err(_) => {}
    }
    match repair_json(trimmed) {
        Some(v) => {
            tracing::debug!("repaired malformed tool arguments");
            ParsedArguments::Repaired(v)
        }
        None => {
            tracing::warn!(len = raw.len(), "tool arguments unparseable, passing raw");
            raw_sentinel(raw)
        }
    }
}

fn raw_sentinel(raw: &str) -> ParsedArguments {
    ParsedArguments::Raw(json!({ RAW_ARGUMENTS_KEY: raw }))
}

fn strip_fences(s: &str) -> &str {
    let Some(body) = s.strip_prefix("```") else {
        return s;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn unquoted_keys() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:"#).expect("static regex"))
}

fn trailing_commas() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#",\s*([}\]])"#).expect("static regex"))
}

/// Fix the common slips: single quotes, bare keys, trailing commas,
/// unclosed braces. Returns `None` unless the result is a JSON object.
pub fn repair_json(raw: &str) -> Option<Value> {
    let mut s = raw.trim().to_string();
    if !s.contains('"') {
        s = s.replace('\'', "\"");
    }
    s = unquoted_keys().replace_all(&s, r#"$1"$2":"#).into_owned();
    s = trailing_commas().replace_all(&s, "$1").into_owned();

    let opens = s.matches('{').count();
    let closes = s.matches('}').count();
    if opens > closes {
        s.push_str(&"}".repeat(opens - closes));
    }

    match serde_json::from_str::<Value>(&s) {
        Ok(v @ Value::Object(_)) => Some(v),
        _ => None,
    }
}
