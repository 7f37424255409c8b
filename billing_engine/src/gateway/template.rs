//! `{{token}}` substitution and response path lookup for gateway descriptors.
//!
//! Templates are plain text with placeholders. There are no conditionals or loops.
use std::collections::BTreeMap;

use serde_json::Value;

pub type TemplateVars = BTreeMap<String, String>;

/// Replaces every `{{name}}` in `input` with its value in `vars`. Unknown tokens and unterminated braces are left
/// exactly as they are.
pub fn expand_str(input: &str, vars: &TemplateVars) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let name = after[..end].trim();
                match vars.get(name) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            },
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            },
        }
    }
    out.push_str(rest);
    out
}

/// Expands placeholders in every string inside `value`, recursing into mappings and arrays.
pub fn expand_value(value: &Value, vars: &TemplateVars) -> Value {
    match value {
        Value::String(s) => Value::String(expand_str(s, vars)),
        Value::Array(items) => Value::Array(items.iter().map(|v| expand_value(v, vars)).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), expand_value(v, vars))).collect()),
        other => other.clone(),
    }
}

/// The string form used both for substitution and for values read out of responses.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Reads a dotted path out of a decoded response.
///
/// `$` returns the raw body. Each segment descends a mapping by key or an array by integer index. An empty path or any
/// missing segment gives an empty string.
pub fn lookup_path(body: &Value, raw: &str, path: &str) -> String {
    let path = path.trim();
    if path.is_empty() {
        return String::new();
    }
    if path == "$" {
        return raw.to_string();
    }
    let mut current = body;
    for segment in path.split('.') {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => return String::new(),
        }
    }
    value_to_string(current)
}
