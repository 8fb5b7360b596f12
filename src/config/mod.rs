pub mod schema;

use crate::error::{DeckError, Result};
use serde_json::{Map, Value};
use std::io::Read;
use std::path::PathBuf;

/// Default configuration file name inside the `hamradio` config directory.
pub const DEFAULT_FILENAME: &str = "hamdeck.json";

/// Resolve the default configuration path (`~/.config/hamradio/hamdeck.json`).
///
/// # Errors
/// Returns `DeckError::Config` if the user's config directory cannot be determined.
pub fn default_path() -> Result<PathBuf> {
    let dir = dirs::config_dir()
        .ok_or_else(|| DeckError::Config("cannot resolve configuration directory".into()))?;
    Ok(dir.join("hamradio").join(DEFAULT_FILENAME))
}

/// Read a configuration document and return its effective root record.
///
/// # Errors
/// Returns `DeckError::Io` on read errors, `DeckError::Json` on syntax errors,
/// or `DeckError::Config` if the root is not a record.
pub fn read_document<R: Read>(mut reader: R) -> Result<Map<String, Value>> {
    let mut content = String::new();
    reader.read_to_string(&mut content)?;
    let content = expand_env_vars(&content);

    match serde_json::from_str::<Value>(&content)? {
        Value::Object(root) => Ok(effective_root(root)),
        other => Err(DeckError::Config(format!(
            "configuration is of wrong type: {}",
            type_name(&other)
        ))),
    }
}

/// Counts of a configuration document, reported by `--check`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub connections: usize,
    pub pages: usize,
    pub buttons: usize,
}

/// Check the structure of a configuration document without creating buttons.
///
/// # Errors
/// Returns the errors of `read_document`, or `DeckError::Config` if a page is
/// not a record or has no buttons list.
pub fn summarize<R: Read>(reader: R) -> Result<Summary> {
    let root = read_document(reader)?;
    let mut summary = Summary {
        connections: match root.get(schema::CONNECTIONS) {
            Some(Value::Object(connections)) => connections.len(),
            _ => 0,
        },
        ..Summary::default()
    };

    if let Some(Value::Object(pages)) = root.get(schema::PAGES) {
        for (id, page) in pages {
            match page.get(schema::BUTTONS) {
                Some(Value::Array(buttons)) => {
                    summary.pages += 1;
                    summary.buttons += buttons.len();
                }
                _ => return Err(DeckError::Config(format!("page {id} has no buttons defined"))),
            }
        }
    }
    if let Some(Value::Array(buttons)) = root.get(schema::BUTTONS) {
        summary.pages += 1;
        summary.buttons += buttons.len();
    }
    Ok(summary)
}

/// The document may nest everything one level below the `hamdeck` key.
fn effective_root(mut root: Map<String, Value>) -> Map<String, Value> {
    match root.remove(schema::MAIN_KEY) {
        Some(Value::Object(nested)) => nested,
        Some(other) => {
            root.insert(schema::MAIN_KEY.to_string(), other);
            root
        }
        None => root,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Expand `${VAR}` and `$VAR` patterns in the config string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' {
            if chars.peek() == Some(&'{') {
                chars.next();
                let var_name: String = chars.by_ref().take_while(|&c| c != '}').collect();
                if let Ok(val) = std::env::var(&var_name) {
                    result.push_str(&val);
                } else {
                    use std::fmt::Write;
                    let _ = write!(result, "${{{var_name}}}");
                }
            } else {
                let mut var_name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        var_name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if var_name.is_empty() {
                    result.push('$');
                } else if let Ok(val) = std::env::var(&var_name) {
                    result.push_str(&val);
                } else {
                    result.push('$');
                    result.push_str(&var_name);
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}

// --- Loose coercions ---

pub fn to_int(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn to_float(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn to_bool(raw: &Value) -> Option<bool> {
    match raw {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => Some(s.eq_ignore_ascii_case("true")),
        _ => None,
    }
}

pub fn to_string(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn to_string_array(raw: &Value) -> Option<Vec<String>> {
    match raw {
        Value::Array(values) => values.iter().map(to_string).collect(),
        _ => None,
    }
}
