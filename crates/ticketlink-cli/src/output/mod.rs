//! Command output.
//!
//! Every command serializes its result once and renders it either as pretty
//! JSON or as compact `key:value` text, one record per line.

use std::io::{self, Write};

use anyhow::Result;
use serde::Serialize;
use serde_json::{Map, Value};

/// Fields rendered bare, ahead of the rest, in text mode.
const LEADING_KEYS: [&str; 2] = ["repo_id", "id"];

/// How results are written to stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Pretty-printed JSON for scripts
    Json,
    /// Compact `key:value` lines
    #[default]
    Text,
}

/// Renders serializable results in the selected [`OutputFormat`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Formatter {
    format: OutputFormat,
}

impl Formatter {
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    #[must_use]
    pub const fn is_json(self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Render `data` to a string.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` cannot be serialized.
    pub fn format<T: Serialize>(self, data: &T) -> Result<String> {
        let value = serde_json::to_value(data)?;
        if self.is_json() {
            return Ok(serde_json::to_string_pretty(&value)?);
        }
        Ok(render_text(&value))
    }

    /// Render `data` and write it to stdout.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn print<T: Serialize>(self, data: &T) -> Result<()> {
        print_line(&self.format(data)?)
    }

    /// Write a collection.
    ///
    /// JSON output is an object holding the items under `collection` plus a
    /// `count`. Text output prints `empty_message` when there is nothing to show.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn print_list<T: Serialize>(
        self,
        items: &[T],
        empty_message: &str,
        collection: &str,
    ) -> Result<()> {
        if self.is_json() {
            let mut body = Map::new();
            body.insert(collection.to_string(), serde_json::to_value(items)?);
            body.insert("count".to_string(), Value::from(items.len()));
            return self.print(&body);
        }
        if items.is_empty() {
            return print_line(empty_message);
        }
        self.print(&items)
    }
}

/// Write `line` plus a newline to stdout.
///
/// # Errors
///
/// Returns an error if stdout is closed.
pub fn print_line(line: &str) -> Result<()> {
    writeln!(io::stdout().lock(), "{line}")?;
    Ok(())
}

fn render_text(value: &Value) -> String {
    match value {
        Value::Array(items) => items
            .iter()
            .map(render_text)
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(fields) => render_record(fields),
        other => render_scalar(other),
    }
}

fn render_record(fields: &Map<String, Value>) -> String {
    let leading = LEADING_KEYS
        .iter()
        .filter_map(|key| fields.get(*key))
        .map(render_scalar);
    let rest = fields
        .iter()
        .filter(|(key, _)| !LEADING_KEYS.contains(&key.as_str()))
        .filter(|(_, val)| !is_blank(val))
        .map(|(key, val)| format!("{key}:{}", render_scalar(val)));
    leading.chain(rest).collect::<Vec<_>>().join("  ")
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) if s.contains([' ', '\n']) => {
            format!("\"{}\"", s.replace('\n', "\\n"))
        }
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(render_scalar).collect();
            format!("[{}]", inner.join(","))
        }
        Value::Object(fields) => {
            let inner: Vec<String> = fields
                .iter()
                .filter(|(_, val)| !val.is_null())
                .map(|(key, val)| format!("{key}:{}", render_scalar(val)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize)]
    struct Report {
        repo_id: i64,
        inserted: usize,
        note: Option<String>,
        name: String,
    }

    fn sample() -> Report {
        Report {
            repo_id: 7,
            inserted: 3,
            note: None,
            name: "alice/proj".to_string(),
        }
    }

    #[test]
    fn test_json_output_is_valid() {
        let output = Formatter::new(OutputFormat::Json)
            .format(&sample())
            .expect("JSON formatting failed");
        let parsed: Value = serde_json::from_str(&output).expect("valid JSON");
        assert_eq!(parsed["repo_id"], 7);
        assert_eq!(parsed["inserted"], 3);
    }

    #[test]
    fn test_text_output_puts_id_first_and_skips_nulls() {
        let output = Formatter::default().format(&sample()).expect("text");
        assert!(output.starts_with("7  "), "unexpected: {output}");
        assert!(output.contains("inserted:3"));
        assert!(output.contains("name:alice/proj"));
        assert!(!output.contains("note"));
    }

    #[test]
    fn test_text_quotes_strings_with_spaces() {
        let value = serde_json::json!({ "summary": "fix the bug\nproperly" });
        assert_eq!(render_text(&value), "summary:\"fix the bug\\nproperly\"");
    }

    #[test]
    fn test_text_renders_one_line_per_array_item() {
        let output = Formatter::default()
            .format(&vec![sample(), sample()])
            .expect("text");
        assert_eq!(output.lines().count(), 2);
    }

    #[test]
    fn test_empty_collection() {
        let items: Vec<String> = Vec::new();
        let json = Formatter::new(OutputFormat::Json)
            .format(&items)
            .expect("json");
        assert_eq!(json.trim(), "[]");
        assert!(Formatter::default().format(&items).expect("text").is_empty());
    }
}
