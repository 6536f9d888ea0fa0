//! Flat key/value payload text: `{"key":"value","count":2,"ok":true}`.
//!
//! Only what the chat payloads need: one brace level, quoted strings or
//! bare number/boolean literals, quote stripping without escapes. A
//! missing key is an absent value, never a parse failure.

use crate::{ProtocolError, Result};
use serde_json::{Map, Value};

/// Decoded fields of one payload, in the order they appeared
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadFields {
    pairs: Vec<(String, String)>,
}

impl PayloadFields {
    /// Parses payload text. Text without a brace-delimited body yields no fields.
    pub fn parse(text: &str) -> Self {
        let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
            return Self::default();
        };
        if end <= start {
            return Self::default();
        }

        let pairs = split_unquoted(&text[start + 1..end], ',')
            .into_iter()
            .filter_map(|pair| {
                let (key, value) = split_once_unquoted(pair, ':')?;
                let key = strip_quotes(key);
                if key.is_empty() {
                    return None;
                }
                Some((key.to_string(), strip_quotes(value).to_string()))
            })
            .collect();

        Self { pairs }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// `true` and `1` are true; any other present value is false
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get_str(key).map(|v| v == "true" || v == "1")
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get_str(key).and_then(|v| v.parse().ok())
    }

    /// Integers written as floats (`409.0`) are truncated
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        let value = self.get_str(key)?;
        value
            .parse::<i64>()
            .ok()
            .or_else(|| value.parse::<f64>().ok().map(|f| f as i64))
    }

    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.get_str(key).ok_or_else(|| missing(key))
    }

    pub fn require_bool(&self, key: &str) -> Result<bool> {
        self.get_bool(key).ok_or_else(|| missing(key))
    }

    pub fn require_i64(&self, key: &str) -> Result<i64> {
        self.get_i64(key).ok_or_else(|| missing(key))
    }
}

/// Builds outbound payload text
#[derive(Debug, Clone, Default)]
pub struct PayloadBuilder {
    fields: Map<String, Value>,
}

impl PayloadBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_str(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields.insert(key.to_string(), Value::String(value.into()));
        self
    }

    pub fn with_i64(mut self, key: &str, value: i64) -> Self {
        self.fields.insert(key.to_string(), Value::from(value));
        self
    }

    pub fn with_bool(mut self, key: &str, value: bool) -> Self {
        self.fields.insert(key.to_string(), Value::Bool(value));
        self
    }

    pub fn build(self) -> String {
        Value::Object(self.fields).to_string()
    }
}

fn missing(key: &str) -> ProtocolError {
    ProtocolError::MissingField(key.to_string())
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    let s = s.strip_prefix('"').unwrap_or(s);
    s.strip_suffix('"').unwrap_or(s)
}

fn split_unquoted(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);

    parts
}

fn split_once_unquoted(s: &str, sep: char) -> Option<(&str, &str)> {
    let mut in_quotes = false;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => return Some((&s[..i], &s[i + c.len_utf8()..])),
            _ => {}
        }
    }
    None
}
