//! Action extraction from raw model output.
//!
//! Agents rarely answer with bare JSON; they prose-wrap it ("I'll raise.
//! `{"action":"raise","amount":10}` — it's the right move."). The parser
//! scans left-to-right for balanced-brace candidates and returns the first
//! one that both decodes and validates against the event's action schema,
//! which preserves intent without privileging trailing or malformed
//! objects.

use anyhow::{anyhow, Result};
use jsonschema::JSONSchema;
use serde_json::Value;

use crate::sanitize::detect_injection;

#[derive(Debug, Clone)]
pub struct ParseResult {
    pub success: bool,
    pub action: Option<Value>,
    pub raw_json: Option<String>,
    pub error: Option<String>,
    pub injection_detected: bool,
}

/// A compiled per-event action schema.
pub struct ActionValidator {
    schema: JSONSchema,
}

impl ActionValidator {
    pub fn new(schema: &Value) -> Result<Self> {
        let schema = JSONSchema::compile(schema).map_err(|e| anyhow!("invalid action schema: {}", e))?;
        Ok(Self { schema })
    }

    pub fn parse(&self, text: &str) -> ParseResult {
        let injection_detected = detect_injection(text);
        let mut last_error: Option<String> = None;
        for cand in candidates(text) {
            let value: Value = match serde_json::from_str(cand) {
                Ok(v) => v,
                Err(e) => {
                    last_error = Some(format!("invalid JSON: {}", e));
                    continue;
                }
            };
            if !value.is_object() {
                last_error = Some("candidate is not a JSON object".to_string());
                continue;
            }
            if let Err(mut errors) = self.schema.validate(&value) {
                let msg = errors
                    .next()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "schema validation failed".to_string());
                last_error = Some(format!("schema violation: {}", msg));
                continue;
            }
            return ParseResult {
                success: true,
                action: Some(value),
                raw_json: Some(cand.to_string()),
                error: None,
                injection_detected,
            };
        }
        ParseResult {
            success: false,
            action: None,
            raw_json: None,
            error: Some(last_error.unwrap_or_else(|| "no JSON object found in response".to_string())),
            injection_detected,
        }
    }
}

/// Non-overlapping balanced-brace spans, left to right.
fn candidates(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = scan_object(bytes, i) {
                out.push(&text[i..=end]);
                i = end + 1;
                continue;
            }
        }
        i += 1;
    }
    out
}

/// Walk a candidate object starting at `start`, string- and escape-aware,
/// permitting one nested object level. Returns the closing-brace index, or
/// None when unbalanced or nested deeper than that.
fn scan_object(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => {
                depth += 1;
                if depth > 2 {
                    return None;
                }
            }
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
