//! Decoder for structured model replies.
//!
//! Grammar: optional whitespace, an optional fenced block opener (```` ``` ````
//! followed by an optional language tag and a newline), exactly one JSON
//! object, the matching closing fence if an opener was present, optional
//! whitespace. Every deviation yields [`ForgeError::MalformedResponse`].

use serde_json::{Map, Value};

use crate::error::{ForgeError, Result};

const FENCE: &str = "```";

/// Decode a reply that must contain exactly one JSON object.
pub fn decode_json_object(text: &str) -> Result<Map<String, Value>> {
    let body = unwrap_fence(text.trim())?;
    if !body.starts_with('{') {
        return Err(malformed("expected a JSON object", text));
    }
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(malformed("expected a JSON object", text)),
        Err(err) => Err(malformed(&format!("invalid JSON ({err})"), text)),
    }
}

/// Return the code body of a reply, removing a single surrounding fenced block if present.
pub fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    match unwrap_fence(trimmed) {
        Ok(body) => body.to_string(),
        Err(_) => trimmed
            .strip_prefix(FENCE)
            .and_then(|rest| rest.split_once('\n'))
            .map(|(_, body)| body.trim().to_string())
            .unwrap_or_else(|| trimmed.to_string()),
    }
}

fn unwrap_fence(trimmed: &str) -> Result<&str> {
    let Some(rest) = trimmed.strip_prefix(FENCE) else {
        return Ok(trimmed);
    };
    let (tag, body) = rest
        .split_once('\n')
        .ok_or_else(|| malformed("fence opener without body", trimmed))?;
    if tag.trim().contains(char::is_whitespace) {
        return Err(malformed("invalid fence language tag", trimmed));
    }
    let body = body
        .trim_end()
        .strip_suffix(FENCE)
        .ok_or_else(|| malformed("unterminated fenced block", trimmed))?;
    Ok(body.trim())
}

fn malformed(reason: &str, text: &str) -> ForgeError {
    const PREVIEW: usize = 200;
    let preview: String = text.chars().take(PREVIEW).collect();
    ForgeError::MalformedResponse(format!("{reason}: {preview:?}"))
}
