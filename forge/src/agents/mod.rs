//! Agents: one generation call each, with output validation.
//!
//! Every agent renders its prompt, calls a [`Generator`], and checks the reply
//! before handing back a typed value together with the tokens it cost.
//! Structured replies go through [`decode_json_object`], then a JSON Schema,
//! then serde. Code replies go through [`strip_code_fence`].

use jsonschema::validator_for;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::decode::{decode_json_object, strip_code_fence};
use crate::core::provider::RequestProfile;
use crate::core::types::Generated;
use crate::error::{ForgeError, Result};
use crate::io::dispatcher::Generator;

pub mod architect;
pub mod expounder;
pub mod finalizer;
pub mod fixer;
pub mod planner;
pub mod router;
pub mod splitter;
pub mod unit;

/// Call the generator and decode a schema-checked JSON record.
pub(crate) async fn generate_record<G, T>(
    generator: &G,
    prompt: &str,
    profile: &RequestProfile,
    schema: &str,
) -> Result<Generated<T>>
where
    G: Generator + ?Sized,
    T: DeserializeOwned,
{
    let reply = generator.generate(prompt, profile).await?;
    let value = Value::Object(decode_json_object(&reply.text)?);
    validate_schema(schema, &value)?;
    let record = serde_json::from_value(value)
        .map_err(|err| ForgeError::Validation(format!("record does not match its shape: {err}")))?;
    Ok(Generated {
        value: record,
        usage: reply.usage,
    })
}

/// Call the generator and return the code body of its reply.
pub(crate) async fn generate_code<G>(
    generator: &G,
    prompt: &str,
    profile: &RequestProfile,
) -> Result<Generated<String>>
where
    G: Generator + ?Sized,
{
    let reply = generator.generate(prompt, profile).await?;
    let body = strip_code_fence(&reply.text);
    if body.is_empty() {
        return Err(ForgeError::MalformedResponse(
            "reply contained no code".to_string(),
        ));
    }
    Ok(Generated {
        value: body,
        usage: reply.usage,
    })
}

fn validate_schema(schema: &str, value: &Value) -> Result<()> {
    let schema_value: Value = serde_json::from_str(schema)
        .map_err(|err| ForgeError::Validation(format!("invalid output schema: {err}")))?;
    let compiled = validator_for(&schema_value)
        .map_err(|err| ForgeError::Validation(format!("invalid output schema: {err}")))?;
    let messages: Vec<String> = compiled.iter_errors(value).map(|err| err.to_string()).collect();
    if messages.is_empty() {
        return Ok(());
    }
    Err(ForgeError::Validation(format!(
        "output schema validation failed: {}",
        messages.join("; ")
    )))
}
