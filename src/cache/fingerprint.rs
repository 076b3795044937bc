//! Deterministic content-addressed request fingerprinting.
//!
//! A fingerprint is the SHA-256 hex digest of a canonical JSON form of a
//! [`NormalizedRequest`]. `serde_json`'s default `Map` is a `BTreeMap`
//! (this crate does not enable the `preserve_order` feature), so object
//! keys inside `parameters` are already sorted on serialization; combined
//! with the fixed field order of our own structs and the explicit sort of
//! `tools` below, `to_vec` is canonical without extra normalization.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::providers::ToolDefinition;
use crate::session::{Message, Role};

/// The subset of a request that determines cache identity. `max_tokens`,
/// API keys, base URL, provider, retry settings, the streaming flag, and
/// any timestamp are deliberately excluded — identical prompts should
/// share a cached response regardless of how long a completion was
/// requested to be.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRequest {
    pub system_prompt: String,
    pub messages: Vec<NormalizedMessage>,
    pub tools: Vec<NormalizedTool>,
    pub temperature: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTool {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl NormalizedRequest {
    pub fn new(
        system_prompt: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
        temperature: f64,
    ) -> Self {
        let messages = messages
            .iter()
            .map(|m| NormalizedMessage {
                role: m.role,
                content: m.content.trim().to_string(),
                tool_id: m.tool_call_id.clone(),
            })
            .collect();

        let mut tools: Vec<NormalizedTool> = tools
            .iter()
            .map(|t| NormalizedTool {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            })
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));

        Self {
            system_prompt: system_prompt.trim().to_string(),
            messages,
            tools,
            temperature,
        }
    }

    /// Build a `NormalizedRequest` the way the decorator sees a call: a
    /// single flat `messages` vector where the system prompt, if any, is
    /// carried as one or more `Role::System` entries rather than a separate
    /// argument (matching how `LLMProvider::chat` and the provider wire
    /// builders already consume it).
    pub fn from_messages(messages: &[Message], tools: &[ToolDefinition], temperature: f64) -> Self {
        let system_prompt = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.trim())
            .collect::<Vec<_>>()
            .join("\n");
        let conversation: Vec<Message> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .cloned()
            .collect();
        Self::new(&system_prompt, &conversation, tools, temperature)
    }
}

/// Derive a 64-character lowercase hex fingerprint of `request`.
///
/// Fails only if serialization fails, which cannot happen for a value this
/// shape produces from well-formed UTF-8 strings and a `serde_json::Value`
/// that originated from prior JSON parsing — callers treat an error as
/// "bypass cache" (§7 fail-open policy) rather than a hard failure.
pub fn derive(request: &NormalizedRequest) -> Result<String, serde_json::Error> {
    let canonical = serde_json::to_vec(request)?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ToolDefinition;
    use crate::session::Message;

    fn fp(req: &NormalizedRequest) -> String {
        derive(req).unwrap()
    }

    #[test]
    fn whitespace_in_system_prompt_does_not_change_fingerprint() {
        let a = NormalizedRequest::new("you are helpful", &[Message::user("hi")], &[], 0.0);
        let b = NormalizedRequest::new(" you are helpful ", &[Message::user("hi")], &[], 0.0);
        assert_eq!(fp(&a), fp(&b));
    }

    #[test]
    fn max_tokens_is_not_part_of_the_request_shape() {
        // NormalizedRequest has no max_tokens field at all, so two call
        // sites that only differ there always normalize identically.
        let a = NormalizedRequest::new("sys", &[Message::user("hi")], &[], 0.2);
        let b = NormalizedRequest::new("sys", &[Message::user("hi")], &[], 0.2);
        assert_eq!(fp(&a), fp(&b));
    }

    #[test]
    fn message_order_is_significant() {
        let a = NormalizedRequest::new(
            "sys",
            &[Message::user("A"), Message::user("B")],
            &[],
            0.0,
        );
        let b = NormalizedRequest::new(
            "sys",
            &[Message::user("B"), Message::user("A")],
            &[],
            0.0,
        );
        assert_ne!(fp(&a), fp(&b));
    }

    #[test]
    fn tool_order_is_not_significant() {
        let a = NormalizedRequest::new(
            "sys",
            &[Message::user("hi")],
            &[
                ToolDefinition::new("a", "first", serde_json::json!({})),
                ToolDefinition::new("b", "second", serde_json::json!({})),
            ],
            0.0,
        );
        let b = NormalizedRequest::new(
            "sys",
            &[Message::user("hi")],
            &[
                ToolDefinition::new("b", "second", serde_json::json!({})),
                ToolDefinition::new("a", "first", serde_json::json!({})),
            ],
            0.0,
        );
        assert_eq!(fp(&a), fp(&b));
    }

    #[test]
    fn temperature_change_is_significant() {
        let a = NormalizedRequest::new("sys", &[Message::user("hi")], &[], 0.0);
        let b = NormalizedRequest::new("sys", &[Message::user("hi")], &[], 0.7);
        assert_ne!(fp(&a), fp(&b));
    }

    #[test]
    fn fingerprint_is_64_char_lowercase_hex() {
        let req = NormalizedRequest::new("sys", &[Message::user("hi")], &[], 0.0);
        let digest = fp(&req);
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
