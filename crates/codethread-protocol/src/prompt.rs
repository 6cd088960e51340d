//! Request/response bodies for session creation and prompting.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A session on the agent server. The server returns more metadata than
/// this; the relay only ever needs the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Model selection forwarded with every prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSelector {
    #[serde(rename = "providerID")]
    pub provider_id: String,

    #[serde(rename = "modelID")]
    pub model_id: String,
}

/// One input part of a prompt. Only text parts are sent today.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptPart {
    #[serde(rename = "type")]
    pub part_type: String,
    pub text: String,
}

impl PromptPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            part_type: "text".to_string(),
            text: text.into(),
        }
    }
}

/// Body of `POST /session/{id}/message`.
///
/// `tools` selectively enables/disables tools for this one turn; absent
/// means the server default. The summarizer flow uses it to keep the agent
/// from editing files while drafting a commit message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptRequest {
    pub parts: Vec<PromptPart>,
    pub model: ModelSelector,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<HashMap<String, bool>>,
}

/// Response to a prompt: the assistant message broken into parts. The
/// surrounding `info` metadata is ignored.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PromptResponse {
    #[serde(default)]
    pub parts: Vec<crate::parts::MessagePart>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prompt_request_uses_wire_field_names() {
        let request = PromptRequest {
            parts: vec![PromptPart::text("hello")],
            model: ModelSelector {
                provider_id: "anthropic".to_string(),
                model_id: "claude-sonnet-4".to_string(),
            },
            tools: Some(HashMap::from([("write".to_string(), false)])),
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["parts"][0]["type"], "text");
        assert_eq!(value["model"]["providerID"], "anthropic");
        assert_eq!(value["model"]["modelID"], "claude-sonnet-4");
        assert_eq!(value["tools"]["write"], false);
    }

    #[test]
    fn tools_field_is_omitted_when_absent() {
        let request = PromptRequest {
            parts: vec![PromptPart::text("hi")],
            model: ModelSelector {
                provider_id: "p".to_string(),
                model_id: "m".to_string(),
            },
            tools: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("tools").is_none());
    }

    #[test]
    fn prompt_response_tolerates_extra_metadata() {
        let response: PromptResponse = serde_json::from_value(json!({
            "info": { "id": "msg_1", "cost": 0.1 },
            "parts": [ { "type": "text", "text": "feat(core): add thing" } ]
        }))
        .unwrap();
        assert_eq!(response.parts.len(), 1);
        assert_eq!(response.parts[0].text.as_deref(), Some("feat(core): add thing"));
    }
}
