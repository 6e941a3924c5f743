use serde::{Deserialize, Serialize};

/// A single message in a chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, content: text.into() }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A tool schema offered to the model for function calling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: serde_json::Value,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Opaque identifier returned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// JSON-encoded argument object, exactly as emitted by the model.
    pub arguments: String,
}

impl ToolCallRequest {
    /// Parse the argument string into a JSON object.  Malformed arguments
    /// degrade to an empty object so routing can still report the tool.
    pub fn parsed_arguments(&self) -> serde_json::Map<String, serde_json::Value> {
        serde_json::from_str::<serde_json::Value>(&self.arguments)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default()
    }
}

/// One non-streaming chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    /// Sampling temperature override; `None` uses the configured default.
    pub temperature: Option<f32>,
    /// Completion token cap override; `None` uses the configured default.
    pub max_tokens: Option<u32>,
    /// Request `response_format: json_object` so the model must emit JSON.
    pub json_mode: bool,
}

impl ChatRequest {
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages, ..Default::default() }
    }
}

/// The model's reply: assistant text, tool calls, or both.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ChatResponse {
    pub fn text(reply: impl Into<String>) -> Self {
        Self { content: Some(reply.into()), tool_calls: Vec::new() }
    }

    pub fn tool_call(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            content: None,
            tool_calls: vec![ToolCallRequest {
                id: "call-0".into(),
                name: name.into(),
                arguments: arguments.into(),
            }],
        }
    }

    /// Assistant text, or the empty string when the model only called tools.
    pub fn text_or_empty(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    pub fn first_tool_call(&self) -> Option<&ToolCallRequest> {
        self.tool_calls.first()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_roles() {
        assert_eq!(Message::system("s").role, Role::System);
        assert_eq!(Message::user("u").role, Role::User);
        assert_eq!(Message::assistant("a").role, Role::Assistant);
    }

    #[test]
    fn role_serialises_lowercase() {
        let m = Message::user("hi");
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"role\":\"user\""));
    }

    #[test]
    fn parsed_arguments_returns_object() {
        let call = ToolCallRequest {
            id: "1".into(),
            name: "web_search".into(),
            arguments: r#"{"query":"weather"}"#.into(),
        };
        let args = call.parsed_arguments();
        assert_eq!(args.get("query").and_then(|v| v.as_str()), Some("weather"));
    }

    #[test]
    fn parsed_arguments_degrades_on_garbage() {
        let call = ToolCallRequest {
            id: "1".into(),
            name: "t".into(),
            arguments: "not json".into(),
        };
        assert!(call.parsed_arguments().is_empty());
    }

    #[test]
    fn response_helpers() {
        let r = ChatResponse::text("hello");
        assert_eq!(r.text_or_empty(), "hello");
        assert!(r.first_tool_call().is_none());

        let r = ChatResponse::tool_call("t", "{}");
        assert_eq!(r.text_or_empty(), "");
        assert_eq!(r.first_tool_call().unwrap().name, "t");
    }
}
