use std::{borrow::Cow, sync::Arc};

use serde::{Deserialize, Serialize};

use super::{Content, JsonObject};

/// A routine the server can execute on behalf of the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Unique name of the tool within its registry.
    pub name: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Cow<'static, str>>,
    /// JSON Schema for the tool's arguments. An empty object schema accepts
    /// any arguments.
    pub input_schema: Arc<JsonObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Arc<JsonObject>>,
}

impl Tool {
    pub fn new<N, D>(name: N, description: D) -> Self
    where
        N: Into<Cow<'static, str>>,
        D: Into<Cow<'static, str>>,
    {
        Tool {
            name: name.into(),
            description: Some(description.into()),
            input_schema: Arc::new(JsonObject::new()),
            output_schema: None,
        }
    }

    pub fn with_input_schema(mut self, input_schema: impl Into<Arc<JsonObject>>) -> Self {
        self.input_schema = input_schema.into();
        self
    }

    pub fn with_output_schema(mut self, output_schema: impl Into<Arc<JsonObject>>) -> Self {
        self.output_schema = Some(output_schema.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolRequestParam {
    pub name: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<JsonObject>,
}

/// Outcome of a tool call.
///
/// A failing tool is not a protocol fault: the failure is embedded here with
/// `is_error` set, and the JSON-RPC response is still a success. Only
/// transport and protocol failures surface as wire errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl CallToolResult {
    pub fn success(content: Vec<Content>) -> Self {
        CallToolResult {
            content,
            structured_content: None,
            is_error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        CallToolResult {
            content: vec![Content::text(message.into())],
            structured_content: None,
            is_error: Some(true),
        }
    }

    pub fn is_error(&self) -> bool {
        self.is_error.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_tool_serializes_camel_case() {
        let tool = Tool::new("greet", "say hi");
        let value = serde_json::to_value(&tool).unwrap();
        assert_eq!(value["name"], "greet");
        assert!(value.get("inputSchema").is_some());
        assert!(value.get("input_schema").is_none());
    }

    #[test]
    fn test_success_result_omits_is_error() {
        let result = CallToolResult::success(vec![Content::text("ok")]);
        let encoded = serde_json::to_string(&result).unwrap();
        assert!(!encoded.contains("isError"));
        assert!(!encoded.contains("null"));
        assert!(!result.is_error());
    }

    #[test]
    fn test_error_result_embeds_message() {
        let result = CallToolResult::error("mcp failure");
        assert!(result.is_error());
        assert_eq!(result.content[0].as_text(), Some("mcp failure"));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["isError"], true);
    }

    #[test]
    fn test_call_tool_request_param_decode() {
        let param: CallToolRequestParam = serde_json::from_value(json!({
            "name": "greet",
            "arguments": {"name": "user"},
        }))
        .unwrap();
        assert_eq!(param.name, "greet");
        assert_eq!(param.arguments.unwrap()["name"], "user");
    }
}
