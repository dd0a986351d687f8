use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use super::{Content, JsonObject, Role};

/// A reusable message template the server offers to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    /// Unique name of the prompt within its registry.
    pub name: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Cow<'static, str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<PromptArgument>>,
}

impl Prompt {
    pub fn new<N>(name: N) -> Self
    where
        N: Into<Cow<'static, str>>,
    {
        Prompt {
            name: name.into(),
            description: None,
            arguments: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_arguments(mut self, arguments: Vec<PromptArgument>) -> Self {
        self.arguments = Some(arguments);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptArgument {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
}

impl PromptArgument {
    pub fn required(name: impl Into<String>) -> Self {
        PromptArgument {
            name: name.into(),
            description: None,
            required: Some(true),
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        PromptArgument {
            name: name.into(),
            description: None,
            required: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptMessage {
    pub role: Role,
    pub content: Content,
}

impl PromptMessage {
    pub fn new_text(role: Role, text: impl Into<String>) -> Self {
        PromptMessage {
            role,
            content: Content::text(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPromptRequestParam {
    pub name: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<JsonObject>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPromptResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub messages: Vec<PromptMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPromptsResult {
    pub prompts: Vec<Prompt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_builder() {
        let prompt = Prompt::new("code_review")
            .with_description("do a code review")
            .with_arguments(vec![PromptArgument::required("Code")]);
        assert_eq!(prompt.name, "code_review");
        assert_eq!(
            prompt.arguments.as_ref().unwrap()[0].required,
            Some(true)
        );
    }

    #[test]
    fn test_prompt_message_serialization() {
        let message = PromptMessage::new_text(Role::User, "review this");
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["role"], "user");
        assert_eq!(value["content"]["text"], "review this");
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let prompt = Prompt::new("bare");
        let encoded = serde_json::to_string(&prompt).unwrap();
        assert!(!encoded.contains("null"));
        assert!(!encoded.contains("arguments"));
    }
}
