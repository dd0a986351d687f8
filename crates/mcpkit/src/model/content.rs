use serde::{Deserialize, Serialize};

use super::ResourceContents;

/// One piece of content in a tool result, prompt message, or sampling
/// message, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Content {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    #[serde(rename_all = "camelCase")]
    Image { data: String, mime_type: String },
    #[serde(rename = "audio")]
    #[serde(rename_all = "camelCase")]
    Audio { data: String, mime_type: String },
    #[serde(rename = "resource")]
    Resource { resource: ResourceContents },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }

    pub fn image(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Content::Image {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn resource(resource: ResourceContents) -> Self {
        Content::Resource { resource }
    }

    /// The text payload, if this is text content.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text { text } => Some(text),
            _ => None,
        }
    }
}

impl Default for Content {
    fn default() -> Self {
        Content::Text {
            text: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_text_content_serialization() {
        let content = Content::text("hi user");
        let value = serde_json::to_value(&content).unwrap();
        assert_eq!(value, json!({"type": "text", "text": "hi user"}));
    }

    #[test]
    fn test_image_content_uses_camel_case() {
        let content = Content::image("aGk=", "image/png");
        let value = serde_json::to_value(&content).unwrap();
        assert_eq!(value["type"], "image");
        assert_eq!(value["mimeType"], "image/png");
    }

    #[test]
    fn test_content_roundtrip() {
        let decoded: Content =
            serde_json::from_value(json!({"type": "text", "text": "hello"})).unwrap();
        assert_eq!(decoded.as_text(), Some("hello"));
    }
}
