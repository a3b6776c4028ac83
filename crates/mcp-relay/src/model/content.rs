//! Content blocks carried inside tool results.
use serde::{Deserialize, Serialize};

use crate::model::ErrorData;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextContent {
    pub text: String,
}

/// A binary payload, carried base64 encoded with its mime type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageContent {
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text(TextContent),
    Image(ImageContent),
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text(TextContent { text: text.into() })
    }

    pub fn image(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Content::Image(ImageContent {
            data: data.into(),
            mime_type: mime_type.into(),
        })
    }

    /// Render a serializable value as a json text block.
    pub fn json(value: impl Serialize) -> Result<Self, ErrorData> {
        let text = serde_json::to_string(&value).map_err(|e| {
            ErrorData::internal_error(format!("failed to serialize content: {e}"), None)
        })?;
        Ok(Content::text(text))
    }

    pub fn as_text(&self) -> Option<&TextContent> {
        match self {
            Content::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_image(&self) -> Option<&ImageContent> {
        match self {
            Content::Image(image) => Some(image),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_content_tagging() {
        let content = Content::text("hello");
        let json = serde_json::to_string(&content).unwrap();
        assert!(json.contains("\"type\":\"text\""));
        assert!(json.contains("\"text\":\"hello\""));
    }

    #[test]
    fn test_image_content_uses_camel_case() {
        let content = Content::image("aGVsbG8=", "image/png");
        let json = serde_json::to_string(&content).unwrap();
        assert!(json.contains("\"type\":\"image\""));
        assert!(json.contains("\"mimeType\":\"image/png\""));
        assert!(!json.contains("mime_type"));
    }

    #[test]
    fn test_content_round_trip() {
        let content = Content::image("aGVsbG8=", "image/png");
        let json = serde_json::to_string(&content).unwrap();
        let parsed: Content = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, content);
        assert_eq!(parsed.as_image().unwrap().mime_type, "image/png");
        assert!(parsed.as_text().is_none());
    }

    #[test]
    fn test_json_content_helper() {
        let content = Content::json(serde_json::json!({"ok": true})).unwrap();
        let text = content.as_text().unwrap();
        assert_eq!(text.text, r#"{"ok":true}"#);
    }
}
