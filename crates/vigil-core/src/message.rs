use serde::{Deserialize, Serialize};

/// A message exchanged with a moderation model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<MessageContent>,
}

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single content block within a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
    },
    Image {
        /// Base64-encoded image data.
        data: String,
        media_type: String,
    },
}

impl Message {
    /// Create a simple text message.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![MessageContent::Text { text: text.into() }],
        }
    }

    /// Attach a base64 image block after the existing content.
    pub fn with_image(mut self, data: impl Into<String>, media_type: impl Into<String>) -> Self {
        self.content.push(MessageContent::Image {
            data: data.into(),
            media_type: media_type.into(),
        });
        self
    }

    /// Extract all text content joined together.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                MessageContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Image blocks carried by this message.
    pub fn images(&self) -> impl Iterator<Item = (&str, &str)> {
        self.content.iter().filter_map(|c| match c {
            MessageContent::Image { data, media_type } => Some((data.as_str(), media_type.as_str())),
            _ => None,
        })
    }
}
