//! Request building: one page → one chat request, one document → one optimizer request.
//!
//! The wire types serialise to the OpenAI `chat/completions` body. The same
//! [`ChatRequest`] value is handed to every [`super::llm::ModelClient`]
//! implementation; non-OpenAI backends translate it.

use crate::config::ConversionConfig;
use crate::prompts::{optimization_user_message, OPTIMIZER_SYSTEM_PROMPT};
use serde::{Deserialize, Serialize};

/// Instruction text and encoded image for one page.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub instructions: String,
    pub image_data_uri: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// One block of a multi-part user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Concatenated text blocks of this message.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Image URLs attached to this message, in order.
    pub fn image_urls(&self) -> Vec<&str> {
        match &self.content {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::ImageUrl { image_url } => Some(image_url.url.as_str()),
                    ContentPart::Text { .. } => None,
                })
                .collect(),
        }
    }
}

/// A complete `chat/completions` request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub temperature: Option<f32>,
}

impl ChatRequest {
    /// True when the request carries a system message (the optimizer does).
    pub fn has_system_message(&self) -> bool {
        self.messages.iter().any(|m| m.role == Role::System)
    }
}

/// Build the extraction payload: one user message, instructions then image.
pub fn build_extraction_request(req: &ExtractionRequest, config: &ConversionConfig) -> ChatRequest {
    let content = vec![
        ContentPart::Text {
            text: req.instructions.clone(),
        },
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: req.image_data_uri.clone(),
            },
        },
    ];

    ChatRequest {
        model: config.model.clone(),
        messages: vec![Message {
            role: Role::User,
            content: MessageContent::Parts(content),
        }],
        max_tokens: config.max_tokens,
        temperature: config.temperature,
    }
}

/// Build the optimizer payload for one aggregated document.
pub fn build_optimization_request(aggregated: &str, config: &ConversionConfig) -> ChatRequest {
    ChatRequest {
        model: config.model.clone(),
        messages: vec![
            Message::system(OPTIMIZER_SYSTEM_PROMPT),
            Message::user(optimization_user_message(&config.optimizer_prompt, aggregated)),
        ],
        max_tokens: config.max_tokens,
        temperature: config.temperature,
    }
}
