//! Request and response types for the OpenRouter-compatible API

use serde::{Deserialize, Serialize};

/// Role of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// A chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Chat completion request body
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Raw chat completion response
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ResponseMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: usize,
    #[serde(default)]
    pub completion_tokens: usize,
}

/// Simplified completion result handed to callers
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub tokens_used: usize,
}

impl LlmResponse {
    /// Extract the first non-empty choice, if any
    pub fn from_chat_response(response: ChatResponse) -> Option<Self> {
        let tokens_used = response
            .usage
            .map(|u| u.prompt_tokens + u.completion_tokens)
            .unwrap_or(0);

        let content = response
            .choices
            .into_iter()
            .find_map(|c| c.message.content)?;

        if content.is_empty() {
            return None;
        }

        Some(Self {
            content,
            model: response.model,
            tokens_used,
        })
    }
}

/// Embedding request body
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub input: Vec<String>,
}

impl EmbeddingRequest {
    pub fn new(model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            input: vec![text.into()],
        }
    }

    pub fn batch(model: impl Into<String>, texts: Vec<String>) -> Self {
        Self {
            model: model.into(),
            input: texts,
        }
    }
}

/// Embedding response
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingResponse {
    pub model: String,
    pub data: Vec<EmbeddingData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingData {
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub index: usize,
}

/// A single embedding vector with its model
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub model: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let msg = Message::system("rules");
        assert_eq!(msg.role, Role::System);
        assert_eq!(msg.content, "rules");
        assert_eq!(Message::user("hi").role, Role::User);
        assert_eq!(Message::assistant("ok").role, Role::Assistant);
    }

    #[test]
    fn test_chat_request_serialization_skips_none() {
        let request = ChatRequest::new("test/model", vec![Message::user("hi")]);
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("temperature"));
        assert!(!json.contains("max_tokens"));

        let request = request.with_temperature(0.3).with_max_tokens(256);
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"temperature\":0.3"));
        assert!(json.contains("\"max_tokens\":256"));
    }

    #[test]
    fn test_from_chat_response() {
        let json = r#"{
            "model": "test/model",
            "choices": [{"message": {"content": "hello"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        }"#;
        let response: ChatResponse = serde_json::from_str(json).unwrap();
        let result = LlmResponse::from_chat_response(response).unwrap();

        assert_eq!(result.content, "hello");
        assert_eq!(result.tokens_used, 15);
    }

    #[test]
    fn test_from_chat_response_empty() {
        let json = r#"{"model": "m", "choices": [{"message": {"content": ""}}], "usage": null}"#;
        let response: ChatResponse = serde_json::from_str(json).unwrap();
        assert!(LlmResponse::from_chat_response(response).is_none());
    }

    #[test]
    fn test_embedding_response_parsing() {
        let json = r#"{
            "model": "openai/text-embedding-3-small",
            "data": [
                {"embedding": [0.1, 0.2], "index": 1},
                {"embedding": [0.3, 0.4], "index": 0}
            ]
        }"#;
        let response: EmbeddingResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.data.len(), 2);
        assert_eq!(response.data[0].index, 1);
    }
}
