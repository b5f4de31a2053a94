use serde::{Deserialize, Serialize};

use super::{ProviderAdapter, malformed};
use crate::consts::DEFAULT_OPENAI_MODEL;
use crate::error::ProviderError;

/// OpenAI chat completions.
pub struct OpenAi {
    model: String,
}

impl OpenAi {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    pub fn default_model() -> String {
        DEFAULT_OPENAI_MODEL.to_string()
    }
}

impl ProviderAdapter for OpenAi {
    fn source(&self) -> &str {
        "OpenAI"
    }

    fn encode(&self, prompt: &str) -> Result<Vec<u8>, ProviderError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };
        serde_json::to_vec(&request).map_err(malformed)
    }

    fn decode(&self, body: &[u8]) -> Result<String, ProviderError> {
        let response: ChatResponse = serde_json::from_slice(body).map_err(malformed)?;
        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::Serialization("response contained no choices".into()))
    }
}

// --- API types ---

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}
