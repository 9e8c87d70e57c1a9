pub mod http;
pub mod stream;

use serde::Serialize;

use crate::request::PromptRequest;

/// Upstream chat-completion call. Always streamed; aggregation happens on our side.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_message: String,
    pub temperature: f64,
    pub top_p: f64,
}

impl CompletionRequest {
    pub fn from_prompt(model: impl Into<String>, prompt: PromptRequest) -> Self {
        Self {
            model: model.into(),
            system_prompt: prompt.system_prompt,
            user_message: prompt.user_message,
            temperature: prompt.temperature,
            top_p: prompt.top_p,
        }
    }

    /// OpenAI-compatible request body.
    pub fn to_body(&self) -> ChatCompletionBody<'_> {
        ChatCompletionBody {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &self.user_message,
                },
            ],
            temperature: self.temperature,
            top_p: self.top_p,
            stream: true,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionBody<'a> {
    pub model: &'a str,
    pub messages: [ChatMessage<'a>; 2],
    pub temperature: f64,
    pub top_p: f64,
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub struct ChatMessage<'a> {
    pub role: &'static str,
    pub content: &'a str,
}
