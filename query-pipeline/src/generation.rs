use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    types::{ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs},
    Client,
};
use async_trait::async_trait;
use common::error::AppError;
use tracing::debug;

/// Single-shot answer generation. The pipeline renders one prompt and expects
/// one completion back; failures surface verbatim with no internal retry.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, AppError>;
}

/// Chat-completion backed generation over the OpenAI-compatible API.
pub struct OpenAiChat {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
}

impl OpenAiChat {
    pub fn new(client: Arc<Client<OpenAIConfig>>, model: String) -> Self {
        Self { client, model }
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, AppError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .temperature(temperature)
            .max_completion_tokens(max_tokens)
            .messages([ChatCompletionRequestUserMessageArgs::default()
                .content(prompt.to_string())
                .build()?
                .into()])
            .build()?;

        let response = self.client.chat().create(request).await?;

        debug!(
            model = %self.model,
            choices = response.choices.len(),
            "Chat completion received"
        );

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Generation("chat completion returned no choices".into()))?;

        choice
            .message
            .content
            .ok_or_else(|| AppError::Generation("chat completion contained no content".into()))
    }
}
