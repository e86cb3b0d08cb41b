use async_trait::async_trait;
use bon::Builder;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::models::kinds::ChatRole;

/// Error type shared by the remote-model clients.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Lazy, single-pass sequence of reply text chunks.
pub type TextStream = BoxStream<'static, Result<String, BoxError>>;

/// One message of the accumulated conversation context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: ChatRole::User, text: text.into() }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self { role: ChatRole::Model, text: text.into() }
    }
}

/// Image attached to a request, already validated and typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Harm category / block threshold pair, passed through to the provider as is
/// (e.g. `HARM_CATEGORY_HARASSMENT` / `BLOCK_LOW_AND_ABOVE`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

/// A single generation request: prior context, the new prompt and knobs.
#[derive(Debug, Clone, Builder)]
pub struct GenerateRequest {
    #[builder(default)]
    pub history: Vec<ChatMessage>,
    #[builder(into)]
    pub prompt: String,
    pub image: Option<InlineImage>,
    #[builder(default)]
    pub safety_settings: Vec<SafetySetting>,
    pub temperature: Option<f32>,
}

/// Defines the interface for a hosted generative-language model.
///
/// Implementations are stateless with respect to the conversation: the caller
/// passes the accumulated context with every request. This keeps real HTTP
/// clients and test doubles interchangeable.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Sends the request and returns the complete reply text.
    async fn generate(&self, request: GenerateRequest) -> Result<String, BoxError>;

    /// Sends the request and returns the reply as it is produced.
    ///
    /// Providers without a streaming transport yield the complete reply as a
    /// single chunk.
    async fn generate_stream(&self, request: GenerateRequest) -> Result<TextStream, BoxError> {
        let text = self.generate(request).await?;
        Ok(stream::once(async move { Ok(text) }).boxed())
    }

    /// Human-readable provider name for logs.
    fn provider_name(&self) -> &str;
}
