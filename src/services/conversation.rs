use std::sync::Arc;

use tracing::{info, warn};

use crate::traits::chat_api::{BoxError, ChatApi, ChatMessage, GenerateRequest, TextStream};

/// Multi-turn conversation with the remote model.
///
/// The accumulated context is replayed with every request; an exchange is
/// appended only once the reply is complete, so a failed call leaves the
/// context untouched. No retries.
pub struct Conversation {
    chat_api: Arc<dyn ChatApi>,
    temperature: Option<f32>,
    history: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new(chat_api: Arc<dyn ChatApi>, temperature: Option<f32>) -> Self {
        Self { chat_api, temperature, history: Vec::new() }
    }

    fn request(&self, prompt: &str) -> GenerateRequest {
        GenerateRequest::builder()
            .history(self.history.clone())
            .prompt(prompt)
            .maybe_temperature(self.temperature)
            .build()
    }

    /// Sends `prompt` with the accumulated context and records the exchange
    /// on success.
    pub async fn submit(&mut self, prompt: &str) -> Result<String, BoxError> {
        let reply = self.ask(prompt).await?;
        self.record(prompt, &reply);
        Ok(reply)
    }

    /// Like [`Conversation::submit`] but leaves recording to the caller.
    pub async fn ask(&self, prompt: &str) -> Result<String, BoxError> {
        info!(
            provider = self.chat_api.provider_name(),
            context_len = self.history.len(),
            "conversation: submit"
        );
        self.chat_api.generate(self.request(prompt)).await.inspect_err(|e| {
            warn!(error = %e, "conversation: submit failed");
        })
    }

    /// Streaming variant of [`Conversation::submit`]. The exchange is not
    /// recorded here: call [`Conversation::record`] once the stream is drained.
    pub async fn submit_streaming(&self, prompt: &str) -> Result<TextStream, BoxError> {
        info!(
            provider = self.chat_api.provider_name(),
            context_len = self.history.len(),
            "conversation: submit (streaming)"
        );
        self.chat_api.generate_stream(self.request(prompt)).await
    }

    pub fn record(&mut self, prompt: &str, reply: &str) {
        self.history.push(ChatMessage::user(prompt));
        self.history.push(ChatMessage::model(reply));
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}
