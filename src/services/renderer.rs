use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::models::types::Turn;
use crate::traits::chat_api::{BoxError, TextStream};

/// Where the reply text comes from.
pub enum ReplySource {
    /// Fully received text, replayed one character at a time.
    Complete(String),
    /// Transport-driven chunks, forwarded as they arrive.
    Chunks(TextStream),
}

/// Event pushed to the chat view while a turn is rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RenderFrame {
    /// The answer so far; each frame supersedes the previous one.
    Partial { question: String, text: String },
    /// The turn was appended to the transcript.
    Done { turn: Turn },
    Error { question: String, message: String },
}

impl RenderFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            RenderFrame::Partial { .. } => "partial",
            RenderFrame::Done { .. } => "done",
            RenderFrame::Error { .. } => "error",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Every unit was delivered; carries the full answer.
    Completed(String),
    /// The receiver went away before the end.
    Abandoned,
}

/// Progressive display of a reply.
#[derive(Debug, Clone)]
pub struct StreamRenderer {
    char_delay: Duration,
}

impl StreamRenderer {
    pub fn new(char_delay: Duration) -> Self {
        Self { char_delay }
    }

    pub async fn render(
        &self,
        question: &str,
        source: ReplySource,
        tx: &mpsc::Sender<RenderFrame>,
    ) -> Result<RenderOutcome, BoxError> {
        match source {
            ReplySource::Complete(text) => Ok(self.replay(question, &text, tx).await),
            ReplySource::Chunks(chunks) => Self::forward(question, chunks, tx).await,
        }
    }

    /// Emits the growing prefix after every char, pausing `char_delay`
    /// between emissions.
    async fn replay(&self, question: &str, text: &str, tx: &mpsc::Sender<RenderFrame>) -> RenderOutcome {
        let total = text.chars().count();
        let mut streamed = String::with_capacity(text.len());
        for (i, ch) in text.chars().enumerate() {
            streamed.push(ch);
            let frame = RenderFrame::Partial { question: question.to_string(), text: streamed.clone() };
            if tx.send(frame).await.is_err() {
                debug!(sent = i, total, "render: receiver gone");
                return RenderOutcome::Abandoned;
            }
            if i + 1 < total && !self.char_delay.is_zero() {
                tokio::time::sleep(self.char_delay).await;
            }
        }
        RenderOutcome::Completed(streamed)
    }

    async fn forward(
        question: &str,
        mut chunks: TextStream,
        tx: &mpsc::Sender<RenderFrame>,
    ) -> Result<RenderOutcome, BoxError> {
        let mut streamed = String::new();
        while let Some(chunk) = chunks.next().await {
            streamed.push_str(&chunk?);
            let frame = RenderFrame::Partial { question: question.to_string(), text: streamed.clone() };
            if tx.send(frame).await.is_err() {
                debug!(received = streamed.len(), "render: receiver gone");
                return Ok(RenderOutcome::Abandoned);
            }
        }
        // поток без текста не считается ответом
        if streamed.is_empty() {
            return Err("the model returned no text".into());
        }
        Ok(RenderOutcome::Completed(streamed))
    }
}
