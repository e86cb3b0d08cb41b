use std::sync::Arc;

use bon::Builder;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::models::kinds::RenderMode;
use crate::models::types::{PendingTurn, Turn};
use crate::services::describer::ImageDescriber;
use crate::services::intents::IntentFilter;
use crate::services::prompts::PromptBuilder;
use crate::services::renderer::{RenderFrame, RenderOutcome, ReplySource, StreamRenderer};
use crate::services::sessions::ChatSession;

/// Handles one submission end to end:
/// intent filter, image description, prompt, model call, rendering.
#[derive(Builder)]
pub struct ChatPipeline {
    intents: Arc<IntentFilter>,
    describer: Arc<ImageDescriber>,
    prompts: Arc<PromptBuilder>,
    renderer: StreamRenderer,
    #[builder(default)]
    mode: RenderMode,
    #[builder(default = 200)]
    preview_chars: usize,
}

impl ChatPipeline {
    /// Runs the turn and reports progress through `tx`. Never fails: remote
    /// errors end up as a [`RenderFrame::Error`] and the transcript is left as is.
    pub async fn run_turn(&self, session: &mut ChatSession, turn: PendingTurn, tx: mpsc::Sender<RenderFrame>) {
        let question = turn.question.clone();
        let preview: String = question.chars().take(self.preview_chars).collect();
        info!(
            session = %session.id(),
            question_len = question.len(),
            question_preview = %preview,
            has_image = turn.has_image(),
            "turn: start"
        );
        session.touch();

        // Известные намерения отвечаются заготовкой, модель не вызывается
        if let Some(hit) = self.intents.check(&question) {
            info!(session = %session.id(), rule = hit.rule, "turn: canned reply");
            let source = ReplySource::Complete(hit.response.to_string());
            self.finish(session, &question, None, source, &tx).await;
            return;
        }

        let description = match turn.image.as_ref() {
            Some(image) => Some(self.describer.describe(image).await),
            None => None,
        };

        let prompt = match self.prompts.build(&question, description.as_ref()) {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "turn: prompt rendering failed");
                Self::fail(&question, format!("Could not build the prompt: {}", e), &tx).await;
                return;
            }
        };

        let source = match self.mode {
            RenderMode::Simulated => session.conversation.ask(&prompt).await.map(ReplySource::Complete),
            RenderMode::Transport => session.conversation.submit_streaming(&prompt).await.map(ReplySource::Chunks),
        };
        match source {
            Ok(source) => {
                // обмен попадает в контекст только после полной выдачи
                self.finish(session, &question, Some(prompt), source, &tx).await;
            }
            Err(e) => {
                error!(session = %session.id(), error = %e, "turn: model call failed");
                Self::fail(&question, format!("The mushroom expert is unavailable right now: {}", e), &tx).await;
            }
        }
    }

    async fn finish(
        &self,
        session: &mut ChatSession,
        question: &str,
        record_prompt: Option<String>,
        source: ReplySource,
        tx: &mpsc::Sender<RenderFrame>,
    ) {
        match self.renderer.render(question, source, tx).await {
            Ok(RenderOutcome::Completed(answer)) => {
                if let Some(prompt) = record_prompt {
                    session.conversation.record(&prompt, &answer);
                }
                let turn = Turn::builder().question(question).answer(answer).build();
                session.push_turn(turn.clone());
                info!(
                    session = %session.id(),
                    answer_len = turn.answer.len(),
                    transcript_len = session.transcript().len(),
                    "turn: done"
                );
                let _ = tx.send(RenderFrame::Done { turn }).await;
            }
            Ok(RenderOutcome::Abandoned) => {
                info!(session = %session.id(), "turn: client went away, reply dropped");
            }
            Err(e) => {
                error!(session = %session.id(), error = %e, "turn: reply stream failed");
                Self::fail(question, format!("The reply was interrupted: {}", e), tx).await;
            }
        }
    }

    async fn fail(question: &str, message: String, tx: &mpsc::Sender<RenderFrame>) {
        let _ = tx
            .send(RenderFrame::Error { question: question.to_string(), message })
            .await;
    }
}
