use tera::{Context, Tera};
use tracing::debug;

use crate::models::types::MushroomDescription;
use crate::services::settings::PromptsConfig;
use crate::traits::chat_api::BoxError;

const TEXT_ONLY: &str = "text_only";
const IMAGE_WITH_QUESTION: &str = "image_with_question";
const IMAGE_SUMMARY: &str = "image_summary";

const DEFAULT_TEXT_ONLY: &str = "You are a world-renowned mycologist. \
Provide a detailed response to the following: {{ question }}. \
Remember to keep the conversation focused on mushrooms and guide the user towards related topics.";

const DEFAULT_IMAGE_WITH_QUESTION: &str = "You are a world-renowned mycologist. \
Based on the image of the given mushroom with the following specs : {{ description }} \
please answer the following question: {{ question }}. \
Remember to keep the conversation focused on mushrooms.";

const DEFAULT_IMAGE_SUMMARY: &str = "You are a world-renowned mycologist. \
Based on the image of the given mushroom with the following specs : {{ description }}. \
Take this data and make a detailed summary of the mushroom. \
Remember to keep the conversation focused on mushrooms.";

/// Renders the mycologist-persona prompt for a turn.
///
/// Templates are registered once; configured overrides are compiled here so a
/// broken template stops the process at startup rather than on first use.
pub struct PromptBuilder {
    tera: Tera,
}

impl PromptBuilder {
    pub fn new(cfg: &PromptsConfig) -> Result<Self, BoxError> {
        let mut tera = Tera::default();
        // имена без расширения: автоэкранирование Tera не применяется
        tera.add_raw_templates(vec![
            (TEXT_ONLY, cfg.text_only.as_deref().unwrap_or(DEFAULT_TEXT_ONLY)),
            (
                IMAGE_WITH_QUESTION,
                cfg.image_with_question.as_deref().unwrap_or(DEFAULT_IMAGE_WITH_QUESTION),
            ),
            (IMAGE_SUMMARY, cfg.image_summary.as_deref().unwrap_or(DEFAULT_IMAGE_SUMMARY)),
        ])?;
        Ok(Self { tera })
    }

    /// Picks one of three templates:
    /// no image, image with a question, image without a question.
    ///
    /// `description` being `Some` means an image was attached, even if the
    /// describer came back empty.
    pub fn build(
        &self,
        question: &str,
        description: Option<&MushroomDescription>,
    ) -> Result<String, tera::Error> {
        let mut ctx = Context::new();
        ctx.insert("question", question);
        let template = match description {
            None => TEXT_ONLY,
            Some(d) => {
                ctx.insert("description", d.as_str());
                if question.is_empty() { IMAGE_SUMMARY } else { IMAGE_WITH_QUESTION }
            }
        };
        let prompt = self.tera.render(template, &ctx)?;
        debug!(template, prompt_len = prompt.len(), "prompt rendered");
        Ok(prompt)
    }
}
