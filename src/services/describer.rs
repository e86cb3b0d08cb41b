use std::sync::Arc;

use bon::Builder;
use tracing::{info, warn};

use crate::models::types::{MushroomDescription, UploadedImage};
use crate::services::settings::DescriberConfig;
use crate::traits::chat_api::{BoxError, ChatApi, GenerateRequest, InlineImage, SafetySetting};

pub const DEFAULT_INSTRUCTION: &str = "You are a world-renowned mycologist. \
Analyze the following image of a mushroom and provide a JSON response with the following fields \
common_name, genus, confidence, visible (cap, hymenium, stipe), color, and edible. The image is given";

/// Decodes the upload to make sure it is an image and returns it typed.
pub fn prepare_image(bytes: &[u8]) -> Result<InlineImage, BoxError> {
    let format = image::guess_format(bytes)?;
    // полное декодирование: битый файл должен отсеяться до запроса к модели
    image::load_from_memory_with_format(bytes, format)?;
    Ok(InlineImage {
        mime_type: format.to_mime_type().to_string(),
        data: bytes.to_vec(),
    })
}

/// Asks the model for a short structured description of a mushroom photo.
///
/// Never fails: any decode or remote error is logged and turned into an empty
/// description, which the prompt builder treats as "nothing known".
#[derive(Builder)]
pub struct ImageDescriber {
    chat_api: Arc<dyn ChatApi>,
    #[builder(into, default = DEFAULT_INSTRUCTION.to_string())]
    instruction: String,
    #[builder(default = 0.8)]
    temperature: f32,
    #[builder(default)]
    safety_settings: Vec<SafetySetting>,
    #[builder(default = 200)]
    preview_chars: usize,
}

impl ImageDescriber {
    pub fn from_config(chat_api: Arc<dyn ChatApi>, cfg: &DescriberConfig, preview_chars: usize) -> Self {
        Self::builder()
            .chat_api(chat_api)
            .instruction(cfg.instruction.clone().unwrap_or_else(|| DEFAULT_INSTRUCTION.to_string()))
            .temperature(cfg.temperature)
            .safety_settings(cfg.safety_settings())
            .preview_chars(preview_chars)
            .build()
    }

    pub async fn describe(&self, image: &UploadedImage) -> MushroomDescription {
        info!(image_len = image.len(), file_name = ?image.file_name, "describe: start");
        match self.try_describe(image).await {
            Ok(text) => {
                let preview: String = text.chars().take(self.preview_chars).collect();
                info!(description_len = text.len(), description_preview = %preview, "describe: done");
                MushroomDescription::from(text)
            }
            Err(e) => {
                warn!(error = %e, "describe: failed, continuing without description");
                MushroomDescription::empty()
            }
        }
    }

    async fn try_describe(&self, image: &UploadedImage) -> Result<String, BoxError> {
        let bytes = image.bytes.clone();
        let inline = tokio::task::spawn_blocking(move || prepare_image(&bytes)).await??;
        let request = GenerateRequest::builder()
            .prompt(self.instruction.clone())
            .image(inline)
            .safety_settings(self.safety_settings.clone())
            .temperature(self.temperature)
            .build();
        self.chat_api.generate(request).await
    }
}
