use crate::models::kinds::ChatRole;
use crate::services::settings::LlmConfig;
use crate::traits::chat_api::{BoxError, ChatApi, GenerateRequest};
use async_trait::async_trait;

use ai_lib::ConnectionOptions;
use ai_lib::prelude::*;
use std::str::FromStr;
use strum_macros::EnumString;
use tokio::sync::OnceCell;
use tracing::info;

#[derive(Debug, Clone, EnumString)]
#[strum(ascii_case_insensitive)]
enum ProviderName {
    Groq,
    XaiGrok,
    Ollama,
    DeepSeek,
    Anthropic,
    AzureOpenAI,
    HuggingFace,
    TogetherAI,
    OpenRouter,
    Replicate,
    BaiduWenxin,
    TencentHunyuan,
    IflytekSpark,
    Moonshot,
    ZhipuAI,
    MiniMax,
    OpenAI,
    Qwen,
    Mistral,
    Cohere,
    Perplexity,
    AI21,
}

fn map_provider(p: ProviderName) -> Provider {
    match p {
        ProviderName::Groq => Provider::Groq,
        ProviderName::XaiGrok => Provider::XaiGrok,
        ProviderName::Ollama => Provider::Ollama,
        ProviderName::DeepSeek => Provider::DeepSeek,
        ProviderName::Anthropic => Provider::Anthropic,
        ProviderName::AzureOpenAI => Provider::AzureOpenAI,
        ProviderName::HuggingFace => Provider::HuggingFace,
        ProviderName::TogetherAI => Provider::TogetherAI,
        ProviderName::OpenRouter => Provider::OpenRouter,
        ProviderName::Replicate => Provider::Replicate,
        ProviderName::BaiduWenxin => Provider::BaiduWenxin,
        ProviderName::TencentHunyuan => Provider::TencentHunyuan,
        ProviderName::IflytekSpark => Provider::IflytekSpark,
        ProviderName::Moonshot => Provider::Moonshot,
        ProviderName::ZhipuAI => Provider::ZhipuAI,
        ProviderName::MiniMax => Provider::MiniMax,
        ProviderName::OpenAI => Provider::OpenAI,
        ProviderName::Qwen => Provider::Qwen,
        ProviderName::Mistral => Provider::Mistral,
        ProviderName::Cohere => Provider::Cohere,
        ProviderName::Perplexity => Provider::Perplexity,
        ProviderName::AI21 => Provider::AI21,
    }
}

/// `ChatApi` for every provider ai-lib knows about (Groq, OpenAI, Mistral, ...).
///
/// Text only: a request carrying an image is refused, which the image
/// describer turns into an empty description.
pub struct AiLibChatApi {
    provider: String,
    model: String,
    base_url: Option<String>,
    proxy: Option<String>,
    api_key: String,
    timeout_secs: Option<u64>,
    preview_chars: usize,
    client: OnceCell<AiClient>,
}

impl AiLibChatApi {
    pub fn from_config(llm: &LlmConfig, api_key: String) -> Result<Self, BoxError> {
        // неизвестный провайдер - ошибка конфигурации, а не тихий откат на Groq
        ProviderName::from_str(&llm.provider)
            .map_err(|_| format!("unknown llm.provider: {}", llm.provider))?;
        Ok(Self {
            provider: llm.provider.clone(),
            model: llm.model.clone().unwrap_or_default(),
            base_url: llm.base_url.clone(),
            proxy: llm.proxy.clone(),
            api_key,
            timeout_secs: llm.request_timeout_secs,
            preview_chars: llm.log_prompt_preview_chars,
            client: OnceCell::new(),
        })
    }

    fn connect(&self) -> Result<AiClient, BoxError> {
        let prov = ProviderName::from_str(&self.provider)
            .map(map_provider)
            .map_err(|_| format!("unknown llm.provider: {}", self.provider))?;

        info!(
            provider = %self.provider,
            base_url = %self.base_url.as_deref().unwrap_or("None"),
            proxy = %self.proxy.as_deref().unwrap_or("None"),
            timeout = %self.timeout_secs.map_or("None".to_string(), |t| t.to_string()),
        );

        let client = AiClient::with_options(
            prov,
            ConnectionOptions {
                base_url: self.base_url.clone(),
                proxy: self.proxy.clone(),
                api_key: Some(self.api_key.clone()),
                timeout: self.timeout_secs.map(std::time::Duration::from_secs),
                disable_proxy: false,
            },
        )?;
        Ok(client)
    }
}

fn to_message(role: ChatRole, text: String) -> Message {
    Message {
        role: match role {
            ChatRole::User => Role::User,
            ChatRole::Model => Role::Assistant,
        },
        content: Content::new_text(text),
        function_call: None,
    }
}

#[async_trait]
impl ChatApi for AiLibChatApi {
    async fn generate(&self, request: GenerateRequest) -> Result<String, BoxError> {
        if request.image.is_some() {
            return Err(format!("provider {} is configured for text only", self.provider).into());
        }
        // клиент создаётся один раз, запросы разных сессий идут параллельно
        let client = self.client.get_or_try_init(|| async { self.connect() }).await?;
        let model_name = if self.model.trim().is_empty() {
            client.default_chat_model().to_string()
        } else {
            self.model.clone()
        };
        // Log request details (without leaking entire prompt)
        let prompt_preview: String = request.prompt.chars().take(self.preview_chars).collect();
        info!(
            model = %model_name,
            history_len = request.history.len(),
            prompt_len = request.prompt.len(),
            prompt_preview = %prompt_preview,
            "ai_lib: chat request"
        );

        let mut messages: Vec<Message> = request
            .history
            .into_iter()
            .map(|m| to_message(m.role, m.text))
            .collect();
        messages.push(to_message(ChatRole::User, request.prompt));

        let req = ChatCompletionRequest::new(model_name.clone(), messages);
        let resp = client.chat_completion(req).await?;
        let text = resp
            .choices
            .first()
            .map(|c| c.message.content.as_text())
            .ok_or("ai_lib: response has no choices")?;
        let response_preview: String = text.chars().take(self.preview_chars).collect();
        info!(
            model = %model_name,
            response_len = text.len(),
            response_preview = %response_preview,
            "ai_lib: chat response"
        );
        Ok(text)
    }

    fn provider_name(&self) -> &str {
        &self.provider
    }
}
