use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bon::bon;
use derive_more::Display;
use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::services::settings::LlmConfig;
use crate::traits::chat_api::{BoxError, ChatApi, GenerateRequest, TextStream};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Failures of the Gemini REST transport.
#[derive(Debug, Display)]
pub enum GeminiError {
    #[display("gemini request failed: {_0}")]
    Http(reqwest::Error),
    #[display("gemini api error ({status}): {body}")]
    Status { status: reqwest::StatusCode, body: String },
    #[display("gemini blocked the request: {_0}")]
    Blocked(String),
    #[display("gemini returned no text")]
    Empty,
    #[display("failed to parse gemini response: {_0}")]
    Decode(serde_json::Error),
}

impl std::error::Error for GeminiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GeminiError::Http(e) => Some(e),
            GeminiError::Decode(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody {
    contents: Vec<ContentBody>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    safety_settings: Vec<SafetySettingBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfigBody>,
}

#[derive(Serialize)]
struct ContentBody {
    role: &'static str,
    parts: Vec<PartBody>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum PartBody {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: BlobBody,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BlobBody {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
struct SafetySettingBody {
    category: String,
    threshold: String,
}

#[derive(Serialize)]
struct GenerationConfigBody {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text parts of the first candidate. An empty string is a
    /// valid result for a streamed chunk.
    fn text(&self) -> Result<String, GeminiError> {
        let Some(candidate) = self.candidates.first() else {
            if let Some(reason) = self.prompt_feedback.as_ref().and_then(|f| f.block_reason.clone()) {
                return Err(GeminiError::Blocked(reason));
            }
            return Ok(String::new());
        };
        let text: String = candidate
            .content
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.is_empty() && candidate.finish_reason.as_deref() == Some("SAFETY") {
            return Err(GeminiError::Blocked("SAFETY".to_string()));
        }
        Ok(text)
    }
}

fn request_body(request: GenerateRequest) -> GenerateContentBody {
    let mut contents: Vec<ContentBody> = request
        .history
        .into_iter()
        .map(|m| ContentBody {
            role: m.role.as_str(),
            parts: vec![PartBody::Text { text: m.text }],
        })
        .collect();

    // картинка идёт первой частью, как в запросе на описание
    let mut parts = Vec::with_capacity(2);
    if let Some(image) = request.image {
        parts.push(PartBody::InlineData {
            inline_data: BlobBody { mime_type: image.mime_type, data: BASE64.encode(&image.data) },
        });
    }
    parts.push(PartBody::Text { text: request.prompt });
    contents.push(ContentBody { role: "user", parts });

    GenerateContentBody {
        contents,
        safety_settings: request
            .safety_settings
            .into_iter()
            .map(|s| SafetySettingBody { category: s.category, threshold: s.threshold })
            .collect(),
        generation_config: request.temperature.map(|temperature| GenerationConfigBody { temperature }),
    }
}

/// `ChatApi` over the Gemini `generateContent` REST endpoints.
pub struct GeminiChatApi {
    client: Client,
    base_url: Url,
    model: String,
    api_key: String,
    preview_chars: usize,
}

#[bon]
impl GeminiChatApi {
    #[builder]
    pub fn new(
        client: Client,
        base_url: Url,
        #[builder(into)] model: String,
        #[builder(into)] api_key: String,
        #[builder(default = 200)] preview_chars: usize,
    ) -> Self {
        Self { client, base_url, model, api_key, preview_chars }
    }

    pub fn from_config(llm: &LlmConfig, api_key: String) -> Result<Self, BoxError> {
        let base_url = Url::parse(llm.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL))
            .map_err(|e| format!("invalid llm.base_url: {}", e))?;
        let mut client = Client::builder();
        if let Some(secs) = llm.request_timeout_secs {
            client = client.timeout(Duration::from_secs(secs));
        }
        info!(
            model = %llm.gemini_model(),
            base_url = %base_url,
            timeout = %llm.request_timeout_secs.map_or("None".to_string(), |t| t.to_string()),
            "gemini client configured"
        );
        Ok(Self::builder()
            .client(client.build()?)
            .base_url(base_url)
            .model(llm.gemini_model())
            .api_key(api_key)
            .preview_chars(llm.log_prompt_preview_chars)
            .build())
    }

    fn endpoint(&self, method: &str) -> String {
        let model = self.model.trim();
        let model_path = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };
        format!("{}/{}:{}", self.base_url.as_str().trim_end_matches('/'), model_path, method)
    }

    fn log_request(&self, request: &GenerateRequest, streaming: bool) {
        let prompt_preview: String = request.prompt.chars().take(self.preview_chars).collect();
        info!(
            model = %self.model,
            streaming,
            history_len = request.history.len(),
            has_image = request.image.is_some(),
            prompt_len = request.prompt.len(),
            prompt_preview = %prompt_preview,
            "gemini: request"
        );
    }

    async fn post(&self, url: &str, request: GenerateRequest) -> Result<reqwest::Response, GeminiError> {
        let body = request_body(request);
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(GeminiError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "gemini: api error");
            return Err(GeminiError::Status { status, body });
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatApi for GeminiChatApi {
    async fn generate(&self, request: GenerateRequest) -> Result<String, BoxError> {
        self.log_request(&request, false);
        let response = self.post(&self.endpoint("generateContent"), request).await?;
        let raw = response.text().await.map_err(GeminiError::Http)?;
        let parsed: GenerateContentResponse = serde_json::from_str(&raw).map_err(GeminiError::Decode)?;
        let text = parsed.text()?;
        if text.is_empty() {
            return Err(GeminiError::Empty.into());
        }
        let response_preview: String = text.chars().take(self.preview_chars).collect();
        info!(
            model = %self.model,
            response_len = text.len(),
            response_preview = %response_preview,
            "gemini: response"
        );
        Ok(text)
    }

    async fn generate_stream(&self, request: GenerateRequest) -> Result<TextStream, BoxError> {
        self.log_request(&request, true);
        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));
        let response = self.post(&url, request).await?;
        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()))
            .boxed();
        Ok(sse_text_stream(bytes))
    }

    fn provider_name(&self) -> &str {
        "gemini"
    }
}

struct SseState {
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: Vec<u8>,
    ready: VecDeque<Result<String, BoxError>>,
    finished: bool,
}

impl SseState {
    /// Moves every complete `data:` line from the byte buffer to `ready`.
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() || data == "[DONE]" {
                continue;
            }
            let parsed = serde_json::from_str::<GenerateContentResponse>(data)
                .map_err(GeminiError::Decode)
                .and_then(|chunk| chunk.text());
            match parsed {
                Ok(text) if text.is_empty() => {}
                Ok(text) => self.ready.push_back(Ok(text)),
                Err(e) => {
                    self.ready.push_back(Err(e.into()));
                    self.finished = true;
                    self.buffer.clear();
                    return;
                }
            }
        }
    }
}

/// Turns a `text/event-stream` body into reply text chunks, one per event.
fn sse_text_stream(bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>) -> TextStream {
    let state = SseState { bytes, buffer: Vec::new(), ready: VecDeque::new(), finished: false };
    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.ready.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => {
                    st.buffer.extend_from_slice(&chunk);
                    st.drain_lines();
                }
                Some(Err(e)) => {
                    st.finished = true;
                    st.ready.push_back(Err(GeminiError::Http(e).into()));
                }
                None => {
                    debug!("gemini: sse stream closed");
                    st.finished = true;
                    st.buffer.push(b'\n');
                    st.drain_lines();
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::kinds::ChatRole;
    use crate::traits::chat_api::{ChatMessage, InlineImage, SafetySetting};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn body_carries_history_image_safety_and_temperature() {
        let request = GenerateRequest::builder()
            .history(vec![ChatMessage::user("hi"), ChatMessage::model("hello")])
            .prompt("describe")
            .image(InlineImage { mime_type: "image/png".to_string(), data: vec![1, 2, 3] })
            .safety_settings(vec![SafetySetting {
                category: "HARM_CATEGORY_HARASSMENT".to_string(),
                threshold: "BLOCK_LOW_AND_ABOVE".to_string(),
            }])
            .temperature(0.5)
            .build();
        let body = serde_json::to_value(request_body(request)).unwrap();
        assert_eq!(
            body,
            json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "hi"}]},
                    {"role": "model", "parts": [{"text": "hello"}]},
                    {"role": "user", "parts": [
                        {"inlineData": {"mimeType": "image/png", "data": "AQID"}},
                        {"text": "describe"}
                    ]}
                ],
                "safetySettings": [
                    {"category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_LOW_AND_ABOVE"}
                ],
                "generationConfig": {"temperature": 0.5}
            })
        );
        assert_eq!(ChatRole::Model.as_str(), "model");
    }

    #[test]
    fn plain_body_omits_optional_sections() {
        let body = serde_json::to_value(request_body(GenerateRequest::builder().prompt("q").build())).unwrap();
        assert_eq!(body, json!({"contents": [{"role": "user", "parts": [{"text": "q"}]}]}));
    }

    #[test]
    fn response_text_joins_parts() {
        let resp: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": "Chante"}, {"text": "relle"}]}, "finishReason": "STOP"}]
        }))
        .unwrap();
        assert_eq!(resp.text().unwrap(), "Chanterelle");
    }

    #[test]
    fn blocked_prompt_is_an_error() {
        let resp: GenerateContentResponse =
            serde_json::from_value(json!({"promptFeedback": {"blockReason": "SAFETY"}})).unwrap();
        assert!(matches!(resp.text(), Err(GeminiError::Blocked(r)) if r == "SAFETY"));
    }

    #[tokio::test]
    async fn sse_chunks_split_across_reads() {
        let raw = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Mor\"}]}}]}\r\n\r\n\
data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"els\"}]}}]}\r\n\r\n";
        let (a, b) = raw.as_bytes().split_at(30);
        let bytes = stream::iter(vec![Ok(a.to_vec()), Ok(b.to_vec())]).boxed();
        let chunks: Vec<String> = sse_text_stream(bytes)
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec!["Mor".to_string(), "els".to_string()]);
    }

    #[tokio::test]
    async fn sse_garbage_ends_stream_with_error() {
        let bytes = stream::iter(vec![Ok(b"data: {not json}\n\n".to_vec())]).boxed();
        let items: Vec<Result<String, BoxError>> = sse_text_stream(bytes).collect().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[test]
    fn endpoint_accepts_prefixed_model_names() {
        let api = GeminiChatApi::builder()
            .client(Client::new())
            .base_url(Url::parse("http://localhost:1234/v1beta/").unwrap())
            .model("models/gemini-1.5-flash")
            .api_key("k")
            .build();
        assert_eq!(
            api.endpoint("generateContent"),
            "http://localhost:1234/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }
}
