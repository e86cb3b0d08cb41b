#![allow(dead_code)]

use std::fs;
use std::io::Cursor;
use std::path::PathBuf;

use mycobot::services::settings::AppConfig;
use mycobot::web::AppState;
use serde_json::{Value, json};
use tera::{Context, Tera};
use tokio::net::TcpListener;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const API_KEY: &str = "TEST";
pub const GENERATE_PATH: &str = "/v1beta/models/gemini-1.5-flash:generateContent";
pub const STREAM_PATH: &str = "/v1beta/models/gemini-1.5-flash:streamGenerateContent";

pub fn read_mock(name: &str) -> String {
    let p = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/resources/mocks").join(name);
    fs::read_to_string(p).unwrap()
}

pub fn gemini_text(body: &str) -> Value {
    json!({
        "candidates": [
            { "content": { "role": "model", "parts": [{ "text": body }] }, "finishReason": "STOP" }
        ]
    })
}

/// Параметры шаблона тестового конфига
pub struct ConfigParams<'a> {
    pub base_url: &'a str,
    pub api_key: &'a str,
    pub mode: &'a str,
    pub clear_resets_context: bool,
    pub max_upload_bytes: usize,
}

impl<'a> ConfigParams<'a> {
    pub fn new(base_url: &'a str) -> Self {
        Self {
            base_url,
            api_key: API_KEY,
            mode: "simulated",
            clear_resets_context: false,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

pub fn render_config_yaml(params: &ConfigParams<'_>) -> String {
    let p = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/resources/configs/app.yaml");
    let tpl = fs::read_to_string(p).unwrap();
    let mut ctx = Context::new();
    ctx.insert("base_url", params.base_url);
    ctx.insert("api_key", params.api_key);
    ctx.insert("mode", params.mode);
    ctx.insert("clear_resets_context", &params.clear_resets_context);
    ctx.insert("max_upload_bytes", &params.max_upload_bytes);
    Tera::one_off(&tpl, &ctx, false).unwrap()
}

pub fn config_from(params: &ConfigParams<'_>) -> AppConfig {
    serde_yaml::from_str(&render_config_yaml(params)).unwrap()
}

pub fn config_for(base_url: &str, mode: &str) -> AppConfig {
    config_from(&ConfigParams { mode, ..ConfigParams::new(base_url) })
}

pub fn gemini_base(server: &MockServer) -> String {
    format!("{}/v1beta", server.uri())
}

pub async fn mount_gemini_generate(server: &MockServer, text: &str) {
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(header("x-goog-api-key", API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_text(text)))
        .mount(server)
        .await;
}

pub async fn mount_gemini_fixture(server: &MockServer, fixture: &str) {
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json; charset=UTF-8")
                .set_body_string(read_mock(fixture)),
        )
        .mount(server)
        .await;
}

pub async fn mount_gemini_error(server: &MockServer, status: u16) {
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(status).set_body_string("upstream exploded"))
        .mount(server)
        .await;
}

/// Ответ streamGenerateContent?alt=sse: по одному `data:` событию на чанк
pub async fn mount_gemini_stream(server: &MockServer, chunks: &[&str]) {
    let events: Vec<Value> = chunks.iter().map(|c| gemini_text(c)).collect();
    mount_gemini_stream_events(server, &events).await;
}

/// То же, но события задаются целиком (например, без текста)
pub async fn mount_gemini_stream_events(server: &MockServer, events: &[Value]) {
    let body: String = events.iter().map(|e| format!("data: {}\r\n\r\n", e)).collect();
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .and(query_param("alt", "sse"))
        .and(header("x-goog-api-key", API_KEY))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

pub async fn received_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

pub fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(8, 8, image::Rgb([190, 140, 40]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

/// Поднимает роутер на случайном порту, без Toplevel и сигналов
pub async fn spawn_app(cfg: &AppConfig) -> (String, AppState) {
    let state = mycobot::build_state(cfg).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = mycobot::web::router(state.clone(), cfg.server.max_upload_bytes);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), state)
}

/// Splits an SSE body into `(event, data)` pairs, skipping keep-alive comments.
pub fn parse_sse(body: &str) -> Vec<(String, Value)> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut event = String::from("message");
            let mut data = String::new();
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    event = v.trim().to_string();
                } else if let Some(v) = line.strip_prefix("data:") {
                    data.push_str(v.trim());
                }
            }
            (!data.is_empty()).then(|| (event, serde_json::from_str(&data).unwrap()))
        })
        .collect()
}
