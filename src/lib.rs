pub mod models;
pub mod services;
pub mod subsystems;
pub mod traits;
pub mod web;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use crate::services::chat_api_ai_lib::AiLibChatApi;
use crate::services::describer::ImageDescriber;
use crate::services::gemini::GeminiChatApi;
use crate::services::intents::IntentFilter;
use crate::services::pipeline::ChatPipeline;
use crate::services::prompts::PromptBuilder;
use crate::services::renderer::StreamRenderer;
use crate::services::sessions::SessionManager;
use crate::services::settings::{AppConfig, LoggingConfig, load_config_or_default};
use crate::subsystems::sweeper::SessionSweeper;
use crate::subsystems::web::WebSubsystem;
use crate::traits::chat_api::{BoxError, ChatApi};
use crate::web::AppState;

/// Initializes structured logging. `RUST_LOG` wins over `logging.level`.
///
/// With `logging.file_dir` set, records go to a daily rolling file instead of
/// stdout; keep the returned guard alive so buffered lines get flushed.
pub fn init_logging(cfg: &LoggingConfig) -> Option<WorkerGuard> {
    let log_spec = std::env::var("RUST_LOG").unwrap_or_else(|_| cfg.level.clone());
    let filter = tracing_subscriber::EnvFilter::new(log_spec);
    match cfg.file_dir.as_ref() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mycobot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .compact()
                .try_init();
            Some(guard)
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .compact()
                .try_init();
            None
        }
    }
}

/// Builds the model client. Fails when no API credential can be resolved.
pub fn build_chat_api(cfg: &AppConfig) -> Result<Arc<dyn ChatApi>, BoxError> {
    let api_key = cfg.llm.resolve_api_key()?;
    let chat_api: Arc<dyn ChatApi> = if cfg.llm.is_gemini() {
        Arc::new(GeminiChatApi::from_config(&cfg.llm, api_key)?)
    } else {
        Arc::new(AiLibChatApi::from_config(&cfg.llm, api_key)?)
    };
    info!(provider = chat_api.provider_name(), "chat api ready");
    Ok(chat_api)
}

/// Wires the shared state around an already constructed model client.
pub fn build_state_with(cfg: &AppConfig, chat_api: Arc<dyn ChatApi>) -> Result<AppState, BoxError> {
    let preview_chars = cfg.llm.log_prompt_preview_chars;
    let intents = IntentFilter::from_config(cfg.intents.as_deref())?;
    let prompts = PromptBuilder::new(&cfg.prompts)?;
    let describer = ImageDescriber::from_config(Arc::clone(&chat_api), &cfg.describer, preview_chars);

    let pipeline = ChatPipeline::builder()
        .intents(Arc::new(intents))
        .describer(Arc::new(describer))
        .prompts(Arc::new(prompts))
        .renderer(StreamRenderer::new(Duration::from_millis(cfg.render.char_delay_ms)))
        .mode(cfg.render.mode)
        .preview_chars(preview_chars)
        .build();
    let sessions = SessionManager::new(chat_api, cfg.llm.temperature, cfg.session.clear_resets_context);

    Ok(AppState::builder()
        .sessions(Arc::new(sessions))
        .pipeline(Arc::new(pipeline))
        .build())
}

pub fn build_state(cfg: &AppConfig) -> Result<AppState, BoxError> {
    let chat_api = build_chat_api(cfg)?;
    build_state_with(cfg, chat_api)
}

/// Runs the web server and the session sweeper until a signal arrives.
pub async fn serve(listener: TcpListener, state: AppState, cfg: &AppConfig) -> io::Result<()> {
    let web = WebSubsystem::builder()
        .router(web::router(state.clone(), cfg.server.max_upload_bytes))
        .listener(listener)
        .build();
    // нулевой таймаут отключает вытеснение
    let sweeper = (cfg.session.idle_timeout_secs > 0).then(|| {
        SessionSweeper::builder()
            .sessions(Arc::clone(&state.sessions))
            .idle_timeout(Duration::from_secs(cfg.session.idle_timeout_secs))
            .interval(Duration::from_secs(cfg.session.sweep_interval_secs))
            .build()
    });

    Toplevel::new(|s: SubsystemHandle| async move {
        s.start(SubsystemBuilder::new("web", |h| web.run(h)));
        if let Some(sweeper) = sweeper {
            s.start(SubsystemBuilder::new("session-sweeper", |h| sweeper.run(h)));
        }
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_secs(5))
    .await
    .map_err(io::Error::other)
}

pub async fn run_server(cfg: AppConfig) -> io::Result<()> {
    let state = build_state(&cfg).map_err(|e| io::Error::other(format!("startup failed: {}", e)))?;
    let addr = cfg.server.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, mode = %cfg.render.mode, "mushroom expert listening");
    serve(listener, state, &cfg).await
}

/// High-level entrypoint: load config, init logging, run the server.
pub async fn run_with_config_path(path: &str, bind: Option<String>) -> io::Result<()> {
    let (mut cfg, found) = load_config_or_default(path)
        .map_err(|e| io::Error::other(format!("Failed to load {}: {}", path, e)))?;
    if let Some(bind) = bind.as_deref() {
        cfg.server
            .apply_bind(bind)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
    }

    let _guard = init_logging(&cfg.logging);
    if !found {
        warn!(path, "config file not found, using built-in defaults");
    }
    run_server(cfg).await
}
