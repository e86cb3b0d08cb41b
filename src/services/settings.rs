use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::models::kinds::RenderMode;
use crate::traits::chat_api::{BoxError, SafetySetting};

/// Fallback variable consulted when the configured one is unset.
pub const FALLBACK_API_KEY_ENV: &str = "GEMINI_API_KEY";

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub describer: DescriberConfig,
    pub render: RenderConfig,
    pub session: SessionConfig,
    pub prompts: PromptsConfig,
    pub intents: Option<Vec<IntentRuleConfig>>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7860,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Overrides host and port from a `host:port` string (`--bind`).
    pub fn apply_bind(&mut self, bind: &str) -> Result<(), BoxError> {
        let (host, port) = bind
            .rsplit_once(':')
            .ok_or_else(|| format!("invalid bind address {:?}: expected host:port", bind))?;
        let port: u16 = port
            .parse()
            .map_err(|e| format!("invalid port in bind address {:?}: {}", bind, e))?;
        if !host.is_empty() {
            self.host = host.to_string();
        }
        self.port = port;
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,                         // "gemini" (native) | любой провайдер ai-lib
    pub model: Option<String>,                    // пусто: модель провайдера по умолчанию
    pub base_url: Option<String>,
    pub proxy: Option<String>,                    // только для ai-lib
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub temperature: Option<f32>,                 // для беседы; описание фото настраивается отдельно
    pub request_timeout_secs: Option<u64>,
    pub log_prompt_preview_chars: usize,          // сколько символов промпта логировать
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: None,
            base_url: None,
            proxy: None,
            api_key: None,
            api_key_env: "API_KEY".to_string(),
            temperature: None,
            request_timeout_secs: None,
            log_prompt_preview_chars: 200,
        }
    }
}

impl LlmConfig {
    pub fn is_gemini(&self) -> bool {
        self.provider.eq_ignore_ascii_case("gemini")
    }

    pub fn gemini_model(&self) -> &str {
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_GEMINI_MODEL)
    }

    /// Resolves the API credential: explicit config value, then the configured
    /// environment variable, then `GEMINI_API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns an error when none of them holds a non-empty value, so the
    /// process refuses to start with an unauthenticated client.
    pub fn resolve_api_key(&self) -> Result<String, BoxError> {
        let from_env = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        if let Some(key) = self.api_key.as_ref().map(|k| k.trim()).filter(|k| !k.is_empty()) {
            return Ok(key.to_string());
        }
        if let Some(key) = from_env(&self.api_key_env) {
            return Ok(key);
        }
        if let Some(key) = from_env(FALLBACK_API_KEY_ENV) {
            return Ok(key);
        }
        Err(format!(
            "API credential is missing: set llm.api_key in the config or the {} (or {}) environment variable",
            self.api_key_env, FALLBACK_API_KEY_ENV
        )
        .into())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DescriberConfig {
    pub temperature: f32,
    pub safety_threshold: String,
    pub safety_categories: Vec<String>,
    pub instruction: Option<String>,
}

impl Default for DescriberConfig {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            safety_threshold: "BLOCK_LOW_AND_ABOVE".to_string(),
            safety_categories: vec![
                "HARM_CATEGORY_HATE_SPEECH".to_string(),
                "HARM_CATEGORY_HARASSMENT".to_string(),
            ],
            instruction: None,
        }
    }
}

impl DescriberConfig {
    pub fn safety_settings(&self) -> Vec<SafetySetting> {
        self.safety_categories
            .iter()
            .map(|category| SafetySetting {
                category: category.clone(),
                threshold: self.safety_threshold.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RenderConfig {
    pub mode: RenderMode,
    pub char_delay_ms: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { mode: RenderMode::Simulated, char_delay_ms: 10 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub clear_resets_context: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 3600,
            sweep_interval_secs: 60,
            clear_resets_context: false,
        }
    }
}

/// Tera templates overriding the built-in prompts.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PromptsConfig {
    pub text_only: Option<String>,
    pub image_with_question: Option<String>,
    pub image_summary: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IntentRuleConfig {
    pub name: String,
    pub patterns: Vec<String>,                    // подстрока или "regex:<выражение>"
    pub response: String,
    #[serde(default)]
    pub case_insensitive: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), file_dir: None }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig, BoxError> {
    let content = fs::read_to_string(path)?;
    let cfg: AppConfig = serde_yaml::from_str(&content)?;
    Ok(cfg)
}

/// Like [`load_config`], but a missing file yields the built-in defaults.
pub fn load_config_or_default<P: AsRef<Path>>(path: P) -> Result<(AppConfig, bool), BoxError> {
    if path.as_ref().exists() {
        Ok((load_config(path)?, true))
    } else {
        Ok((AppConfig::default(), false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_yields_defaults() {
        let cfg: AppConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.server.port, 7860);
        assert_eq!(cfg.llm.gemini_model(), "gemini-1.5-flash");
        assert_eq!(cfg.llm.api_key_env, "API_KEY");
        assert!(cfg.llm.is_gemini());
        assert_eq!(cfg.render.mode, RenderMode::Simulated);
        assert_eq!(cfg.render.char_delay_ms, 10);
        assert!(!cfg.session.clear_resets_context);
        assert!(cfg.intents.is_none());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let yaml = r#"
llm:
  model: gemini-2.0-flash
  api_key: TEST
render:
  mode: transport
describer:
  temperature: 0.2
intents:
  - name: thanks
    patterns: ["thank"]
    response: "You're welcome!"
"#;
        let cfg: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.llm.gemini_model(), "gemini-2.0-flash");
        assert_eq!(cfg.llm.provider, "gemini");
        assert_eq!(cfg.render.mode, RenderMode::Transport);
        assert_eq!(cfg.render.char_delay_ms, 10);
        assert_eq!(cfg.describer.temperature, 0.2);
        assert_eq!(cfg.describer.safety_categories.len(), 2);
        let intents = cfg.intents.unwrap();
        assert_eq!(intents[0].name, "thanks");
        assert!(!intents[0].case_insensitive);
    }

    #[test]
    fn describer_safety_settings_share_threshold() {
        let settings = DescriberConfig::default().safety_settings();
        assert_eq!(settings.len(), 2);
        assert!(settings.iter().all(|s| s.threshold == "BLOCK_LOW_AND_ABOVE"));
        assert_eq!(settings[0].category, "HARM_CATEGORY_HATE_SPEECH");
        assert_eq!(settings[1].category, "HARM_CATEGORY_HARASSMENT");
    }

    #[test]
    fn config_file_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        let (cfg, found) = load_config_or_default(dir.path().join("absent.yaml")).unwrap();
        assert!(!found);
        assert_eq!(cfg.server.port, 7860);

        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "server:\n  port: 8081\nsession:\n  clear_resets_context: true\n").unwrap();
        let (cfg, found) = load_config_or_default(&path).unwrap();
        assert!(found);
        assert_eq!(cfg.server.port, 8081);
        assert!(cfg.session.clear_resets_context);

        std::fs::write(&path, "server: [not, a, map]").unwrap();
        assert!(load_config_or_default(&path).is_err());
    }

    #[test]
    fn bind_override_replaces_host_and_port() {
        let mut server = ServerConfig::default();
        server.apply_bind("0.0.0.0:8080").unwrap();
        assert_eq!(server.bind_addr(), "0.0.0.0:8080");

        server.apply_bind(":9000").unwrap();
        assert_eq!(server.bind_addr(), "0.0.0.0:9000");

        assert!(server.apply_bind("localhost").is_err());
        assert!(server.apply_bind("localhost:http").is_err());
    }

    #[test]
    fn explicit_api_key_wins() {
        let llm = LlmConfig {
            api_key: Some("  from-config ".to_string()),
            api_key_env: "MYCOBOT_TEST_UNSET_VARIABLE".to_string(),
            ..LlmConfig::default()
        };
        assert_eq!(llm.resolve_api_key().unwrap(), "from-config");
    }
}
