use anyhow::{bail, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Settings file used when `APP_CONFIG_FILE` is not set (extension optional).
pub const DEFAULT_CONFIG_FILE: &str = "config/settings";

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub summarizer: SummarizerConfig,
    pub memory: MemoryConfig,
    pub limits: LimitsConfig,
    pub prompts: PromptsConfig,
    pub logging: LoggingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            llm: LlmConfig::default(),
            summarizer: SummarizerConfig::default(),
            memory: MemoryConfig::default(),
            limits: LimitsConfig::default(),
            prompts: PromptsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_body_limit_bytes: 1024 * 1024,
        }
    }
}

/// Connection + sampling parameters for one OpenAI-compatible backend.
/// Used for both the main generator and the (cheaper) summarizer.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8081".to_string(),
            model: "default".to_string(),
            api_key: None,
            timeout_seconds: 120,
            temperature: 0.7,
            max_tokens: 2048,
        }
    }
}

/// Secondary backend used only to fold old turns into the summary.
/// Same shape as `LlmConfig`, but every missing field falls back to the
/// colder, shorter summarizer defaults.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SummarizerConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8081".to_string(),
            model: "default".to_string(),
            api_key: None,
            timeout_seconds: 60,
            temperature: 0.3,
            max_tokens: 1024,
        }
    }
}

impl From<SummarizerConfig> for LlmConfig {
    fn from(cfg: SummarizerConfig) -> Self {
        Self {
            base_url: cfg.base_url,
            model: cfg.model,
            api_key: cfg.api_key,
            timeout_seconds: cfg.timeout_seconds,
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
        }
    }
}

/// Unit used to measure a conversation against `max_token_limit`.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SizeMetric {
    /// Approximate token count derived from content length.
    #[default]
    Tokens,
    /// Number of stored messages.
    Messages,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct MemoryConfig {
    /// `false` selects the no-op memory: every turn is answered without history.
    pub enabled: bool,
    pub size_metric: SizeMetric,
    pub max_token_limit: usize,
    /// Messages that are never folded into the summary.
    pub keep_recent_messages: usize,
    /// 0 disables expiry.
    pub conversation_ttl_seconds: u64,
    pub cleanup_interval_seconds: u64,
    pub default_conversation_id: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            size_metric: SizeMetric::Tokens,
            max_token_limit: 2000,
            keep_recent_messages: 4,
            conversation_ttl_seconds: 0,
            cleanup_interval_seconds: 300,
            default_conversation_id: "default".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    pub llm_stream_concurrency: usize,
    pub llm_generate_concurrency: usize,
    pub summarize_concurrency: usize,
    pub acquire_timeout_ms: u64,
    /// Events buffered between the generation task and the client.
    pub stream_buffer: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            llm_stream_concurrency: 32,
            llm_generate_concurrency: 32,
            summarize_concurrency: 8,
            acquire_timeout_ms: 10_000,
            stream_buffer: 16,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PromptsConfig {
    pub system_prompt: String,
    /// Must contain `{summary}` and `{new_lines}`.
    pub summary_prompt: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            summary_prompt: DEFAULT_SUMMARY_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// "json" or "pretty"
    pub format: String,
    /// Daily-rotated JSON log files are written here when set.
    pub directory: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "json".to_string(),
            directory: None,
        }
    }
}

const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an advanced AI coding assistant and problem solver.

Technical expertise:
- Writing, debugging, and explaining code in multiple languages
- Providing architectural guidance and best practices
- Solving complex programming problems step-by-step
- Code review and optimization suggestions

Communication style:
- Direct, helpful, and conversational responses
- Clear explanations with practical examples
- Use code blocks with proper syntax highlighting
- Break down complex concepts into digestible parts

Remember the conversation context, offer alternative solutions when appropriate
and ask clarifying questions when needed."#;

const DEFAULT_SUMMARY_PROMPT: &str = r#"Progressively summarize the lines of conversation provided, adding onto the previous summary and returning a new summary.

Current summary:
{summary}

New lines of conversation:
{new_lines}

New summary:"#;

impl Settings {
    /// Defaults, then the settings file, then `APP__*` environment variables.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name(&Self::config_file()).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> Result<Self> {
        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// `APP_CONFIG_FILE` when set, so the binary can run from any directory.
    pub fn config_file() -> String {
        std::env::var("APP_CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string())
    }

    pub fn validate(&self) -> Result<()> {
        if self.llm.base_url.trim().is_empty() {
            bail!("llm.base_url must not be empty");
        }
        if self.memory.default_conversation_id.trim().is_empty() {
            bail!("memory.default_conversation_id must not be empty");
        }
        if !self.prompts.summary_prompt.contains("{new_lines}") {
            bail!("prompts.summary_prompt must contain the {{new_lines}} placeholder");
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            bail!("logging.format must be \"json\" or \"pretty\", got {:?}", self.logging.format);
        }
        Ok(())
    }
}
