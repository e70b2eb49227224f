pub mod settings;

pub use settings::{
    LimitsConfig, LlmConfig, LoggingConfig, MemoryConfig, PromptsConfig, ServerConfig, Settings,
    SizeMetric, SummarizerConfig,
};
