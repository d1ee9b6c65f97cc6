use crate::adapters::telemetry::{JsonLinesTelemetry, NoopTelemetry, TracingTelemetry};
use crate::core::cache::WorkbookCache;
use crate::core::calculation::Isolation;
use crate::core::executor::ExecutionOptions;
use crate::domain::ports::TelemetrySink;
use crate::utils::error::{Result, ServiceError};
use crate::utils::validation::{validate_one_of, validate_positive_number, Validate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const LOG_FORMATS: [&str; 2] = ["compact", "json"];
const TELEMETRY_SINKS: [&str; 3] = ["tracing", "jsonl", "none"];

/// Process-wide settings: cache sizing, execution isolation, logging and telemetry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub cache: CacheConfig,
    pub execution: ExecutionConfig,
    pub logging: LoggingConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
    pub max_entries: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 30 * 60,
            max_entries: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub isolation: Isolation,
    pub invalidate_on_error: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            isolation: Isolation::PerExecution,
            invalidate_on_error: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: String,
    pub verbose: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "compact".to_string(),
            verbose: false,
        }
    }
}

/// Where execution events go. `jsonl` appends one JSON object per line to `path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub sink: String,
    pub path: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            sink: "tracing".to_string(),
            path: None,
        }
    }
}

impl RuntimeConfig {
    /// 從 TOML 檔案載入設定
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析設定（支援 ${VAR} 環境變數）
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = super::substitute_env_vars(content);
        let config: Self = toml::from_str(&processed)?;
        config.validate()?;
        Ok(config)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_seconds)
    }

    pub fn execution_options(&self) -> ExecutionOptions {
        ExecutionOptions {
            isolation: self.execution.isolation,
            invalidate_on_error: self.execution.invalidate_on_error,
        }
    }

    pub fn build_cache<W>(&self) -> WorkbookCache<W> {
        match self.cache.max_entries {
            Some(max_entries) => WorkbookCache::with_capacity(self.ttl(), max_entries),
            None => WorkbookCache::new(self.ttl()),
        }
    }

    pub fn json_logging(&self) -> bool {
        self.logging.format == "json"
    }

    /// Send events to a JSON-lines file instead of the configured sink.
    pub fn with_telemetry_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.telemetry = TelemetryConfig {
            sink: "jsonl".to_string(),
            path: Some(path.into()),
        };
        self
    }

    pub fn build_telemetry(&self) -> Result<Arc<dyn TelemetrySink>> {
        match (self.telemetry.sink.as_str(), &self.telemetry.path) {
            ("jsonl", Some(path)) => Ok(Arc::new(JsonLinesTelemetry::new(path.clone()))),
            ("jsonl", None) => Err(missing_telemetry_path()),
            ("none", _) => Ok(Arc::new(NoopTelemetry)),
            _ => Ok(Arc::new(TracingTelemetry)),
        }
    }
}

fn missing_telemetry_path() -> ServiceError {
    ServiceError::InvalidConfigValueError {
        field: "telemetry.path".to_string(),
        value: String::new(),
        reason: "The jsonl telemetry sink needs a file path".to_string(),
    }
}

impl Validate for RuntimeConfig {
    fn validate(&self) -> Result<()> {
        validate_positive_number("cache.ttl_seconds", self.cache.ttl_seconds, 1)?;
        if let Some(max_entries) = self.cache.max_entries {
            validate_positive_number("cache.max_entries", max_entries as u64, 1)?;
        }
        validate_one_of("logging.format", &self.logging.format, &LOG_FORMATS)?;
        validate_one_of("telemetry.sink", &self.telemetry.sink, &TELEMETRY_SINKS)?;
        if self.telemetry.sink == "jsonl" && self.telemetry.path.is_none() {
            return Err(missing_telemetry_path());
        }
        Ok(())
    }
}
