pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::cli::CliArgs;
pub use config::RuntimeConfig;

pub use adapters::{JsonLinesTelemetry, NoopTelemetry, ScriptEngine, ScriptWorkbook, TracingTelemetry};
pub use crate::core::cache::WorkbookCache;
pub use crate::core::calculation::Isolation;
pub use crate::core::executor::{ExecutionOptions, ServiceExecutor};
pub use domain::model::{
    ErrorKind, ExecutionError, ExecutionRequest, ExecutionResponse, ExecutionResult, ModelSource,
    ParamType, ParameterDefinition, RequestInfo, ServiceDescriptor,
};
pub use utils::error::{Result, ServiceError};
