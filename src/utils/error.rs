use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for '{field}': {value} ({reason})")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Invalid cell address '{address}': {reason}")]
    AddressError { address: String, reason: String },

    #[error("Sheet not found: {sheet}")]
    SheetNotFound { sheet: String },

    #[error("Cell {sheet}!R{row}C{col} is outside the sheet bounds ({rows} rows x {cols} columns)")]
    OutOfBounds {
        sheet: String,
        row: u32,
        col: u32,
        rows: u32,
        cols: u32,
    },

    #[error("Model error: {message}")]
    ModelError { message: String },

    #[error("Calculation engine error: {message}")]
    EngineError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Model,
    Calculation,
    System,
}

impl ServiceError {
    pub fn engine(message: impl Into<String>) -> Self {
        ServiceError::EngineError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ServiceError::IoError(_) => ErrorCategory::System,
            ServiceError::SerializationError(_)
            | ServiceError::TomlError(_)
            | ServiceError::ConfigError { .. }
            | ServiceError::InvalidConfigValueError { .. }
            | ServiceError::AddressError { .. } => ErrorCategory::Configuration,
            ServiceError::ModelError { .. } => ErrorCategory::Model,
            ServiceError::SheetNotFound { .. }
            | ServiceError::OutOfBounds { .. }
            | ServiceError::EngineError { .. } => ErrorCategory::Calculation,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => "Check the service descriptor and runtime configuration files",
            ErrorCategory::Model => "Re-export the spreadsheet model and invalidate the cached workbook",
            ErrorCategory::Calculation => {
                "Verify that every parameter address points at an existing sheet and cell"
            }
            ErrorCategory::System => "Check file permissions and available disk space",
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
