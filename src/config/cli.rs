use crate::utils::error::{Result, ServiceError};
use clap::Parser;
use serde_json::{Map, Value};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "sheet-calc")]
#[command(about = "Run a spreadsheet model as a calculation service")]
pub struct CliArgs {
    #[arg(long, help = "Service descriptor file (.toml or .json)")]
    pub service: PathBuf,

    #[arg(long, conflicts_with = "inputs_file", help = "Inputs as a JSON object")]
    pub inputs: Option<String>,

    #[arg(long, help = "File containing the inputs JSON object")]
    pub inputs_file: Option<PathBuf>,

    #[arg(long, help = "Runtime configuration (TOML)")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Append execution events as JSON lines to this file")]
    pub telemetry_file: Option<PathBuf>,

    #[arg(long, default_value = "1", help = "Execute the service this many times")]
    pub repeat: usize,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,
}

impl CliArgs {
    /// Caller inputs from `--inputs` or `--inputs-file`; empty when neither is given.
    pub fn load_inputs(&self) -> Result<Map<String, Value>> {
        let raw = match (&self.inputs, &self.inputs_file) {
            (Some(text), _) => text.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)?,
            (None, None) => return Ok(Map::new()),
        };
        match serde_json::from_str::<Value>(&raw)? {
            Value::Object(map) => Ok(map),
            other => Err(ServiceError::InvalidConfigValueError {
                field: "inputs".to_string(),
                value: other.to_string(),
                reason: "Inputs must be a JSON object".to_string(),
            }),
        }
    }
}
