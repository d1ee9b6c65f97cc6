use crate::domain::model::{ExecutionEvent, ExecutionStatus};
use crate::domain::ports::TelemetrySink;
use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub const TELEMETRY_TARGET: &str = "sheet_calc::telemetry";

/// Emits every execution event as a structured tracing record.
#[derive(Debug, Clone, Default)]
pub struct TracingTelemetry;

#[async_trait]
impl TelemetrySink for TracingTelemetry {
    async fn record(&self, event: ExecutionEvent) -> Result<()> {
        let error_kind = event.error_kind.map(|kind| kind.as_str()).unwrap_or("");
        let request_id = event.request_id.as_deref().unwrap_or("");
        match event.status {
            ExecutionStatus::Success => tracing::info!(
                target: TELEMETRY_TARGET,
                service_id = %event.service_id,
                execution_time_ms = event.execution_time_ms,
                cached = event.cached,
                request_id,
                timestamp = %event.timestamp.to_rfc3339(),
                "execution succeeded"
            ),
            ExecutionStatus::Error => tracing::info!(
                target: TELEMETRY_TARGET,
                service_id = %event.service_id,
                execution_time_ms = event.execution_time_ms,
                cached = event.cached,
                error_kind,
                request_id,
                timestamp = %event.timestamp.to_rfc3339(),
                "execution failed"
            ),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct NoopTelemetry;

#[async_trait]
impl TelemetrySink for NoopTelemetry {
    async fn record(&self, _event: ExecutionEvent) -> Result<()> {
        Ok(())
    }
}

/// Appends one JSON object per event to a local file.
#[derive(Debug)]
pub struct JsonLinesTelemetry {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesTelemetry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TelemetrySink for JsonLinesTelemetry {
    async fn record(&self, event: ExecutionEvent) -> Result<()> {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        // 序列化寫入，避免多筆事件交錯
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
