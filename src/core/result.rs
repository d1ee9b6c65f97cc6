use crate::core::coercion::CoercedInput;
use crate::domain::model::{
    ExecutionError, ExecutionEvent, ExecutionMetadata, ExecutionResult, ExecutionStatus,
    RequestInfo, ResolvedInput, ResolvedOutput, ServiceDescriptor,
};
use crate::domain::ports::TelemetrySink;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

/// Assembles the response for one execution and times it.
pub struct ResultBuilder<'a> {
    service: &'a ServiceDescriptor,
    started: Instant,
    cached: bool,
}

impl<'a> ResultBuilder<'a> {
    pub fn start(service: &'a ServiceDescriptor) -> Self {
        Self {
            service,
            started: Instant::now(),
            cached: false,
        }
    }

    pub fn mark_cached(&mut self, cached: bool) {
        self.cached = cached;
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn success(&self, inputs: &[CoercedInput<'_>], outputs: Vec<ResolvedOutput>) -> ExecutionResult {
        let inputs = inputs
            .iter()
            .map(|input| ResolvedInput {
                name: input.definition.name.clone(),
                title: input.definition.display_title().to_string(),
                value: input.value.to_json(),
            })
            .collect();

        ExecutionResult {
            service_id: self.service.id.clone(),
            service_name: self.service.name.clone(),
            inputs,
            outputs,
            metadata: ExecutionMetadata {
                execution_time: self.elapsed_ms(),
                cached: self.cached,
                timestamp: Utc::now(),
            },
        }
    }

    pub fn event(
        &self,
        outcome: &Result<ExecutionResult, ExecutionError>,
        request: &RequestInfo,
    ) -> ExecutionEvent {
        let (status, error_kind) = match outcome {
            Ok(_) => (ExecutionStatus::Success, None),
            Err(error) => (ExecutionStatus::Error, Some(error.error)),
        };
        ExecutionEvent {
            service_id: self.service.id.clone(),
            status,
            execution_time_ms: self.elapsed_ms(),
            cached: self.cached,
            error_kind,
            request_id: request.request_id.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Hand the event to the sink without waiting for it. Sink failures are only logged.
///
/// Returns the background task, or `None` when no runtime is available and the
/// event was dropped.
pub fn dispatch_event(sink: &Arc<dyn TelemetrySink>, event: ExecutionEvent) -> Option<JoinHandle<()>> {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::warn!(
            "⚠️ No async runtime available, dropping telemetry for service '{}'",
            event.service_id
        );
        return None;
    };

    let sink = Arc::clone(sink);
    Some(runtime.spawn(async move {
        let service_id = event.service_id.clone();
        if let Err(e) = sink.record(event).await {
            tracing::warn!("⚠️ Telemetry for service '{}' failed: {}", service_id, e);
        }
    }))
}
