use crate::core::cache::{WorkbookCache, WorkbookHandle};
use crate::core::calculation::{run_calculation, Exclusive, Isolation, PerOperation};
use crate::core::coercion::{coerce_inputs, CoercedInput};
use crate::core::result::{dispatch_event, ResultBuilder};
use crate::domain::model::{
    ExecutionError, ExecutionRequest, ExecutionResult, RequestInfo, ResolvedOutput,
    ServiceDescriptor,
};
use crate::domain::ports::{CalculationEngine, TelemetrySink};
use crate::utils::error::{Result, ServiceError};
use serde_json::{Map, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy)]
pub struct ExecutionOptions {
    pub isolation: Isolation,
    /// Evict a service's cached workbook after a calculation error, since inputs
    /// written before the failure stay in the shared model.
    pub invalidate_on_error: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            isolation: Isolation::PerExecution,
            invalidate_on_error: true,
        }
    }
}

/// Runs spreadsheet services: validate, look up the workbook, calculate, respond.
pub struct ServiceExecutor<E: CalculationEngine> {
    engine: E,
    cache: Arc<WorkbookCache<E::Workbook>>,
    telemetry: Arc<dyn TelemetrySink>,
    pending_events: Mutex<Vec<JoinHandle<()>>>,
    options: ExecutionOptions,
}

impl<E: CalculationEngine> ServiceExecutor<E> {
    pub fn new(
        engine: E,
        cache: Arc<WorkbookCache<E::Workbook>>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            engine,
            cache,
            telemetry,
            pending_events: Mutex::new(Vec::new()),
            options: ExecutionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    pub fn cache(&self) -> &Arc<WorkbookCache<E::Workbook>> {
        &self.cache
    }

    /// Drop the cached workbook of a service whose model changed.
    pub fn invalidate(&self, service_id: &str) -> bool {
        self.cache.clear(Some(service_id)) > 0
    }

    pub async fn execute(
        &self,
        service: &ServiceDescriptor,
        inputs: &Map<String, Value>,
        request: &RequestInfo,
    ) -> std::result::Result<ExecutionResult, ExecutionError> {
        let mut builder = ResultBuilder::start(service);
        tracing::debug!(
            "Executing service '{}' with {} input(s)",
            service.id,
            inputs.len()
        );

        let outcome = self.run(service, inputs, &mut builder).await;

        match &outcome {
            Ok(result) => tracing::info!(
                "✅ Service '{}' executed in {}ms (cached: {})",
                service.id,
                result.metadata.execution_time,
                result.metadata.cached
            ),
            Err(error) => tracing::warn!(
                "❌ Service '{}' failed after {}ms: {}",
                service.id,
                builder.elapsed_ms(),
                error
            ),
        }

        if let Some(task) = dispatch_event(&self.telemetry, builder.event(&outcome, request)) {
            if let Ok(mut pending) = self.pending_events.lock() {
                pending.retain(|task| !task.is_finished());
                pending.push(task);
            }
        }
        outcome
    }

    /// Wait until every telemetry event dispatched so far has reached the sink.
    pub async fn flush_telemetry(&self) {
        let pending = match self.pending_events.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => return,
        };
        for task in pending {
            if let Err(e) = task.await {
                tracing::warn!("⚠️ Telemetry task did not complete: {}", e);
            }
        }
    }

    pub async fn execute_request(
        &self,
        service: &ServiceDescriptor,
        request: &ExecutionRequest,
    ) -> std::result::Result<ExecutionResult, ExecutionError> {
        self.execute(service, &request.inputs, &request.request).await
    }

    async fn run(
        &self,
        service: &ServiceDescriptor,
        inputs: &Map<String, Value>,
        builder: &mut ResultBuilder<'_>,
    ) -> std::result::Result<ExecutionResult, ExecutionError> {
        // 驗證失敗時不會寫入任何儲存格
        let coerced = coerce_inputs(service, inputs)?;

        let (handle, cached) = self
            .cache
            .get(&self.engine, &service.id, &service.model)
            .map_err(|e| ExecutionError::calculation(e.to_string()))?;
        builder.mark_cached(cached);

        let outputs = self.calculate(&handle, service, &coerced).await.map_err(|e| {
            if self.options.invalidate_on_error || handle.workbook().is_poisoned() {
                tracing::warn!(
                    "🧹 Invalidating cached workbook for service '{}' after calculation error",
                    service.id
                );
                self.cache.clear(Some(&service.id));
            }
            ExecutionError::calculation(e.to_string())
        })?;

        Ok(builder.success(&coerced, outputs))
    }

    async fn calculate(
        &self,
        handle: &WorkbookHandle<E::Workbook>,
        service: &ServiceDescriptor,
        inputs: &[CoercedInput<'_>],
    ) -> Result<Vec<ResolvedOutput>> {
        let _turn = match self.options.isolation {
            Isolation::PerExecution => Some(handle.turn().await),
            Isolation::PerOperation => None,
        };

        let attempt = catch_unwind(AssertUnwindSafe(|| match self.options.isolation {
            Isolation::PerExecution => {
                let mut workbook = handle
                    .workbook()
                    .lock()
                    .map_err(|_| ServiceError::engine("workbook lock poisoned by an earlier failure"))?;
                run_calculation(&mut Exclusive(&mut *workbook), service, inputs)
            }
            Isolation::PerOperation => run_calculation(&mut PerOperation(handle.workbook()), service, inputs),
        }));

        attempt.unwrap_or_else(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "calculation engine panicked".to_string());
            Err(ServiceError::engine(message))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{CellValue, ErrorKind, ModelSource, ParamType, ParameterDefinition};
    use crate::domain::ports::{LoadOptions, Workbook};
    use crate::adapters::telemetry::NoopTelemetry;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Single-sheet workbook that panics when a negative number is written.
    struct FragileWorkbook {
        value: CellValue,
    }

    impl Workbook for FragileWorkbook {
        fn active_sheet_name(&self) -> &str {
            "S"
        }

        fn default_sheet_name(&self) -> &str {
            "S"
        }

        fn has_sheet(&self, name: &str) -> bool {
            name == "S"
        }

        fn activate_sheet(&mut self, _name: &str) -> Result<()> {
            Ok(())
        }

        fn dimensions(&self) -> (u32, u32) {
            (5, 5)
        }

        fn cell_value(&self, _row: u32, _col: u32) -> Result<CellValue> {
            Ok(self.value.clone())
        }

        fn set_cell_value(&mut self, _row: u32, _col: u32, value: CellValue) -> Result<()> {
            if let CellValue::Number(n) = value {
                if n < 0.0 {
                    panic!("negative values are not supported");
                }
            }
            self.value = value;
            Ok(())
        }
    }

    #[derive(Default)]
    struct FragileEngine {
        loads: AtomicUsize,
    }

    impl CalculationEngine for FragileEngine {
        type Workbook = FragileWorkbook;

        fn load(&self, _model: &[u8], _options: &LoadOptions) -> Result<FragileWorkbook> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(FragileWorkbook {
                value: CellValue::Empty,
            })
        }
    }

    fn service() -> ServiceDescriptor {
        ServiceDescriptor::new(
            "fragile",
            "Fragile",
            vec![ParameterDefinition::new("x", "S!A1", ParamType::Number).unwrap()],
            vec![ParameterDefinition::new("y", "S!A1", ParamType::Number).unwrap()],
            ModelSource::Inline(String::new()),
        )
    }

    fn executor(isolation: Isolation) -> ServiceExecutor<FragileEngine> {
        ServiceExecutor::new(
            FragileEngine::default(),
            Arc::new(WorkbookCache::default()),
            Arc::new(NoopTelemetry),
        )
        .with_options(ExecutionOptions {
            isolation,
            invalidate_on_error: false,
        })
    }

    fn inputs(value: serde_json::Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_engine_panic_becomes_calculation_error() {
        let executor = executor(Isolation::PerExecution);
        let error = executor
            .execute(&service(), &inputs(json!({ "x": -1 })), &RequestInfo::default())
            .await
            .unwrap_err();

        assert_eq!(error.error, ErrorKind::Calculation);
        assert!(error.message.contains("negative values"));
        // 鎖已中毒，即使設定為保留也必須移除
        assert!(!executor.cache().contains("fragile"));

        let result = executor
            .execute(&service(), &inputs(json!({ "x": 4 })), &RequestInfo::default())
            .await
            .unwrap();
        assert_eq!(result.output("y"), Some(&json!(4)));
        assert!(!result.metadata.cached);
        assert_eq!(executor.engine().loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panic_under_per_operation_isolation() {
        let executor = executor(Isolation::PerOperation);
        let error = executor
            .execute(&service(), &inputs(json!({ "x": -3 })), &RequestInfo::default())
            .await
            .unwrap_err();
        assert_eq!(error.error, ErrorKind::Calculation);
        assert!(!executor.cache().contains("fragile"));
    }

    #[test]
    fn test_execute_from_blocking_context() {
        let executor = executor(Isolation::PerExecution);
        let request = ExecutionRequest {
            inputs: inputs(json!({ "X": "2.5" })),
            request: RequestInfo::default(),
        };
        let result = tokio_test::block_on(executor.execute_request(&service(), &request)).unwrap();
        assert_eq!(result.output("y"), Some(&json!(2.5)));
        assert_eq!(executor.options().isolation, Isolation::PerExecution);
    }

    #[tokio::test]
    async fn test_waiting_for_busy_workbook_yields_to_runtime() {
        let executor = Arc::new(executor(Isolation::PerExecution));
        let svc = Arc::new(service());
        executor
            .execute(&svc, &inputs(json!({ "x": 1 })), &RequestInfo::default())
            .await
            .unwrap();

        let (handle, hit) = executor.cache().get(executor.engine(), &svc.id, &svc.model).unwrap();
        assert!(hit);
        let turn = handle.turn().await;

        let task = {
            let (executor, svc) = (Arc::clone(&executor), Arc::clone(&svc));
            tokio::spawn(async move {
                executor
                    .execute(&svc, &inputs(json!({ "x": 9 })), &RequestInfo::default())
                    .await
            })
        };
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(!task.is_finished());

        drop(turn);
        let result = task.await.unwrap().unwrap();
        assert_eq!(result.output("y"), Some(&json!(9)));
    }

    struct SlowSink(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl TelemetrySink for SlowSink {
        async fn record(&self, _event: crate::domain::model::ExecutionEvent) -> Result<()> {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_flush_waits_for_dispatched_events() {
        let recorded = Arc::new(AtomicUsize::new(0));
        let executor = ServiceExecutor::new(
            FragileEngine::default(),
            Arc::new(WorkbookCache::default()),
            Arc::new(SlowSink(Arc::clone(&recorded))),
        );

        for x in [1, 2, 3] {
            executor
                .execute(&service(), &inputs(json!({ "x": x })), &RequestInfo::default())
                .await
                .unwrap();
        }
        executor.flush_telemetry().await;
        assert_eq!(recorded.load(Ordering::SeqCst), 3);
    }
}
