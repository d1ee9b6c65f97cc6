pub mod cache;
pub mod calculation;
pub mod coercion;
pub mod executor;
pub mod result;

pub use crate::domain::model::{
    CellAddress, CellValue, DefaultValue, ExecutionError, ExecutionRequest, ExecutionResponse,
    ExecutionResult, ModelSource, ParamType, ParameterDefinition, RequestInfo, ServiceDescriptor,
};
pub use crate::domain::ports::{CalculationEngine, LoadOptions, TelemetrySink, Workbook};
pub use crate::utils::error::Result;
