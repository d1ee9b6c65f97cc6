// Adapters layer: concrete engines and telemetry sinks behind the domain ports.

pub mod script_engine;
pub mod telemetry;

pub use script_engine::{ScriptEngine, ScriptWorkbook};
pub use telemetry::{JsonLinesTelemetry, NoopTelemetry, TracingTelemetry};
