// Domain layer: data model and ports for the external collaborators (engine, telemetry).

pub mod model;
pub mod ports;
