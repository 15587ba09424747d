//! Observability setup for Conductor: the global tracing subscriber and the
//! optional OpenTelemetry span exporter.

pub mod tracing_setup;
