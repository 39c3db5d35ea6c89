//! Observability setup for Tasker: tracing subscriber and optional
//! OpenTelemetry export.

pub mod tracing_setup;
