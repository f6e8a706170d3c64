//! `mocap-runtime` – Session orchestration for the mocap bridge.
//!
//! # Modules
//!
//! - [`driver`] – [`StreamingDriver`][driver::StreamingDriver]: connects to
//!   the capture server, resolves the body index map under exclusive
//!   control, then streams frames through the
//!   [`FrameTranslator`][mocap_core::FrameTranslator] to a
//!   [`PosePublisher`][mocap_middleware::PosePublisher] until shutdown or end
//!   of stream.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber with an optional OTLP span exporter.  Set
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` to export session spans to Jaeger, Grafana
//!   Tempo, or any OTLP-compatible collector.

pub mod driver;
pub mod telemetry;

pub use driver::{
    DriverConfig, SessionReport, SessionState, StopReason, StreamStats, StreamingDriver,
};
pub use telemetry::{TracerProviderGuard, init_tracing};
