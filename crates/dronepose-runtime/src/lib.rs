//! `dronepose-runtime` – the observer process core.
//!
//! # Modules
//!
//! - [`observer`] – [`ObserverLoop`][observer::ObserverLoop]: the single
//!   task that ingests sensor samples, runs the fusion step at a fixed rate
//!   and hands each pose to the configured sinks.
//! - [`source_monitor`] – [`SourceMonitor`][source_monitor::SourceMonitor]:
//!   per-source freshness tracking; stale sources are logged, published as
//!   diagnostics and attached to every pose.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber with an optional OTLP span exporter.  Set
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` to enable export.

pub mod observer;
pub mod source_monitor;
pub mod telemetry;

pub use observer::{ObserverConfig, ObserverLoop, ObserverStats};
pub use source_monitor::{SourceHealth, SourceMonitor};
pub use telemetry::{TracerProviderGuard, init_tracing};
