//! `cortex-runtime` – The Tick Loop
//!
//! The single consumer thread where behaviors run. Each tick advances the
//! intent arbitrator, freezes the messages that arrived since the previous
//! tick into the gate's cache, forwards trigger-word and app-intent traffic
//! to the arbitrator and then ticks every behavior in registration order.
//!
//! # Modules
//!
//! - [`behavior_system`] – [`BehaviorSystem`][behavior_system::BehaviorSystem]:
//!   owns the [`AsyncMessageGate`][cortex_middleware::AsyncMessageGate] and
//!   the [`UserIntentComponent`][cortex_kernel::UserIntentComponent], hosts
//!   [`Behavior`][behavior_system::Behavior]s, and drives them at a fixed
//!   rate through [`run_fixed_rate`][behavior_system::run_fixed_rate].
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter. Set `OTEL_EXPORTER_OTLP_ENDPOINT` to export the per-tick spans
//!   to any OTLP-compatible collector.

pub mod behavior_system;
pub mod telemetry;

pub use behavior_system::{
    APP_INTENT_TAG, Behavior, BehaviorContext, BehaviorStatus, BehaviorSystem, TRIGGER_WORD_TAG,
    TickSummary, run_fixed_rate,
};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
