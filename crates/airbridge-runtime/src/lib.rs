//! `airbridge-runtime` – orchestration of the cloud ⇄ middleware bridge.
//!
//! # Modules
//!
//! - [`bridge`] – [`Bridge`]: the event loop routing cloud messages to the
//!   dispatcher, container manager and collection toggles, and forwarding
//!   data samples, middleware logs and vitals to the cloud.
//! - [`containers`] – [`ContainerManager`] and the `docker compose` backed
//!   [`ComposeCli`].
//! - [`vitals`] – [`VitalsSource`], the `/proc` based [`HostVitals`] and the
//!   periodic sampler task.
//! - [`telemetry`] – [`init_tracing`]: the global `tracing` subscriber with an
//!   optional OTLP span exporter.

pub mod bridge;
pub mod containers;
pub mod telemetry;
pub mod vitals;

pub use bridge::Bridge;
pub use containers::{ComposeCli, ContainerManager, DisabledContainers, RegistryLogin};
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use vitals::{HostVitals, VitalsSource};
