//! In-memory fakes for the external interfaces `stream-factory` consumes
//! (spec §6), plus a concrete `HostMappingRules` and a
//! `prometheus_client`-backed `Metrics`. Exercised by `stream-factory`'s own
//! integration tests; not part of the deliverable library surface any
//! caller of the factory needs.

pub mod delegate;
pub mod host_mapping;
pub mod metrics;
pub mod pool;
pub mod proxy;

pub use delegate::{DelegateEvent, RecordingDelegate};
pub use host_mapping::ChromiumHostMappingRules;
pub use metrics::PrometheusMetrics;
pub use pool::{FakeConnectionPool, ScriptedAttempt, TestStream};
pub use proxy::FakeProxyResolver;
