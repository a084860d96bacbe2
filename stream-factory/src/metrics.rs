//! Redesigned per spec §9: "Global histograms / telemetry and module-level
//! counters... factor out as a `Metrics` trait passed into the Factory; the
//! core emits events, the collaborator aggregates." Mirrors the shape of
//! `telemetry::metrics::Metrics` in the teacher pack, minus the
//! `prometheus_client` dependency itself — see `stream-factory-testkit`
//! for a concrete Prometheus-backed implementation.

use stream_core::{Origin, TransportProtocol};

use crate::job::JobType;

/// One method per observable event a Controller/Factory can emit. All
/// methods default to doing nothing, so a unit struct is a valid
/// zero-cost implementation.
pub trait Metrics: Send + Sync + 'static {
	fn job_started(&self, _kind: JobType) {}
	fn job_bound(&self, _kind: JobType) {}
	fn job_orphaned(&self, _kind: JobType) {}
	fn alt_service_marked_broken(&self, _origin: &Origin) {}
	fn alt_service_marked_broken_until_network_change(&self, _origin: &Origin) {}
	fn main_job_blocked(&self) {}
	fn main_job_unblocked(&self) {}
	fn proxy_fallback(&self) {}

	/// A stream was handed to the delegate: the negotiated protocol plus
	/// the two bits `deliver_stream` otherwise discards.
	fn stream_bound(
		&self,
		_kind: JobType,
		_protocol: TransportProtocol,
		_was_alpn_negotiated: bool,
		_using_spdy: bool,
	) {
	}
}

/// The default: discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {}
