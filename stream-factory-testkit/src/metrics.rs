//! A `prometheus_client`-backed [`Metrics`]. Grounded on
//! `telemetry::metrics::Metrics` in the teacher pack: one `Family<Labels,
//! Counter>` per event, registered into a caller-owned `Registry` at
//! construction time.

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;
use stream_core::{Origin, TransportProtocol};
use stream_factory::{JobType, Metrics};

#[derive(Clone, Hash, Default, Debug, PartialEq, Eq, EncodeLabelSet)]
struct JobLabels {
	kind: JobKindLabel,
}

#[derive(Clone, Copy, Hash, Default, Debug, PartialEq, Eq, EncodeLabelValue)]
enum JobKindLabel {
	#[default]
	Main,
	Alternative,
	DnsAlpnH3,
	Preconnect,
	PreconnectDnsAlpnH3,
}

impl From<JobType> for JobKindLabel {
	fn from(kind: JobType) -> Self {
		match kind {
			JobType::Main => JobKindLabel::Main,
			JobType::Alternative => JobKindLabel::Alternative,
			JobType::DnsAlpnH3 => JobKindLabel::DnsAlpnH3,
			JobType::Preconnect => JobKindLabel::Preconnect,
			JobType::PreconnectDnsAlpnH3 => JobKindLabel::PreconnectDnsAlpnH3,
		}
	}
}

#[derive(Clone, Copy, Hash, Default, Debug, PartialEq, Eq, EncodeLabelValue)]
enum ProtocolLabel {
	#[default]
	Unknown,
	Http1,
	Http2,
	Quic,
}

impl From<TransportProtocol> for ProtocolLabel {
	fn from(protocol: TransportProtocol) -> Self {
		match protocol {
			TransportProtocol::Unknown => ProtocolLabel::Unknown,
			TransportProtocol::Http1_1 => ProtocolLabel::Http1,
			TransportProtocol::Http2 => ProtocolLabel::Http2,
			TransportProtocol::Quic(_) => ProtocolLabel::Quic,
		}
	}
}

#[derive(Clone, Hash, Default, Debug, PartialEq, Eq, EncodeLabelSet)]
struct StreamBoundLabels {
	kind: JobKindLabel,
	protocol: ProtocolLabel,
}

type JobCounter = Family<JobLabels, Counter>;

pub struct PrometheusMetrics {
	jobs_started: JobCounter,
	jobs_bound: JobCounter,
	jobs_orphaned: JobCounter,
	alt_services_broken: Counter,
	alt_services_broken_until_network_change: Counter,
	main_job_blocked: Counter,
	main_job_unblocked: Counter,
	proxy_fallbacks: Counter,
	streams_bound: Family<StreamBoundLabels, Counter>,
	streams_alpn_negotiated: Counter,
	streams_using_spdy: Counter,
}

impl PrometheusMetrics {
	pub fn new(registry: &mut Registry) -> Self {
		let mut build_job_counter = |name: &str, help: &str| -> JobCounter {
			let m = JobCounter::default();
			registry.register(name, help, m.clone());
			m
		};
		let mut build_counter = |name: &str, help: &str| -> Counter {
			let m = Counter::default();
			registry.register(name, help, m.clone());
			m
		};
		let streams_bound = Family::<StreamBoundLabels, Counter>::default();
		registry.register(
			"streams_bound",
			"Streams delivered to a delegate, by job kind and negotiated protocol",
			streams_bound.clone(),
		);
		Self {
			jobs_started: build_job_counter("jobs_started", "Jobs started, by kind"),
			jobs_bound: build_job_counter("jobs_bound", "Jobs whose stream was bound to a request, by kind"),
			jobs_orphaned: build_job_counter("jobs_orphaned", "Jobs orphaned after another won the race, by kind"),
			alt_services_broken: build_counter(
				"alt_services_marked_broken",
				"Alternative services marked broken with a backoff",
			),
			alt_services_broken_until_network_change: build_counter(
				"alt_services_marked_broken_until_network_change",
				"Alternative services marked broken until the default network changes",
			),
			main_job_blocked: build_counter("main_job_blocked", "Main jobs blocked behind an alternative job"),
			main_job_unblocked: build_counter("main_job_unblocked", "Main jobs unblocked"),
			proxy_fallbacks: build_counter("proxy_fallbacks", "Controller proxy fallback advances"),
			streams_bound,
			streams_alpn_negotiated: build_counter(
				"streams_alpn_negotiated",
				"Bound streams whose protocol was negotiated via ALPN",
			),
			streams_using_spdy: build_counter(
				"streams_using_spdy",
				"Bound streams multiplexed over an existing HTTP/2 or QUIC session",
			),
		}
	}
}

impl Metrics for PrometheusMetrics {
	fn job_started(&self, kind: JobType) {
		self.jobs_started.get_or_create(&JobLabels { kind: kind.into() }).inc();
	}

	fn job_bound(&self, kind: JobType) {
		self.jobs_bound.get_or_create(&JobLabels { kind: kind.into() }).inc();
	}

	fn job_orphaned(&self, kind: JobType) {
		self.jobs_orphaned.get_or_create(&JobLabels { kind: kind.into() }).inc();
	}

	fn alt_service_marked_broken(&self, _origin: &Origin) {
		self.alt_services_broken.inc();
	}

	fn alt_service_marked_broken_until_network_change(&self, _origin: &Origin) {
		self.alt_services_broken_until_network_change.inc();
	}

	fn main_job_blocked(&self) {
		self.main_job_blocked.inc();
	}

	fn main_job_unblocked(&self) {
		self.main_job_unblocked.inc();
	}

	fn proxy_fallback(&self) {
		self.proxy_fallbacks.inc();
	}

	fn stream_bound(
		&self,
		kind: JobType,
		protocol: TransportProtocol,
		was_alpn_negotiated: bool,
		using_spdy: bool,
	) {
		self.streams_bound
			.get_or_create(&StreamBoundLabels {
				kind: kind.into(),
				protocol: protocol.into(),
			})
			.inc();
		if was_alpn_negotiated {
			self.streams_alpn_negotiated.inc();
		}
		if using_spdy {
			self.streams_using_spdy.inc();
		}
	}
}
