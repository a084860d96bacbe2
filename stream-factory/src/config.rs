use std::collections::HashSet;
use std::time::Duration;

use stream_core::QuicVersion;

/// Session-wide configuration, consumed per spec §6 "Configuration".
/// Follows the teacher's `serde`, `camelCase`, struct-of-fields-with-
/// `#[serde(default = ...)]` convention (see `client::Config` /
/// `telemetry::metrics::Config` in the teacher pack).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
	#[serde(default = "default_true")]
	pub enable_http2: bool,
	#[serde(default = "default_true")]
	pub enable_quic: bool,
	#[serde(default)]
	pub supported_quic_versions: Vec<QuicVersion>,
	#[serde(default)]
	pub quic_host_allowlist: HashSet<Box<str>>,
	#[serde(default)]
	pub enable_user_alternate_protocol_ports: bool,
	#[serde(default = "default_true")]
	pub delay_main_job_with_available_spdy_session: bool,
	#[serde(default)]
	pub ignore_ip_address_changes: bool,

	/// How long a freshly `mark_broken`'d alt-service is excluded before
	/// the first retry is allowed. Not specified exactly by spec §4.A
	/// ("configurable"); Chromium's default is 5s
	/// (`kBrokenAlternativeProtocolDelay`).
	#[serde(default = "default_broken_delay", with = "duration_millis")]
	pub alternative_service_broken_initial_delay: Duration,

	/// Cap on the exponential brokenness backoff (spec §4.A).
	#[serde(default = "default_broken_delay_cap", with = "duration_millis")]
	pub alternative_service_broken_delay_cap: Duration,

	/// How long a Main Job pauses in `Wait` to let a sibling HTTP/2
	/// session materialise (spec §4.B). ~300ms, exact value
	/// implementation-defined.
	#[serde(default = "default_main_job_wait_time", with = "duration_millis")]
	pub main_job_wait_time: Duration,

	/// Bound on the delayed main-job unblock timer (spec §4.C step 3,
	/// §5). Fixed at 3s by the spec, but kept configurable for tests.
	#[serde(default = "default_max_delay", with = "duration_millis")]
	pub max_main_job_unblock_delay: Duration,

	/// Cap on the preconnecting-proxy dedup set (spec §3, §4.E).
	#[serde(default = "default_preconnect_proxy_cap")]
	pub preconnect_proxy_cap: usize,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			enable_http2: true,
			enable_quic: true,
			supported_quic_versions: Vec::new(),
			quic_host_allowlist: HashSet::new(),
			enable_user_alternate_protocol_ports: false,
			delay_main_job_with_available_spdy_session: true,
			ignore_ip_address_changes: false,
			alternative_service_broken_initial_delay: default_broken_delay(),
			alternative_service_broken_delay_cap: default_broken_delay_cap(),
			main_job_wait_time: default_main_job_wait_time(),
			max_main_job_unblock_delay: default_max_delay(),
			preconnect_proxy_cap: default_preconnect_proxy_cap(),
		}
	}
}

fn default_true() -> bool {
	true
}
fn default_broken_delay() -> Duration {
	Duration::from_secs(5)
}
fn default_broken_delay_cap() -> Duration {
	Duration::from_secs(60 * 60 * 24 * 2)
}
fn default_main_job_wait_time() -> Duration {
	Duration::from_millis(300)
}
fn default_max_delay() -> Duration {
	Duration::from_secs(3)
}
fn default_preconnect_proxy_cap() -> usize {
	3
}

mod duration_millis {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
		s.serialize_u64(d.as_millis() as u64)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
		let ms = u64::deserialize(d)?;
		Ok(Duration::from_millis(ms))
	}
}
