use std::time::{Duration, Instant};

use stream_core::{QuicVersion, TransportProtocol};

/// `{ protocol, host, port, expiration_time, advertised_quic_versions }`.
/// Describes a server's advertisement that a given origin is also
/// reachable at another `(host, port)` speaking some protocol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlternativeService {
	pub protocol: TransportProtocol,
	pub host: Box<str>,
	pub port: u16,
	pub advertised_quic_versions: Vec<QuicVersion>,
}

/// An [`AlternativeService`] plus the expiration the registry tracks it
/// under. Kept separate from `AlternativeService` because expiration is
/// registry bookkeeping, not part of the service's identity (two records
/// for the same `(protocol, host, port)` with different expirations are
/// the same alt-service being re-advertised, not two alt-services).
#[derive(Debug, Clone)]
pub struct AltServiceInfo {
	pub service: AlternativeService,
	pub expiration: Instant,
}

impl AltServiceInfo {
	pub fn is_expired(&self, now: Instant) -> bool {
		self.expiration <= now
	}
}

/// Per-`(alt_service, network_anonymization_key)` brokenness state (spec
/// §3). `Broken` additionally carries the exponential backoff bookkeeping.
#[derive(Debug, Clone)]
pub enum BrokennessState {
	Working,
	BrokenUntilDefaultNetworkChanges,
	Broken { retry_after: Instant, consecutive_failures: u32 },
}

impl BrokennessState {
	pub fn forbids_use(&self, now: Instant) -> bool {
		match self {
			BrokennessState::Working => false,
			BrokennessState::BrokenUntilDefaultNetworkChanges => true,
			BrokennessState::Broken { retry_after, .. } => now < *retry_after,
		}
	}
}

/// Saturating exponential backoff: `initial * 2^(failures - 1)`, capped.
/// Integer millisecond arithmetic per spec §4.A; never wraps.
pub fn next_backoff(initial: Duration, cap: Duration, consecutive_failures: u32) -> Duration {
	let initial_ms = initial.as_millis().min(u128::from(u64::MAX)) as u64;
	let cap_ms = cap.as_millis().min(u128::from(u64::MAX)) as u64;
	let shift = consecutive_failures.saturating_sub(1).min(63);
	let scaled = initial_ms.checked_shl(shift).unwrap_or(u64::MAX);
	Duration::from_millis(scaled.min(cap_ms))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn backoff_is_nondecreasing_and_saturates() {
		let initial = Duration::from_millis(100);
		let cap = Duration::from_secs(60);
		let mut prev = Duration::ZERO;
		for failures in 1..=40 {
			let d = next_backoff(initial, cap, failures);
			assert!(d >= prev, "backoff decreased at failure {failures}");
			assert!(d <= cap);
			prev = d;
		}
	}

	#[test]
	fn expiration_boundary_is_expired() {
		let now = Instant::now();
		let info = AltServiceInfo {
			service: AlternativeService {
				protocol: TransportProtocol::Http2,
				host: "example.com".into(),
				port: 443,
				advertised_quic_versions: vec![],
			},
			expiration: now,
		};
		assert!(info.is_expired(now));
	}
}
