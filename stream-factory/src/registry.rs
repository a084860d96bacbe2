//! Component A: the alternative-service registry (spec §4.A).
//!
//! Grounded on `crates/hbone/src/pool.rs`'s `PoolState`: a map guarded by a
//! single lock, with a "guarded get" that double-checks identity before
//! handing a value back (here: filtering expired entries rather than
//! checking key collisions, since `HashMap` already guarantees exact-key
//! lookup). The registry is the one component the core spec requires to be
//! safely shared across task sequences (spec §5), so it uses `RwLock`
//! rather than assuming single-task-sequence access like every other
//! component.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

use stream_core::NetworkAnonymizationKey;
use tracing::debug;

use crate::alt_service::{AltServiceInfo, AlternativeService, BrokennessState, next_backoff};
use crate::config::Config;
use stream_core::Origin;

type RegistryKey = (Origin, NetworkAnonymizationKey);

#[derive(Default)]
struct OriginEntry {
	/// Ordered, preferred-first, as given to `set_alternatives`.
	alternatives: Vec<AltServiceInfo>,
	brokenness: HashMap<AlternativeService, BrokennessState>,
}

/// Thread-safe for concurrent readers and exclusive writers (spec §4.A
/// "Failure semantics").
pub struct Registry {
	state: RwLock<HashMap<RegistryKey, OriginEntry>>,
	initial_broken_delay: std::time::Duration,
	broken_delay_cap: std::time::Duration,
	ignore_ip_address_changes: bool,
}

impl Registry {
	pub fn new(config: &Config) -> Self {
		Self {
			state: RwLock::new(HashMap::new()),
			initial_broken_delay: config.alternative_service_broken_initial_delay,
			broken_delay_cap: config.alternative_service_broken_delay_cap,
			ignore_ip_address_changes: config.ignore_ip_address_changes,
		}
	}

	/// Replaces the stored list for `(origin, nak)`. Invariant (i)+(ii) of
	/// spec §3: any brokenness record for a service no longer in the list
	/// is dropped along with it.
	pub fn set_alternatives(
		&self,
		origin: &Origin,
		nak: &NetworkAnonymizationKey,
		services: Vec<AltServiceInfo>,
	) {
		let mut state = self.state.write().unwrap();
		let entry = state
			.entry((origin.clone(), nak.clone()))
			.or_default();
		let keep: std::collections::HashSet<_> =
			services.iter().map(|s| s.service.clone()).collect();
		entry.brokenness.retain(|svc, _| keep.contains(svc));
		entry.alternatives = services;
	}

	/// Non-expired entries, preference order preserved.
	pub fn get_alternatives(
		&self,
		origin: &Origin,
		nak: &NetworkAnonymizationKey,
		now: Instant,
	) -> Vec<AlternativeService> {
		let state = self.state.read().unwrap();
		let Some(entry) = state.get(&(origin.clone(), nak.clone())) else {
			return Vec::new();
		};
		entry
			.alternatives
			.iter()
			.filter(|info| !info.is_expired(now))
			.map(|info| info.service.clone())
			.collect()
	}

	pub fn is_broken(
		&self,
		origin: &Origin,
		nak: &NetworkAnonymizationKey,
		alt: &AlternativeService,
		now: Instant,
	) -> bool {
		let state = self.state.read().unwrap();
		state
			.get(&(origin.clone(), nak.clone()))
			.and_then(|e| e.brokenness.get(alt))
			.is_some_and(|b| b.forbids_use(now))
	}

	pub fn mark_broken(
		&self,
		origin: &Origin,
		nak: &NetworkAnonymizationKey,
		alt: &AlternativeService,
		now: Instant,
	) {
		let mut state = self.state.write().unwrap();
		let entry = state.entry((origin.clone(), nak.clone())).or_default();
		let failures = match entry.brokenness.get(alt) {
			Some(BrokennessState::Broken {
				consecutive_failures,
				..
			}) => consecutive_failures + 1,
			_ => 1,
		};
		let delay = next_backoff(self.initial_broken_delay, self.broken_delay_cap, failures);
		debug!(%origin, failures, ?delay, "marking alternative service broken");
		entry.brokenness.insert(
			alt.clone(),
			BrokennessState::Broken {
				retry_after: now + delay,
				consecutive_failures: failures,
			},
		);
	}

	pub fn mark_broken_until_default_network_changes(
		&self,
		origin: &Origin,
		nak: &NetworkAnonymizationKey,
		alt: &AlternativeService,
	) {
		let mut state = self.state.write().unwrap();
		let entry = state.entry((origin.clone(), nak.clone())).or_default();
		entry
			.brokenness
			.insert(alt.clone(), BrokennessState::BrokenUntilDefaultNetworkChanges);
	}

	/// Clears the softer brokenness state for every entry. Brokenness set
	/// via plain `mark_broken` (with its own expiring backoff) is left
	/// alone — only the "until default network changes" state resets here,
	/// per spec §4.A.
	pub fn on_default_network_changed(&self) {
		if self.ignore_ip_address_changes {
			return;
		}
		let mut state = self.state.write().unwrap();
		for entry in state.values_mut() {
			for b in entry.brokenness.values_mut() {
				if matches!(b, BrokennessState::BrokenUntilDefaultNetworkChanges) {
					*b = BrokennessState::Working;
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use stream_core::{Scheme, TransportProtocol};

	fn origin() -> Origin {
		Origin::new(Scheme::Https, "example.com", 443)
	}

	fn nak() -> NetworkAnonymizationKey {
		NetworkAnonymizationKey::from("nak1")
	}

	fn alt() -> AlternativeService {
		AlternativeService {
			protocol: TransportProtocol::Http2,
			host: "alt.example.com".into(),
			port: 443,
			advertised_quic_versions: vec![],
		}
	}

	fn info(svc: AlternativeService, expiration: Instant) -> AltServiceInfo {
		AltServiceInfo {
			service: svc,
			expiration,
		}
	}

	#[test]
	fn set_alternatives_is_idempotent() {
		let reg = Registry::new(&Config::default());
		let now = Instant::now();
		let far = now + std::time::Duration::from_secs(3600);
		let list = vec![info(alt(), far)];
		reg.set_alternatives(&origin(), &nak(), list.clone());
		let first = reg.get_alternatives(&origin(), &nak(), now);
		reg.set_alternatives(&origin(), &nak(), list);
		let second = reg.get_alternatives(&origin(), &nak(), now);
		assert_eq!(first, second);
	}

	#[test]
	fn expired_entries_are_filtered_on_read() {
		let reg = Registry::new(&Config::default());
		let now = Instant::now();
		let past = now - std::time::Duration::from_secs(1);
		reg.set_alternatives(&origin(), &nak(), vec![info(alt(), past)]);
		assert!(reg.get_alternatives(&origin(), &nak(), now).is_empty());
	}

	#[test]
	fn mark_broken_is_idempotent_but_backoff_is_nondecreasing() {
		let reg = Registry::new(&Config::default());
		let now = Instant::now();
		reg.mark_broken(&origin(), &nak(), &alt(), now);
		assert!(reg.is_broken(&origin(), &nak(), &alt(), now));
		reg.mark_broken(&origin(), &nak(), &alt(), now);
		assert!(reg.is_broken(&origin(), &nak(), &alt(), now));

		let state = reg.state.read().unwrap();
		let entry = &state[&(origin(), nak())];
		match &entry.brokenness[&alt()] {
			BrokennessState::Broken {
				consecutive_failures,
				..
			} => assert_eq!(*consecutive_failures, 2),
			other => panic!("unexpected state {other:?}"),
		}
	}

	#[test]
	fn removing_a_service_drops_its_brokenness_record() {
		let reg = Registry::new(&Config::default());
		let now = Instant::now();
		let far = now + std::time::Duration::from_secs(3600);
		reg.set_alternatives(&origin(), &nak(), vec![info(alt(), far)]);
		reg.mark_broken(&origin(), &nak(), &alt(), now);
		assert!(reg.is_broken(&origin(), &nak(), &alt(), now));

		reg.set_alternatives(&origin(), &nak(), vec![]);
		assert!(!reg.is_broken(&origin(), &nak(), &alt(), now));
	}

	#[test]
	fn on_default_network_changed_clears_only_the_soft_state() {
		let reg = Registry::new(&Config::default());
		let now = Instant::now();
		reg.mark_broken_until_default_network_changes(&origin(), &nak(), &alt());
		assert!(reg.is_broken(&origin(), &nak(), &alt(), now));
		reg.on_default_network_changed();
		assert!(!reg.is_broken(&origin(), &nak(), &alt(), now));
	}

	#[test]
	fn ignore_ip_address_changes_suppresses_the_clear() {
		let config = Config {
			ignore_ip_address_changes: true,
			..Config::default()
		};
		let reg = Registry::new(&config);
		let now = Instant::now();
		reg.mark_broken_until_default_network_changes(&origin(), &nak(), &alt());
		reg.on_default_network_changed();
		assert!(reg.is_broken(&origin(), &nak(), &alt(), now));
	}
}
