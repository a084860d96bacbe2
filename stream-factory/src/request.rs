//! Component D: the caller's typed handle (spec §4.D).
//!
//! Grounded on `crates/agentgateway/src/client/mod.rs`'s `Call`/`Client`
//! split — a thin caller-facing value backed by an owning driver — and the
//! Drop-based cancellation idiom used throughout the teacher pack.

use std::marker::PhantomData;

use crate::controller::{ConnectionAttempt, ControllerHandle};
use crate::error::StreamError;
use crate::interfaces::{Priority, ProxyInfo, RequestDelegate, StreamKind};
use crate::job::{JobState, JobType};

/// Isolates the caller's lifetime from the Jobs racing on its behalf.
/// Dropping a `Request` notifies the Controller (spec §5 "Cancellation");
/// orphaned Jobs still running to report brokenness are unaffected.
///
/// Carries the spec §3 Request data model: the stream kind originally asked
/// for, the live priority and accumulated connection attempts (read through
/// to the Controller, which is the side actually mutating them), and the
/// completion flag.
pub struct Request {
	controller: ControllerHandle,
	stream_kind: StreamKind,
}

impl Request {
	pub(crate) fn new(controller: ControllerHandle, stream_kind: StreamKind) -> Self {
		Self { controller, stream_kind }
	}

	/// Forwarded to the Controller, which fans it out to every live Job.
	pub fn set_priority(&self, p: Priority) {
		self.controller.set_priority(p);
	}

	/// Forwarded to the Controller's bound Job, if any.
	pub fn restart_tunnel_with_proxy_auth(&self) {
		self.controller.restart_tunnel_with_proxy_auth();
	}

	/// The load state of the Controller's current dominant Job: bound Job
	/// if present, else Main, else Alternative, else DNS-ALPN-H3. `None`
	/// once no Job is left to report through (request already completed).
	pub fn load_state(&self) -> Option<(JobType, JobState)> {
		self.controller.load_state()
	}

	/// What the caller originally asked for (spec §3 Request data model).
	pub fn stream_kind(&self) -> StreamKind {
		self.stream_kind
	}

	/// Current priority (spec §3 Request data model), as last set via
	/// `set_priority` or the value the Request was created with.
	pub fn priority(&self) -> Priority {
		self.controller.priority()
	}

	/// Every endpoint/proxy attempt made by this Request's Jobs so far
	/// (spec §3 Request data model).
	pub fn connection_attempts(&self) -> Vec<ConnectionAttempt> {
		self.controller.connection_attempts()
	}

	/// Spec §3 Request data model "completion flag": once `true`, the
	/// Controller has delivered its one terminal delegate callback and will
	/// deliver no more.
	pub fn is_completed(&self) -> bool {
		self.controller.is_completed()
	}
}

impl Drop for Request {
	fn drop(&mut self) {
		self.controller.cancel();
	}
}

/// A [`RequestDelegate`] that discards every callback. Used for
/// preconnect-only Controllers (spec §4.E `preconnect_streams`), which warm
/// sockets for a future request rather than serve one directly.
pub struct NoopRequestDelegate<S>(PhantomData<fn() -> S>);

impl<S> Default for NoopRequestDelegate<S> {
	fn default() -> Self {
		Self(PhantomData)
	}
}

impl<S: Send + 'static> RequestDelegate for NoopRequestDelegate<S> {
	type Stream = S;

	fn on_stream_ready(&self, _proxy_info: ProxyInfo, _stream: Self::Stream) {}
	fn on_bidirectional_stream_ready(&self, _proxy_info: ProxyInfo, _stream: Self::Stream) {}
	fn on_websocket_handshake_stream_ready(&self, _proxy_info: ProxyInfo, _stream: Self::Stream) {}
	fn on_stream_failed(
		&self,
		_error: StreamError,
		_proxy_info: ProxyInfo,
		_resolve_error_info: Option<String>,
	) {
	}
	fn on_certificate_error(&self, _error: StreamError) {}
	fn on_needs_proxy_auth(&self, _proxy_info: ProxyInfo) {}
	fn on_needs_client_auth(&self) {}
	fn on_https_proxy_tunnel_response(&self, _proxy_info: ProxyInfo) {}
	fn on_quic_broken(&self) {}
}
