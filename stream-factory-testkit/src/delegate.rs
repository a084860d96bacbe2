//! A [`RequestDelegate`] that records every callback it receives instead of
//! acting on it, so tests can assert on the sequence and payload of events
//! a Controller delivered. Grounded on the same "recording fake" idiom as
//! `crates/hbone`'s test helpers.

use parking_lot::Mutex;
use stream_factory::{ProxyInfo, RequestDelegate, StreamError};

use crate::pool::TestStream;

#[derive(Debug, Clone)]
pub enum DelegateEvent {
	StreamReady(TestStream),
	BidirectionalStreamReady(TestStream),
	WebSocketHandshakeStreamReady(TestStream),
	StreamFailed(StreamError),
	CertificateError(StreamError),
	NeedsProxyAuth,
	NeedsClientAuth,
	HttpsProxyTunnelResponse,
	QuicBroken,
}

/// Records every delegate callback in arrival order. Spec §5's "at most one
/// terminal callback per Request" invariant is a property of this recorder
/// a test can assert on directly: exactly one of `StreamReady` /
/// `BidirectionalStreamReady` / `WebSocketHandshakeStreamReady` /
/// `StreamFailed` should appear.
#[derive(Default)]
pub struct RecordingDelegate {
	events: Mutex<Vec<DelegateEvent>>,
}

impl RecordingDelegate {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn events(&self) -> Vec<DelegateEvent> {
		self.events.lock().clone()
	}

	pub fn terminal_count(&self) -> usize {
		self.events()
			.iter()
			.filter(|e| {
				matches!(
					e,
					DelegateEvent::StreamReady(_)
						| DelegateEvent::BidirectionalStreamReady(_)
						| DelegateEvent::WebSocketHandshakeStreamReady(_)
						| DelegateEvent::StreamFailed(_)
				)
			})
			.count()
	}
}

impl RequestDelegate for RecordingDelegate {
	type Stream = TestStream;

	fn on_stream_ready(&self, _proxy_info: ProxyInfo, stream: Self::Stream) {
		self.events.lock().push(DelegateEvent::StreamReady(stream));
	}

	fn on_bidirectional_stream_ready(&self, _proxy_info: ProxyInfo, stream: Self::Stream) {
		self.events
			.lock()
			.push(DelegateEvent::BidirectionalStreamReady(stream));
	}

	fn on_websocket_handshake_stream_ready(&self, _proxy_info: ProxyInfo, stream: Self::Stream) {
		self.events
			.lock()
			.push(DelegateEvent::WebSocketHandshakeStreamReady(stream));
	}

	fn on_stream_failed(
		&self,
		error: StreamError,
		_proxy_info: ProxyInfo,
		_resolve_error_info: Option<String>,
	) {
		self.events.lock().push(DelegateEvent::StreamFailed(error));
	}

	fn on_certificate_error(&self, error: StreamError) {
		self.events.lock().push(DelegateEvent::CertificateError(error));
	}

	fn on_needs_proxy_auth(&self, _proxy_info: ProxyInfo) {
		self.events.lock().push(DelegateEvent::NeedsProxyAuth);
	}

	fn on_needs_client_auth(&self) {
		self.events.lock().push(DelegateEvent::NeedsClientAuth);
	}

	fn on_https_proxy_tunnel_response(&self, _proxy_info: ProxyInfo) {
		self.events.lock().push(DelegateEvent::HttpsProxyTunnelResponse);
	}

	fn on_quic_broken(&self) {
		self.events.lock().push(DelegateEvent::QuicBroken);
	}
}
