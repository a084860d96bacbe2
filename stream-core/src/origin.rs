use std::fmt;
use std::sync::Arc;

/// `{ scheme, host, port }` after host-mapping rules have been applied.
/// Two origins are equal iff all three components match exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
	pub scheme: Scheme,
	pub host: Arc<str>,
	pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
	Http,
	Https,
	Ws,
	Wss,
}

impl Scheme {
	pub fn is_secure(self) -> bool {
		matches!(self, Scheme::Https | Scheme::Wss)
	}

	pub fn default_port(self) -> u16 {
		match self {
			Scheme::Http | Scheme::Ws => 80,
			Scheme::Https | Scheme::Wss => 443,
		}
	}
}

impl fmt::Display for Scheme {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Scheme::Http => "http",
			Scheme::Https => "https",
			Scheme::Ws => "ws",
			Scheme::Wss => "wss",
		};
		f.write_str(s)
	}
}

impl Origin {
	pub fn new(scheme: Scheme, host: impl Into<Arc<str>>, port: u16) -> Self {
		Self {
			scheme,
			host: host.into(),
			port,
		}
	}
}

impl fmt::Display for Origin {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn equality_requires_all_three_components() {
		let a = Origin::new(Scheme::Https, "example.com", 443);
		let b = Origin::new(Scheme::Https, "example.com", 443);
		let c = Origin::new(Scheme::Https, "example.com", 8443);
		assert_eq!(a, b);
		assert_ne!(a, c);
	}
}
