pub use std::sync::Arc;
pub use std::time::{Duration, Instant};

pub use tracing::{debug, error, info, trace, warn};

pub use crate::nak::NetworkAnonymizationKey;
pub use crate::origin::{Origin, Scheme};
pub use crate::privacy::PrivacyMode;
pub use crate::protocol::{QuicVersion, TransportProtocol};
