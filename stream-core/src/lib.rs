pub mod nak;
pub mod origin;
pub mod prelude;
pub mod privacy;
pub mod protocol;

pub use nak::{NetworkAnonymizationKey, RequestKey};
pub use origin::{Origin, Scheme};
pub use privacy::PrivacyMode;
pub use protocol::{QuicVersion, TransportProtocol};
