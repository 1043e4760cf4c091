pub mod error;
pub mod host_key;
pub mod identity;
pub mod message;

pub use error::{AuthError, AuthResult};
pub use host_key::HostKeyRecord;
pub use identity::{CertificateId, Identity, IdentityInfo, IdentitySource, KeyMaterial, KeyType};
pub use message::{AuthEvent, AuthState, Message, MessageKind};
