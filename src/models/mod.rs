pub mod credential;
pub mod session;

pub use credential::CredentialRecord;
pub use session::{DeviceMetadata, Session};
