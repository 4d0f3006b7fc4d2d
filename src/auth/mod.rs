pub mod credentials;
pub mod handlers;
pub mod password;
pub mod session;

pub use credentials::{CredentialError, CredentialStore};
pub use session::Identity;
