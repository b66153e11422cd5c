//! Secret handling for provider credentials.

pub mod credentials;

pub use credentials::{ProviderCredentials, SecretString};
