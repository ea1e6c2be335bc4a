//! Nintendo Account authentication and Coral credential handling

pub mod attestation;
pub mod cache;
pub mod exchange;
pub mod manager;
pub mod nintendo_account;
pub mod session;
pub mod token;

pub use cache::{CachedCredential, TokenCache};
pub use exchange::Authenticator;
pub use manager::{CoralSession, Sessions};
