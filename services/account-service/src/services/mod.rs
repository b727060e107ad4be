//! Core session and credential services.

pub mod password;
pub mod session;
pub mod token;

pub use password::{CredentialHasher, DigestSealer};
pub use session::{SessionEntry, SessionStore};
pub use token::{SessionToken, TokenIssuer, TokenStrategy};
