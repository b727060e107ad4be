//! Account service.
//!
//! Login sessions over a concurrent TTL cache, cookie-guarded profile and
//! secret routes, and account persistence behind [`store::UserAccountOperations`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod model;
pub mod router;
pub mod services;
pub mod store;

// Re-export key types for convenience
pub use config::AccountServiceConfig;
pub use error::{AccountError, AccountResult, AuthFailure};
pub use router::{router, AppState, Paths};
pub use services::{CredentialHasher, DigestSealer, SessionStore, SessionToken, TokenIssuer};
pub use store::{MemoryAccounts, PgAccounts, SharedAccounts, UserAccountOperations};
