//! Account persistence.
//!
//! [`UserAccountOperations`] is the only surface the HTTP layer uses to reach
//! stored accounts. Every call carries a [`Deadline`]; a call that outlives
//! it resolves to [`AccountError::Timeout`] and its in-flight work is dropped.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::config::DeadlineConfig;
use crate::error::{AccountError, AccountResult};
use crate::model::{LoginAttempt, Mutation, NewAccount, PasswordDigest, User};

pub mod memory;
pub mod postgres;

pub use memory::{DeleteStep, Faults, MemoryAccounts};
pub use postgres::PgAccounts;

/// Shared handle to the configured backend.
pub type SharedAccounts = Arc<dyn UserAccountOperations>;

/// Absolute instant by which a persistence call must finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// A deadline `budget` from now.
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    /// Time left before the deadline, zero once it has passed.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Drive `work` to completion or give up at the deadline.
    ///
    /// # Errors
    ///
    /// Returns whatever `work` returns, or [`AccountError::Timeout`] naming
    /// `operation` if the deadline passes first.
    pub async fn run<T, F>(self, operation: &'static str, work: F) -> AccountResult<T>
    where
        F: Future<Output = AccountResult<T>> + Send,
    {
        tokio::time::timeout_at(self.at, work)
            .await
            .unwrap_or_else(|_| {
                tracing::warn!(operation, "persistence deadline exceeded");
                Err(AccountError::Timeout { operation })
            })
    }
}

/// Per entry point persistence budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    /// Signup.
    pub signup: Duration,
    /// Login.
    pub login: Duration,
    /// Profile reads and mutations.
    pub profile: Duration,
    /// Secret reads and writes.
    pub secret: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self::from(&DeadlineConfig::default())
    }
}

impl From<&DeadlineConfig> for Deadlines {
    fn from(config: &DeadlineConfig) -> Self {
        Self {
            signup: Duration::from_millis(config.signup_ms),
            login: Duration::from_millis(config.login_ms),
            profile: Duration::from_millis(config.profile_ms),
            secret: Duration::from_millis(config.secret_ms),
        }
    }
}

/// Build the error for a failed multi-step write, folding in the rollback
/// outcome.
pub fn transaction_failed<C, R>(
    operation: &'static str,
    cause: C,
    rollback: Result<(), R>,
) -> AccountError
where
    C: fmt::Display,
    R: fmt::Display,
{
    let err = AccountError::Transaction {
        operation,
        cause: cause.to_string(),
        rollback: rollback.err().map(|r| r.to_string()),
    };
    tracing::error!(error = %err, "transaction aborted");
    err
}

/// Stored account operations.
///
/// Implementations store the password digest sealed; the seal never leaves
/// the implementation.
#[async_trait]
pub trait UserAccountOperations: Send + Sync + fmt::Debug {
    /// Insert a user and its empty secret row. Returns the new id.
    async fn create_user(&self, account: &NewAccount, deadline: Deadline) -> AccountResult<i64>;

    /// Find the user matching the login and password digest.
    ///
    /// Fails with [`crate::error::AuthFailure::InvalidCredentials`] when none
    /// matches.
    async fn authenticate_user(
        &self,
        attempt: &LoginAttempt,
        deadline: Deadline,
    ) -> AccountResult<User>;

    /// Fetch a user by id.
    async fn get_user_by_id(&self, id: i64, deadline: Deadline) -> AccountResult<User>;

    /// Replace the login.
    async fn update_login(&self, id: i64, login: &str, deadline: Deadline) -> AccountResult<()>;

    /// Replace the password digest.
    async fn update_password(
        &self,
        id: i64,
        password: &PasswordDigest,
        deadline: Deadline,
    ) -> AccountResult<()>;

    /// Replace first and last name.
    async fn update_name(
        &self,
        id: i64,
        name: &str,
        surname: &str,
        deadline: Deadline,
    ) -> AccountResult<()>;

    /// Replace the email.
    async fn update_email(&self, id: i64, email: &str, deadline: Deadline) -> AccountResult<()>;

    /// Remove the secret row and then the user, all or nothing.
    async fn delete_user(&self, id: i64, deadline: Deadline) -> AccountResult<()>;

    /// Read the secret. An unset secret is [`AccountError::NotFound`].
    async fn get_secret(&self, id: i64, deadline: Deadline) -> AccountResult<String>;

    /// Store the secret.
    async fn set_secret(&self, id: i64, secret: &str, deadline: Deadline) -> AccountResult<()>;

    /// Apply a validated mutation to user `id`.
    async fn apply(&self, id: i64, mutation: &Mutation, deadline: Deadline) -> AccountResult<()> {
        match mutation {
            Mutation::NewLogin(login) => self.update_login(id, login, deadline).await,
            Mutation::NewPassword(password) => self.update_password(id, password, deadline).await,
            Mutation::NewName { name, surname } => {
                self.update_name(id, name, surname, deadline).await
            }
            Mutation::NewEmail(email) => self.update_email(id, email, deadline).await,
            Mutation::Delete => self.delete_user(id, deadline).await,
        }
    }
}
