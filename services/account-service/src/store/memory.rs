//! In-process account store.
//!
//! Backs the service when `database.url = "memory"` and doubles as the
//! test store. Faults and latency can be injected to exercise deadline and
//! rollback paths.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{AccountError, AccountResult, AuthFailure};
use crate::model::{LoginAttempt, NewAccount, PasswordDigest, User};
use crate::services::password::DigestSealer;

use super::{transaction_failed, Deadline, UserAccountOperations};

/// Step of the two-step account delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStep {
    /// Removing the secret row.
    Secret,
    /// Removing the user row.
    User,
}

/// Injected misbehavior.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Fail the delete at this step.
    pub fail_delete_step: Option<DeleteStep>,
    /// Fail the rollback that follows a failed delete step.
    pub fail_rollback: bool,
    /// Delay applied before every operation.
    pub latency: Duration,
    /// Delay after a delete has been applied, before it reports back.
    pub delete_latency: Duration,
}

#[derive(Debug, Clone)]
struct StoredUser {
    login: String,
    sealed: String,
    name: String,
    surname: String,
    email: String,
}

impl StoredUser {
    fn to_user(&self, id: i64) -> User {
        User {
            id,
            login: self.login.clone(),
            name: self.name.clone(),
            surname: self.surname.clone(),
            email: self.email.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<i64, StoredUser>,
    secrets: BTreeMap<i64, Option<String>>,
    last_id: i64,
}

/// Account store held in process memory. Cloning shares the tables.
#[derive(Debug, Clone)]
pub struct MemoryAccounts {
    tables: Arc<Mutex<Tables>>,
    faults: Arc<Mutex<Faults>>,
    sealer: DigestSealer,
}

impl MemoryAccounts {
    /// Create an empty store.
    #[must_use]
    pub fn new(sealer: DigestSealer) -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            faults: Arc::new(Mutex::new(Faults::default())),
            sealer,
        }
    }

    /// Replace the injected faults.
    pub fn set_faults(&self, faults: Faults) {
        *self.faults.lock() = faults;
    }

    /// Number of stored users.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.tables.lock().users.len()
    }

    /// Number of stored secret rows.
    #[must_use]
    pub fn secret_count(&self) -> usize {
        self.tables.lock().secrets.len()
    }

    async fn pause(&self) {
        let latency = self.faults.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn update<F>(&self, id: i64, change: F) -> AccountResult<()>
    where
        F: FnOnce(&mut StoredUser),
    {
        let mut tables = self.tables.lock();
        let user = tables
            .users
            .get_mut(&id)
            .ok_or(AccountError::UnknownUser(id))?;
        change(user);
        Ok(())
    }

    fn insert(&self, account: &NewAccount, sealed: String) -> i64 {
        let mut tables = self.tables.lock();
        tables.last_id += 1;
        let id = tables.last_id;

        tables.users.insert(
            id,
            StoredUser {
                login: account.login.clone(),
                sealed,
                name: account.name.clone(),
                surname: account.surname.clone(),
                email: account.email.clone(),
            },
        );
        tables.secrets.insert(id, None);
        id
    }

    fn remove(&self, id: i64) -> AccountResult<()> {
        let faults = self.faults.lock().clone();
        let mut tables = self.tables.lock();

        if !tables.users.contains_key(&id) {
            return Err(AccountError::UnknownUser(id));
        }

        if faults.fail_delete_step == Some(DeleteStep::Secret) {
            let rollback = if faults.fail_rollback {
                Err("injected rollback failure")
            } else {
                Ok(())
            };
            return Err(transaction_failed(
                "delete user",
                "injected failure removing secret",
                rollback,
            ));
        }
        let secret = tables.secrets.remove(&id);

        if faults.fail_delete_step == Some(DeleteStep::User) {
            let rollback = if faults.fail_rollback {
                Err("injected rollback failure")
            } else {
                if let Some(secret) = secret {
                    tables.secrets.insert(id, secret);
                }
                Ok(())
            };
            return Err(transaction_failed(
                "delete user",
                "injected failure removing user",
                rollback,
            ));
        }
        tables.users.remove(&id);

        Ok(())
    }

    fn secret(&self, id: i64) -> AccountResult<String> {
        let tables = self.tables.lock();
        match tables.secrets.get(&id) {
            None => Err(AccountError::UnknownUser(id)),
            Some(None) => Err(AccountError::not_found("secret")),
            Some(Some(secret)) => Ok(secret.clone()),
        }
    }

    fn store_secret(&self, id: i64, secret: &str) -> AccountResult<()> {
        let mut tables = self.tables.lock();
        let slot = tables
            .secrets
            .get_mut(&id)
            .ok_or(AccountError::UnknownUser(id))?;
        *slot = Some(secret.to_owned());
        Ok(())
    }
}

#[async_trait]
impl UserAccountOperations for MemoryAccounts {
    async fn create_user(&self, account: &NewAccount, deadline: Deadline) -> AccountResult<i64> {
        deadline
            .run("create user", async {
                self.pause().await;
                let sealed = self.sealer.seal_blocking(&account.password).await?;
                Ok::<_, AccountError>(self.insert(account, sealed))
            })
            .await
    }

    async fn authenticate_user(
        &self,
        attempt: &LoginAttempt,
        deadline: Deadline,
    ) -> AccountResult<User> {
        deadline
            .run("authenticate user", async {
                self.pause().await;
                let candidates: Vec<(User, String)> = {
                    let tables = self.tables.lock();
                    tables
                        .users
                        .iter()
                        .filter(|(_, user)| user.login == attempt.login)
                        .map(|(id, user)| (user.to_user(*id), user.sealed.clone()))
                        .collect()
                };

                self.sealer
                    .find_verified(&attempt.password, candidates)
                    .await?
                    .ok_or_else(|| AccountError::from(AuthFailure::InvalidCredentials))
            })
            .await
    }

    async fn get_user_by_id(&self, id: i64, deadline: Deadline) -> AccountResult<User> {
        deadline
            .run("get user", async {
                self.pause().await;
                self.tables
                    .lock()
                    .users
                    .get(&id)
                    .map(|user| user.to_user(id))
                    .ok_or(AccountError::UnknownUser(id))
            })
            .await
    }

    async fn update_login(&self, id: i64, login: &str, deadline: Deadline) -> AccountResult<()> {
        deadline
            .run("update login", async {
                self.pause().await;
                self.update(id, |user| login.clone_into(&mut user.login))
            })
            .await
    }

    async fn update_password(
        &self,
        id: i64,
        password: &PasswordDigest,
        deadline: Deadline,
    ) -> AccountResult<()> {
        deadline
            .run("update password", async {
                self.pause().await;
                let sealed = self.sealer.seal_blocking(password).await?;
                self.update(id, |user| user.sealed = sealed)
            })
            .await
    }

    async fn update_name(
        &self,
        id: i64,
        name: &str,
        surname: &str,
        deadline: Deadline,
    ) -> AccountResult<()> {
        deadline
            .run("update name", async {
                self.pause().await;
                self.update(id, |user| {
                    name.clone_into(&mut user.name);
                    surname.clone_into(&mut user.surname);
                })
            })
            .await
    }

    async fn update_email(&self, id: i64, email: &str, deadline: Deadline) -> AccountResult<()> {
        deadline
            .run("update email", async {
                self.pause().await;
                self.update(id, |user| email.clone_into(&mut user.email))
            })
            .await
    }

    async fn delete_user(&self, id: i64, deadline: Deadline) -> AccountResult<()> {
        deadline
            .run("delete user", async {
                self.pause().await;
                self.remove(id)?;

                let linger = self.faults.lock().delete_latency;
                if !linger.is_zero() {
                    tokio::time::sleep(linger).await;
                }
                Ok::<_, AccountError>(())
            })
            .await
    }

    async fn get_secret(&self, id: i64, deadline: Deadline) -> AccountResult<String> {
        deadline
            .run("get secret", async {
                self.pause().await;
                self.secret(id)
            })
            .await
    }

    async fn set_secret(&self, id: i64, secret: &str, deadline: Deadline) -> AccountResult<()> {
        deadline
            .run("set secret", async {
                self.pause().await;
                self.store_secret(id, secret)
            })
            .await
    }
}
