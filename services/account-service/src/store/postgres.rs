//! Postgres account store.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use crate::config::DatabaseConfig;
use crate::error::{AccountError, AccountResult, AuthFailure};
use crate::model::{LoginAttempt, NewAccount, PasswordDigest, User};
use crate::services::password::DigestSealer;

use super::{transaction_failed, Deadline, UserAccountOperations};

const INSERT_USER: &str = "\
WITH created AS (
    INSERT INTO users (login, hashed_password, name, surname, email)
    VALUES ($1, $2, $3, $4, $5)
    RETURNING id
)
INSERT INTO info (id)
SELECT id FROM created
RETURNING id";

const SELECT_BY_LOGIN: &str =
    "SELECT id, login, hashed_password, name, surname, email FROM users WHERE login = $1";

const SELECT_BY_ID: &str =
    "SELECT id, login, hashed_password, name, surname, email FROM users WHERE id = $1";

/// Account store backed by a Postgres pool.
#[derive(Debug, Clone)]
pub struct PgAccounts {
    pool: PgPool,
    sealer: DigestSealer,
}

impl PgAccounts {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool, sealer: DigestSealer) -> Self {
        Self { pool, sealer }
    }

    /// Open a pool as described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AccountError::Storage`] if the database cannot be reached.
    pub async fn connect(config: &DatabaseConfig, sealer: DigestSealer) -> AccountResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .connect(&config.url)
            .await?;

        tracing::info!("Database connection pool established");
        Ok(Self::new(pool, sealer))
    }

    /// Apply the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`AccountError::Storage`] if a migration fails.
    pub async fn migrate(&self) -> AccountResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AccountError::Storage(format!("migration failed: {e}")))
    }

    fn user_from_row(row: &PgRow) -> AccountResult<(User, String)> {
        let user = User {
            id: row.try_get("id")?,
            login: row.try_get("login")?,
            name: row.try_get("name")?,
            surname: row.try_get("surname")?,
            email: row.try_get("email")?,
        };
        Ok((user, row.try_get("hashed_password")?))
    }

    async fn update_column(
        &self,
        sql: &'static str,
        id: i64,
        value: &str,
    ) -> AccountResult<()> {
        let result = sqlx::query(sql)
            .bind(value)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AccountError::UnknownUser(id));
        }
        Ok(())
    }
}

#[async_trait]
impl UserAccountOperations for PgAccounts {
    async fn create_user(&self, account: &NewAccount, deadline: Deadline) -> AccountResult<i64> {
        deadline
            .run("create user", async {
                let sealed = self.sealer.seal_blocking(&account.password).await?;
                let id: i64 = sqlx::query_scalar(INSERT_USER)
                    .bind(&account.login)
                    .bind(sealed)
                    .bind(&account.name)
                    .bind(&account.surname)
                    .bind(&account.email)
                    .fetch_one(&self.pool)
                    .await?;
                tracing::debug!(id, "user created");
                Ok::<_, AccountError>(id)
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
                let rows = sqlx::query(SELECT_BY_LOGIN)
                    .bind(&attempt.login)
                    .fetch_all(&self.pool)
                    .await?;

                let candidates = rows
                    .iter()
                    .map(Self::user_from_row)
                    .collect::<AccountResult<Vec<_>>>()?;

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
                let row = sqlx::query(SELECT_BY_ID)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
                    .ok_or(AccountError::UnknownUser(id))?;
                Ok::<_, AccountError>(Self::user_from_row(&row)?.0)
            })
            .await
    }

    async fn update_login(&self, id: i64, login: &str, deadline: Deadline) -> AccountResult<()> {
        deadline
            .run(
                "update login",
                self.update_column("UPDATE users SET login = $1 WHERE id = $2", id, login),
            )
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
                let sealed = self.sealer.seal_blocking(password).await?;
                self.update_column(
                    "UPDATE users SET hashed_password = $1 WHERE id = $2",
                    id,
                    &sealed,
                )
                .await
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
                let result = sqlx::query("UPDATE users SET name = $1, surname = $2 WHERE id = $3")
                    .bind(name)
                    .bind(surname)
                    .bind(id)
                    .execute(&self.pool)
                    .await?;

                if result.rows_affected() == 0 {
                    return Err(AccountError::UnknownUser(id));
                }
                Ok(())
            })
            .await
    }

    async fn update_email(&self, id: i64, email: &str, deadline: Deadline) -> AccountResult<()> {
        deadline
            .run(
                "update email",
                self.update_column("UPDATE users SET email = $1 WHERE id = $2", id, email),
            )
            .await
    }

    async fn delete_user(&self, id: i64, deadline: Deadline) -> AccountResult<()> {
        // A transaction dropped on timeout rolls back when its connection
        // returns to the pool.
        deadline
            .run("delete user", async {
                let mut tx = self.pool.begin().await?;

                let steps = async {
                    sqlx::query("DELETE FROM info WHERE id = $1")
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                    let removed = sqlx::query("DELETE FROM users WHERE id = $1")
                        .bind(id)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected();
                    Ok::<u64, sqlx::Error>(removed)
                }
                .await;

                match steps {
                    Ok(0) => {
                        tx.rollback().await?;
                        Err(AccountError::UnknownUser(id))
                    }
                    Ok(_) => tx
                        .commit()
                        .await
                        .map_err(|e| transaction_failed("delete user", e, Ok::<(), String>(()))),
                    Err(cause) => {
                        let rollback = tx.rollback().await;
                        Err(transaction_failed("delete user", cause, rollback))
                    }
                }
            })
            .await
    }

    async fn get_secret(&self, id: i64, deadline: Deadline) -> AccountResult<String> {
        deadline
            .run("get secret", async {
                let secret: Option<Option<String>> =
                    sqlx::query_scalar("SELECT secret FROM info WHERE id = $1")
                        .bind(id)
                        .fetch_optional(&self.pool)
                        .await?;

                match secret {
                    None => Err(AccountError::UnknownUser(id)),
                    Some(None) => Err(AccountError::not_found("secret")),
                    Some(Some(secret)) => Ok(secret),
                }
            })
            .await
    }

    async fn set_secret(&self, id: i64, secret: &str, deadline: Deadline) -> AccountResult<()> {
        deadline
            .run(
                "set secret",
                self.update_column("UPDATE info SET secret = $1 WHERE id = $2", id, secret),
            )
            .await
    }
}
