//! Domain model and wire payloads.
//!
//! The update payload arrives as one flat JSON object carrying a group of
//! fields for every kind of change. [`AccountRequest::try_from`] validates it
//! and narrows it into a tagged union so that downstream code only ever sees
//! the fields relevant to the requested change.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AccountError, AccountResult};
use crate::services::password::CredentialHasher;

/// Wire code of [`HashState::Hashed`].
pub const HASHED: i32 = 100;
/// Wire code of [`HashState::Raw`].
pub const NOT_HASHED: i32 = 110;

/// Whether the password fields of a credential hold plaintext or digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashState {
    /// Password fields hold plaintext.
    Raw,
    /// Password fields hold digests and are opaque.
    Hashed,
}

impl TryFrom<i32> for HashState {
    type Error = AccountError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            HASHED => Ok(Self::Hashed),
            NOT_HASHED => Ok(Self::Raw),
            other => Err(AccountError::HashState(other)),
        }
    }
}

/// A password and its confirmation, tagged with their hash state.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Hash state of both password fields.
    pub state: HashState,
    /// Password.
    pub password_one: String,
    /// Confirmation.
    pub password_two: String,
}

impl Credential {
    /// The digest held by a hashed credential.
    ///
    /// # Errors
    ///
    /// Returns [`AccountError::Internal`] if the credential was never normalized.
    pub fn digest(&self) -> AccountResult<PasswordDigest> {
        match self.state {
            HashState::Hashed => Ok(PasswordDigest(self.password_one.clone())),
            HashState::Raw => Err(AccountError::Internal(
                "credential used before hashing".to_string(),
            )),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Hex digest of a password. Opaque once produced.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordDigest(String);

impl PasswordDigest {
    /// Wrap an already computed digest.
    #[must_use]
    pub const fn from_hex(hex: String) -> Self {
        Self(hex)
    }

    /// The hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PasswordDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordDigest(..)")
    }
}

/// Discriminant of the update payload, 1-indexed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum Direction {
    /// Sign up a new account.
    UserCreate = 1,
    /// Log in.
    UserConnect = 2,
    /// Change login.
    NewLogin = 3,
    /// Change password.
    NewPassword = 4,
    /// Change first and last name.
    NewName = 5,
    /// Change email.
    NewEmail = 6,
    /// Delete the account.
    UserDelete = 7,
}

impl TryFrom<i64> for Direction {
    type Error = AccountError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::UserCreate,
            2 => Self::UserConnect,
            3 => Self::NewLogin,
            4 => Self::NewPassword,
            5 => Self::NewName,
            6 => Self::NewEmail,
            7 => Self::UserDelete,
            other => return Err(AccountError::UnsupportedOperation(other)),
        })
    }
}

/// `change_login` group of the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangeLogin {
    /// Login.
    #[serde(default)]
    pub login: String,
}

/// `change_password` group of the payload.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangePassword {
    /// Hash-state flag, see [`HASHED`] and [`NOT_HASHED`].
    #[serde(default)]
    pub hashed: i32,
    /// Password.
    #[serde(default)]
    pub password_one: String,
    /// Confirmation.
    #[serde(default)]
    pub password_two: String,
}

impl ChangePassword {
    /// Parse the hash flag and normalize the pair into a hashed credential.
    ///
    /// # Errors
    ///
    /// Returns [`AccountError::HashState`] for an unrecognized flag.
    pub fn normalized(self) -> AccountResult<Credential> {
        let mut credential = Credential {
            state: HashState::try_from(self.hashed)?,
            password_one: self.password_one,
            password_two: self.password_two,
        };
        CredentialHasher::normalize(&mut credential);
        Ok(credential)
    }
}

impl fmt::Debug for ChangePassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangePassword")
            .field("hashed", &self.hashed)
            .finish_non_exhaustive()
    }
}

/// `change_name` group of the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangeName {
    /// First name.
    #[serde(default)]
    pub first_name: String,
    /// Last name, may be empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_name: String,
}

/// `change_email` group of the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangeEmail {
    /// Email.
    #[serde(default)]
    pub email: String,
}

/// The flat update payload as it arrives on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserPayload {
    /// Discriminant, see [`Direction`].
    pub direct: i64,
    /// Ignored on input; the target is always the session's user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Login group.
    #[serde(default)]
    pub change_login: ChangeLogin,
    /// Password group.
    #[serde(default)]
    pub change_password: ChangePassword,
    /// Name group.
    #[serde(default)]
    pub change_name: ChangeName,
    /// Email group.
    #[serde(default)]
    pub change_email: ChangeEmail,
}

/// Data for a new account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    /// Login.
    pub login: String,
    /// Password digest.
    pub password: PasswordDigest,
    /// First name.
    pub name: String,
    /// Last name, may be empty.
    pub surname: String,
    /// Email.
    pub email: String,
}

/// Login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAttempt {
    /// Login.
    pub login: String,
    /// Password digest.
    pub password: PasswordDigest,
}

/// A change to an existing account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Replace the login.
    NewLogin(String),
    /// Replace the password.
    NewPassword(PasswordDigest),
    /// Replace first and last name.
    NewName {
        /// First name.
        name: String,
        /// Last name, may be empty.
        surname: String,
    },
    /// Replace the email.
    NewEmail(String),
    /// Delete the account and its secret.
    Delete,
}

/// A validated update payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountRequest {
    /// Sign up.
    Create(NewAccount),
    /// Log in.
    Connect(LoginAttempt),
    /// Change an existing account.
    Change(Mutation),
}

fn require(value: &str, what: &str) -> AccountResult<()> {
    if value.is_empty() {
        return Err(AccountError::validation(format!("empty {what}")));
    }
    Ok(())
}

impl TryFrom<UserPayload> for AccountRequest {
    type Error = AccountError;

    fn try_from(payload: UserPayload) -> Result<Self, Self::Error> {
        let UserPayload {
            direct,
            change_login,
            change_password,
            change_name,
            change_email,
            ..
        } = payload;

        let request = match Direction::try_from(direct)? {
            Direction::UserCreate => {
                require(&change_login.login, "login")?;
                require(&change_password.password_one, "password")?;
                Self::Create(NewAccount {
                    login: change_login.login,
                    password: change_password.normalized()?.digest()?,
                    name: change_name.first_name,
                    surname: change_name.last_name,
                    email: change_email.email,
                })
            }
            Direction::UserConnect => {
                require(&change_login.login, "login")?;
                require(&change_password.password_one, "password")?;
                Self::Connect(LoginAttempt {
                    login: change_login.login,
                    password: change_password.normalized()?.digest()?,
                })
            }
            Direction::NewLogin => {
                require(&change_login.login, "login")?;
                Self::Change(Mutation::NewLogin(change_login.login))
            }
            Direction::NewPassword => {
                require(&change_password.password_one, "password")?;
                if change_password.password_one != change_password.password_two {
                    return Err(AccountError::validation("passwords not equal"));
                }
                Self::Change(Mutation::NewPassword(
                    change_password.normalized()?.digest()?,
                ))
            }
            Direction::NewName => {
                require(&change_name.first_name, "name")?;
                Self::Change(Mutation::NewName {
                    name: change_name.first_name,
                    surname: change_name.last_name,
                })
            }
            Direction::NewEmail => {
                require(&change_email.email, "email")?;
                Self::Change(Mutation::NewEmail(change_email.email))
            }
            Direction::UserDelete => Self::Change(Mutation::Delete),
        };

        Ok(request)
    }
}

/// Identity record as returned to clients. The stored password seal never
/// leaves the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Account id.
    pub id: i64,
    /// Login.
    pub login: String,
    /// First name.
    pub name: String,
    /// Last name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub surname: String,
    /// Email.
    pub email: String,
}

/// `{"message": ...}` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Message {
    /// Text.
    pub message: String,
}

impl Message {
    /// Create a message envelope.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
