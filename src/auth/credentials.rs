use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use std::sync::Arc;
use thiserror::Error;

use crate::auth::password::PasswordHash;
use crate::db::{self, models::User};
use crate::state::DbPool;

pub const MIN_PASSWORD_LEN: usize = 6;

lazy_static! {
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+(\.[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+)*@[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$"
    )
    .unwrap();
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("{0}")]
    Validation(String),

    #[error("Username or email already exists")]
    DuplicateIdentity,

    /// Unknown username and wrong password are deliberately indistinguishable.
    #[error("Invalid username or password")]
    AuthFailure,

    #[error("Password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

pub fn is_valid_email(email: &str) -> bool {
    email.len() <= 254 && EMAIL_REGEX.is_match(email)
}

/// Shape checks run before any hashing or database work.
pub fn validate_registration(
    username: &str,
    email: &str,
    password: &str,
) -> Result<(), CredentialError> {
    if username.is_empty() || email.is_empty() || password.is_empty() {
        return Err(CredentialError::Validation(
            "All fields are required".into(),
        ));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(CredentialError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    if !is_valid_email(email) {
        return Err(CredentialError::Validation("Invalid email format".into()));
    }
    Ok(())
}

/// User identities and their password hashes.
#[derive(Clone)]
pub struct CredentialStore {
    pool: DbPool,
    cost: u32,
    dummy_hash: Arc<PasswordHash>,
}

impl CredentialStore {
    pub fn new(pool: DbPool, cost: u32) -> Self {
        let dummy_hash = PasswordHash::new("blogchain-timing-equalizer", cost)
            .unwrap_or_else(|_| PasswordHash::from_stored(""));
        Self {
            pool,
            cost,
            dummy_hash: Arc::new(dummy_hash),
        }
    }

    /// Create a user. The uniqueness check and the insert share one
    /// immediate transaction, so two racing registrations for the same
    /// username or email cannot both commit.
    pub fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<User, CredentialError> {
        let username = username.trim();
        let email = email.trim();
        validate_registration(username, email, password)?;

        let hash = PasswordHash::new(password, self.cost)?;
        let user = User {
            id: uuid::Uuid::now_v7().to_string(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: hash.as_str().to_string(),
            created_at: db::now_timestamp(),
        };

        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let taken: bool = tx.query_row(
            "SELECT COUNT(*) > 0 FROM users WHERE username = ?1 OR email = ?2",
            params![user.username, user.email],
            |row| row.get(0),
        )?;
        if taken {
            return Err(CredentialError::DuplicateIdentity);
        }

        let inserted = tx.execute(
            "INSERT INTO users (id, username, email, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id,
                user.username,
                user.email,
                user.password_hash,
                user.created_at
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(CredentialError::DuplicateIdentity),
            Err(e) => return Err(e.into()),
        }
        tx.commit()?;

        tracing::info!(user_id = %user.id, username = %user.username, "Registered user");
        Ok(user)
    }

    /// Check a username/password pair. Uniqueness ignores ASCII case, but
    /// the login name must match the registered spelling exactly.
    pub fn verify(&self, username: &str, password: &str) -> Result<User, CredentialError> {
        let conn = self.pool.get()?;
        let user = conn
            .query_row(
                "SELECT id, username, email, password_hash, created_at
                 FROM users WHERE username = ?1 COLLATE BINARY",
                params![username.trim()],
                User::from_row,
            )
            .optional()?;

        match user {
            Some(user) if password_matches(&user, password) => Ok(user),
            Some(_) => Err(CredentialError::AuthFailure),
            None => {
                self.dummy_hash.verify(password);
                Err(CredentialError::AuthFailure)
            }
        }
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<User>, CredentialError> {
        let conn = self.pool.get()?;
        let user = conn
            .query_row(
                "SELECT id, username, email, password_hash, created_at
                 FROM users WHERE id = ?1",
                params![id],
                User::from_row,
            )
            .optional()?;
        Ok(user)
    }
}

fn password_matches(user: &User, password: &str) -> bool {
    PasswordHash::from_stored(user.password_hash.as_str()).verify(password)
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
