use chrono::{Duration, Utc};
use rand::Rng;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use thiserror::Error;

use crate::db::{self, models::Session};
use crate::state::DbPool;

/// Ten years; longer lifetimes are clamped.
const MAX_LIFETIME_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

/// The authenticated party behind a request, resolved once from the session
/// cookie and passed explicitly to every operation that needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub username: String,
    pub csrf_token: String,
}

impl Identity {
    pub fn verify_csrf(&self, submitted: &str) -> bool {
        constant_time_eq(self.csrf_token.as_bytes(), submitted.as_bytes())
    }
}

/// Start a session for `user_id`. Any token the client presented beforehand
/// is invalidated so a planted pre-login token can never become
/// authenticated.
pub fn create_session(
    pool: &DbPool,
    user_id: &str,
    lifetime_secs: u64,
    previous_token: Option<&str>,
) -> Result<Session, SessionError> {
    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if let Some(previous) = previous_token {
        tx.execute("DELETE FROM sessions WHERE token = ?1", params![previous])?;
    }
    let purged = tx.execute(
        "DELETE FROM sessions WHERE expires_at <= ?1",
        params![db::now_timestamp()],
    )?;
    if purged > 0 {
        tracing::debug!(purged, "Purged expired sessions");
    }

    let lifetime = Duration::seconds(lifetime_secs.min(MAX_LIFETIME_SECS) as i64);
    let session = Session {
        id: uuid::Uuid::now_v7().to_string(),
        user_id: user_id.to_string(),
        token: generate_token(),
        csrf_token: generate_token(),
        expires_at: db::format_timestamp(Utc::now() + lifetime),
    };

    tx.execute(
        "INSERT INTO sessions (id, user_id, token, csrf_token, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            session.id,
            session.user_id,
            session.token,
            session.csrf_token,
            session.expires_at
        ],
    )?;
    tx.commit()?;

    Ok(session)
}

/// Resolve a session token to its identity. Unknown or expired tokens
/// resolve to `None`.
pub fn lookup_identity(pool: &DbPool, token: &str) -> Result<Option<Identity>, SessionError> {
    if token.is_empty() {
        return Ok(None);
    }
    let conn = pool.get()?;
    let identity = conn
        .query_row(
            "SELECT u.id, u.username, s.csrf_token FROM sessions s
             JOIN users u ON u.id = s.user_id
             WHERE s.token = ?1 AND s.expires_at > ?2",
            params![token, db::now_timestamp()],
            |row| {
                Ok(Identity {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    csrf_token: row.get(2)?,
                })
            },
        )
        .optional()?;

    Ok(identity.filter(|i| !i.id.is_empty()))
}

/// Delete a session by token. Deleting an unknown token is not an error.
pub fn delete_session(pool: &DbPool, token: &str) -> Result<(), SessionError> {
    let conn = pool.get()?;
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

/// Generate a cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let len_match = a.len() == b.len();
    let max_len = a.len().max(b.len());

    let mut result = 0u8;
    for i in 0..max_len {
        let byte_a = a.get(i).copied().unwrap_or(0);
        let byte_b = b.get(i).copied().unwrap_or(0);
        result |= byte_a ^ byte_b;
    }

    len_match && result == 0
}
