use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};

use crate::auth::session::{self, Identity};
use crate::error::AppError;
use crate::state::AppState;

pub const FLASH_COOKIE: &str = "blogchain_flash";

/// Extractor that requires authentication. Rejection redirects to `/login`.
impl FromRequestParts<AppState> for Identity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = cookie_value(&parts.headers, &state.config.auth.cookie_name)
            .ok_or(AppError::Unauthorized)?;

        session::lookup_identity(&state.db, token)?.ok_or(AppError::Unauthorized)
    }
}

/// Optional user extractor: `None` instead of a redirect when not logged in.
pub struct MaybeUser(pub Option<Identity>);

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match Identity::from_request_parts(parts, state).await {
            Ok(user) => Ok(MaybeUser(Some(user))),
            Err(AppError::Unauthorized) => Ok(MaybeUser(None)),
            Err(e) => Err(e),
        }
    }
}

/// One-shot status message carried across a redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flash {
    PostDeleted,
    DeleteFailed,
    DeleteNotFound,
}

impl Flash {
    fn code(self) -> &'static str {
        match self {
            Flash::PostDeleted => "post-deleted",
            Flash::DeleteFailed => "delete-failed",
            Flash::DeleteNotFound => "delete-not-found",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "post-deleted" => Some(Flash::PostDeleted),
            "delete-failed" => Some(Flash::DeleteFailed),
            "delete-not-found" => Some(Flash::DeleteNotFound),
            _ => None,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Flash::PostDeleted)
    }

    pub fn message(self) -> &'static str {
        match self {
            Flash::PostDeleted => "Blog post deleted successfully!",
            Flash::DeleteFailed => "Failed to delete blog post.",
            Flash::DeleteNotFound => {
                "Blog not found or you do not have permission to delete it."
            }
        }
    }

    pub fn set_cookie(self) -> String {
        format!(
            "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age=60",
            FLASH_COOKIE,
            self.code()
        )
    }

    pub fn clear_cookie() -> String {
        format!("{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0", FLASH_COOKIE)
    }
}

/// The pending flash message, if any. Never rejects.
pub struct PendingFlash(pub Option<Flash>);

impl<S: Send + Sync> FromRequestParts<S> for PendingFlash {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(PendingFlash(
            cookie_value(&parts.headers, FLASH_COOKIE).and_then(Flash::from_code),
        ))
    }
}

pub fn session_cookie(name: &str, token: &str, max_age_secs: u64) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}",
        name, token, max_age_secs
    )
}

pub fn clear_session_cookie(name: &str) -> String {
    format!("{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0", name)
}

pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let mut split = cookie.splitn(2, '=');
            let key = split.next()?.trim();
            let val = split.next()?.trim();
            if key == name && !val.is_empty() {
                Some(val)
            } else {
                None
            }
        })
}
