use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};

use crate::auth::credentials::CredentialError;
use crate::auth::session::SessionError;
use crate::media::UploadError;
use crate::posts::{PostError, StoreError};
use crate::state::AppState;

/// Body shown for every infrastructure failure outside development mode.
pub const GENERIC_ERROR_MESSAGE: &str =
    "Something went wrong. Please try again or contact the administrator.";

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Invalid username or password")]
    AuthFailure,

    #[error("Not found")]
    NotFound,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid or missing form token")]
    Forbidden,

    #[error("Username or email already exists")]
    DuplicateIdentity,

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Template error: {0}")]
    Template(#[from] askama::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Full error text attached to generic 500 responses. Only surfaced to the
/// client by [`expose_error_detail`] in development mode.
#[derive(Debug, Clone)]
pub struct ErrorDetail(pub String);

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Validation(msg) => AppError::Validation(msg),
            CredentialError::DuplicateIdentity => AppError::DuplicateIdentity,
            CredentialError::AuthFailure => AppError::AuthFailure,
            CredentialError::Hash(e) => {
                AppError::Internal(format!("Password hashing failed: {}", e))
            }
            CredentialError::Database(e) => AppError::Database(e),
            CredentialError::Pool(e) => AppError::Pool(e),
        }
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Database(e) => AppError::Database(e),
            SessionError::Pool(e) => AppError::Pool(e),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(e) => AppError::Database(e),
            StoreError::Pool(e) => AppError::Pool(e),
        }
    }
}

impl From<PostError> for AppError {
    fn from(err: PostError) -> Self {
        match err {
            PostError::Validation(msg) => AppError::Validation(msg),
            PostError::NotFound => AppError::NotFound,
            PostError::AuthorMissing => AppError::Unauthorized,
            PostError::Upload(e) => AppError::Upload(e),
            PostError::Store(e) => e.into(),
            PostError::Credential(e) => e.into(),
        }
    }
}

impl AppError {
    /// Whether the message is safe and useful to show next to a form. Every
    /// upload failure has its own message; the io cause of a storage failure
    /// is logged where it happens and never displayed.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            AppError::Validation(_)
                | AppError::AuthFailure
                | AppError::DuplicateIdentity
                | AppError::Forbidden
                | AppError::Upload(_)
        )
    }
}

fn internal(detail: String) -> Response {
    tracing::error!("{}", detail);
    let mut response = (StatusCode::INTERNAL_SERVER_ERROR, GENERIC_ERROR_MESSAGE).into_response();
    response.extensions_mut().insert(ErrorDetail(detail));
    response
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Unauthorized => Redirect::to("/login").into_response(),
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not found").into_response(),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()).into_response(),
            AppError::AuthFailure => (StatusCode::UNAUTHORIZED, self.to_string()).into_response(),
            AppError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()).into_response(),
            AppError::DuplicateIdentity => (StatusCode::CONFLICT, self.to_string()).into_response(),
            AppError::Upload(UploadError::TooLarge { .. }) => {
                (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()).into_response()
            }
            AppError::Upload(UploadError::StorageFailure(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
            }
            AppError::Upload(_) => (StatusCode::BAD_REQUEST, self.to_string()).into_response(),
            AppError::Database(_)
            | AppError::Pool(_)
            | AppError::Io(_)
            | AppError::Template(_)
            | AppError::Internal(_) => internal(self.to_string()),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// In development mode, swap the generic 500 body for the underlying error.
pub async fn expose_error_detail(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    if !state.config.is_development() {
        return response;
    }

    let Some(ErrorDetail(detail)) = response.extensions().get::<ErrorDetail>().cloned() else {
        return response;
    };

    let (mut parts, _) = response.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    Response::from_parts(parts, Body::from(detail))
}
