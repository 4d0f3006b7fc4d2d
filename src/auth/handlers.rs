use askama::Template;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Form;
use serde::Deserialize;

use crate::auth::session;
use crate::error::{AppError, AppResult};
use crate::extractors::{clear_session_cookie, cookie_value, session_cookie, MaybeUser};
use crate::routes::home::Html;
use crate::routes::Page;
use crate::state::AppState;

// -- Templates --

#[derive(Template)]
#[template(path = "pages/register.html")]
pub struct RegisterTemplate {
    pub page: Page,
    pub error: Option<String>,
    pub success: Option<String>,
    pub username: String,
    pub email: String,
}

#[derive(Template)]
#[template(path = "pages/login.html")]
pub struct LoginTemplate {
    pub page: Page,
    pub error: Option<String>,
    pub username: String,
}

// -- Request types --

#[derive(Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
}

#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize)]
pub struct CsrfForm {
    #[serde(default)]
    pub csrf_token: String,
}

fn status_for(err: &AppError) -> StatusCode {
    match err {
        AppError::AuthFailure => StatusCode::UNAUTHORIZED,
        AppError::DuplicateIdentity => StatusCode::CONFLICT,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn blocking_failed(e: tokio::task::JoinError) -> AppError {
    AppError::Internal(format!("Credential task failed: {}", e))
}

// -- Registration --

/// GET /register
pub async fn register_page(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
) -> AppResult<Response> {
    if maybe_user.0.is_some() {
        return Ok(Redirect::to("/").into_response());
    }

    Ok(Html(RegisterTemplate {
        page: Page::new(&state, None),
        error: None,
        success: None,
        username: String::new(),
        email: String::new(),
    })
    .into_response())
}

/// POST /register
pub async fn register(
    State(state): State<AppState>,
    Form(form): Form<RegisterForm>,
) -> AppResult<Response> {
    let render = |status: StatusCode, error: Option<String>, success: Option<String>| {
        let keep = |value: &str| match success {
            None => value.trim().to_string(),
            Some(_) => String::new(),
        };
        (
            status,
            Html(RegisterTemplate {
                page: Page::new(&state, None),
                username: keep(&form.username),
                email: keep(&form.email),
                error,
                success,
            }),
        )
            .into_response()
    };

    if form.username.trim().is_empty()
        || form.email.trim().is_empty()
        || form.password.is_empty()
        || form.confirm_password.is_empty()
    {
        return Ok(render(
            StatusCode::BAD_REQUEST,
            Some("All fields are required".into()),
            None,
        ));
    }
    if form.password != form.confirm_password {
        return Ok(render(
            StatusCode::BAD_REQUEST,
            Some("Passwords do not match".into()),
            None,
        ));
    }

    let credentials = state.credentials.clone();
    let (username, email, password) = (
        form.username.clone(),
        form.email.clone(),
        form.password.clone(),
    );
    let result = tokio::task::spawn_blocking(move || {
        credentials.register(&username, &email, &password)
    })
    .await
    .map_err(blocking_failed)?;

    match result.map_err(AppError::from) {
        Ok(_) => Ok(render(
            StatusCode::OK,
            None,
            Some("Registration successful! You can now login.".into()),
        )),
        Err(err) if err.is_user_facing() => {
            Ok(render(status_for(&err), Some(err.to_string()), None))
        }
        Err(err) => Err(err),
    }
}

// -- Login --

/// GET /login
pub async fn login_page(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
) -> AppResult<Response> {
    if maybe_user.0.is_some() {
        return Ok(Redirect::to("/").into_response());
    }

    Ok(Html(LoginTemplate {
        page: Page::new(&state, None),
        error: None,
        username: String::new(),
    })
    .into_response())
}

/// POST /login: verify credentials, rotate the session cookie
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> AppResult<Response> {
    let render = |status: StatusCode, error: String| {
        (
            status,
            Html(LoginTemplate {
                page: Page::new(&state, None),
                error: Some(error),
                username: form.username.trim().to_string(),
            }),
        )
            .into_response()
    };

    if form.username.trim().is_empty() || form.password.is_empty() {
        return Ok(render(
            StatusCode::BAD_REQUEST,
            "All fields are required".into(),
        ));
    }

    let credentials = state.credentials.clone();
    let (username, password) = (form.username.clone(), form.password.clone());
    let result = tokio::task::spawn_blocking(move || credentials.verify(&username, &password))
        .await
        .map_err(blocking_failed)?;

    let user = match result.map_err(AppError::from) {
        Ok(user) => user,
        Err(err) if err.is_user_facing() => {
            tracing::info!("Failed login attempt");
            return Ok(render(status_for(&err), err.to_string()));
        }
        Err(err) => return Err(err),
    };

    let cookie_name = &state.config.auth.cookie_name;
    let lifetime = state.config.auth.session_lifetime_secs;
    let previous = cookie_value(&headers, cookie_name);
    let session = session::create_session(&state.db, &user.id, lifetime, previous)?;

    tracing::info!(user_id = %user.id, username = %user.username, "User logged in");

    Ok((
        StatusCode::SEE_OTHER,
        [
            (header::LOCATION, "/".to_string()),
            (
                header::SET_COOKIE,
                session_cookie(cookie_name, &session.token, lifetime),
            ),
        ],
        "",
    )
        .into_response())
}

// -- Logout --

/// POST /logout: delete session and redirect
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<CsrfForm>,
) -> AppResult<Response> {
    let cookie_name = &state.config.auth.cookie_name;

    if let Some(token) = cookie_value(&headers, cookie_name) {
        if let Some(identity) = session::lookup_identity(&state.db, token)? {
            if !identity.verify_csrf(&form.csrf_token) {
                return Err(AppError::Forbidden);
            }
            tracing::info!(user_id = %identity.id, "User logged out");
        }
        session::delete_session(&state.db, token)?;
    }

    Ok((
        StatusCode::SEE_OTHER,
        [
            (header::LOCATION, "/login".to_string()),
            (header::SET_COOKIE, clear_session_cookie(cookie_name)),
        ],
        "",
    )
        .into_response())
}
