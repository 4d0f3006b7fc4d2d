pub mod auth;
pub mod home;
pub mod posts;
pub mod uploads;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::session::Identity;
use crate::error::expose_error_detail;
use crate::state::AppState;

/// Room for the text fields and multipart framing on top of the image.
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Values every page's layout needs.
pub struct Page {
    pub site_name: String,
    pub tagline: String,
    pub user: Option<Identity>,
}

impl Page {
    pub fn new(state: &AppState, user: Option<Identity>) -> Self {
        Self {
            site_name: state.config.site.name.clone(),
            tagline: state.config.site.tagline.clone(),
            user,
        }
    }
}

pub fn app(state: AppState) -> Router {
    let body_limit = usize::try_from(state.config.storage.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(FORM_OVERHEAD_BYTES);

    Router::new()
        .route("/", get(home::index))
        .route("/uploads/{key}", get(uploads::serve))
        .merge(auth::router())
        .merge(posts::router())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            expose_error_detail,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
