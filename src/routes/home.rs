use askama::Template;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::content;
use crate::db::models::PostView;
use crate::error::{AppError, AppResult};
use crate::extractors::{Flash, MaybeUser, PendingFlash};
use crate::routes::Page;
use crate::state::AppState;

const EXCERPT_CHARS: usize = 200;

/// A post as shown in the listing.
pub struct PostSummary {
    pub id: i64,
    pub title: String,
    pub author: String,
    pub date: String,
    pub excerpt: String,
    pub reading_minutes: usize,
    pub image_url: String,
}

impl PostSummary {
    fn from_view(view: &PostView, state: &AppState) -> Self {
        Self {
            id: view.post.id,
            title: view.post.title.clone(),
            author: view.author.clone(),
            date: content::format_date(&view.post.created_at, &state.config.utc_offset()),
            excerpt: content::excerpt(&view.post.content, EXCERPT_CHARS),
            reading_minutes: content::estimated_reading_minutes(&view.post.content),
            image_url: state.media.url_for(view.post.image.as_deref()),
        }
    }
}

#[derive(Template)]
#[template(path = "pages/index.html")]
pub struct IndexTemplate {
    pub page: Page,
    pub posts: Vec<PostSummary>,
    pub flash: Option<Flash>,
}

/// Wrapper to render askama templates as axum responses
pub struct Html<T: Template>(pub T);

impl<T: Template> IntoResponse for Html<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                body,
            )
                .into_response(),
            Err(e) => AppError::Template(e).into_response(),
        }
    }
}

/// GET /: every post, newest first. Consumes any pending flash message.
pub async fn index(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    PendingFlash(flash): PendingFlash,
) -> AppResult<Response> {
    let posts = state
        .posts
        .list()
        .await?
        .iter()
        .map(|view| PostSummary::from_view(view, &state))
        .collect();

    let page = Html(IndexTemplate {
        page: Page::new(&state, maybe_user.0),
        posts,
        flash,
    });

    if flash.is_some() {
        return Ok((
            [(header::SET_COOKIE, Flash::clear_cookie())],
            page,
        )
            .into_response());
    }
    Ok(page.into_response())
}

