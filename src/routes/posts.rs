use askama::Template;
use axum::extract::multipart::Field;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};

use crate::auth::handlers::CsrfForm;
use crate::auth::session::Identity;
use crate::content;
use crate::error::{AppError, AppResult};
use crate::extractors::{Flash, MaybeUser};
use crate::media::{UploadCandidate, UploadError, UploadedFile};
use crate::posts::PostError;
use crate::routes::home::Html;
use crate::routes::Page;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/posts", post(create))
        .route("/posts/new", get(new_page))
        .route("/posts/{id}", get(view))
        .route("/posts/{id}/edit", get(edit_page).post(update))
        .route("/posts/{id}/delete", post(delete))
}

// -- Templates --

#[derive(Template)]
#[template(path = "pages/post.html")]
pub struct PostTemplate {
    pub page: Page,
    pub id: i64,
    pub title: String,
    pub author: String,
    pub created: String,
    pub updated: Option<String>,
    pub lines: Vec<String>,
    pub reading_minutes: usize,
    pub image_url: String,
    pub is_owner: bool,
}

#[derive(Template)]
#[template(path = "pages/post_form.html")]
pub struct PostFormTemplate {
    pub page: Page,
    pub heading: &'static str,
    pub action: String,
    pub submit_label: &'static str,
    pub csrf_token: String,
    pub title: String,
    pub content: String,
    pub image_url: String,
    pub error: Option<String>,
}

// -- Form parsing --

/// Fields of the create/edit multipart form.
#[derive(Debug)]
pub struct PostForm {
    pub csrf_token: String,
    pub title: String,
    pub content: String,
    pub remove_image: bool,
    pub image: UploadCandidate,
}

impl Default for PostForm {
    fn default() -> Self {
        Self {
            csrf_token: String::new(),
            title: String::new(),
            content: String::new(),
            remove_image: false,
            image: UploadCandidate::Missing,
        }
    }
}

/// Read the form. The image is streamed; past `max_bytes` it is counted
/// but no longer buffered. A body cut off by the request size limit is
/// reported as `TooLarge`, any other broken body as a failed upload.
pub async fn read_post_form(
    mut multipart: Multipart,
    max_bytes: u64,
) -> Result<PostForm, UploadError> {
    let mut form = PostForm::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                return Err(UploadError::TooLarge { max_bytes });
            }
            Err(e) => {
                tracing::warn!("Multipart body could not be read: {}", e);
                form.image = UploadCandidate::Failed(e.body_text());
                break;
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "blog_image" => {
                form.image = read_image_field(field, max_bytes).await?;
                if matches!(form.image, UploadCandidate::Failed(_)) {
                    break;
                }
            }
            "csrf_token" | "title" | "content" | "remove_image" => {
                let value = match field.text().await {
                    Ok(value) => value,
                    Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                        return Err(UploadError::TooLarge { max_bytes });
                    }
                    Err(e) => {
                        tracing::warn!(field = %name, "Form field could not be read: {}", e);
                        form.image = UploadCandidate::Failed(e.body_text());
                        break;
                    }
                };
                match name.as_str() {
                    "csrf_token" => form.csrf_token = value,
                    "title" => form.title = value,
                    "content" => form.content = value,
                    _ => form.remove_image = matches!(value.as_str(), "1" | "on" | "true"),
                }
            }
            _ => {}
        }
    }

    Ok(form)
}

async fn read_image_field(
    mut field: Field<'_>,
    max_bytes: u64,
) -> Result<UploadCandidate, UploadError> {
    let file_name = field.file_name().unwrap_or_default().to_string();
    let mut bytes = Vec::new();
    let mut size: u64 = 0;

    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                size += chunk.len() as u64;
                if size <= max_bytes {
                    bytes.extend_from_slice(&chunk);
                }
            }
            Ok(None) => break,
            Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                return Err(UploadError::TooLarge { max_bytes });
            }
            Err(e) => {
                tracing::warn!("Image upload interrupted: {}", e);
                return Ok(UploadCandidate::Failed(e.body_text()));
            }
        }
    }

    // Browsers send an empty, unnamed part when no file was chosen.
    if file_name.is_empty() && size == 0 {
        return Ok(UploadCandidate::Missing);
    }

    Ok(UploadCandidate::File(UploadedFile {
        file_name,
        size,
        bytes,
    }))
}

fn parse_id(raw: &str) -> Option<i64> {
    raw.parse().ok().filter(|id| *id > 0)
}

fn form_page(
    state: &AppState,
    identity: Identity,
    existing: Option<(i64, Option<&str>)>,
    title: String,
    content: String,
    error: Option<String>,
) -> PostFormTemplate {
    let (heading, action, submit_label, image_url) = match existing {
        Some((id, image)) => (
            "Edit Post",
            format!("/posts/{}/edit", id),
            "Update Post",
            state.media.url_for(image),
        ),
        None => ("Create New Post", "/posts".to_string(), "Publish Post", String::new()),
    };

    PostFormTemplate {
        csrf_token: identity.csrf_token.clone(),
        page: Page::new(state, Some(identity)),
        heading,
        action,
        submit_label,
        title,
        content,
        image_url,
        error,
    }
}

fn error_status(err: &AppError) -> StatusCode {
    match err {
        AppError::Upload(UploadError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
        AppError::Upload(UploadError::StorageFailure(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        AppError::Forbidden => StatusCode::FORBIDDEN,
        _ => StatusCode::BAD_REQUEST,
    }
}

// -- Handlers --

/// GET /posts/new
pub async fn new_page(State(state): State<AppState>, identity: Identity) -> AppResult<Response> {
    let page = form_page(&state, identity, None, String::new(), String::new(), None);
    Ok(Html(page).into_response())
}

/// POST /posts
pub async fn create(
    State(state): State<AppState>,
    identity: Identity,
    multipart: Multipart,
) -> AppResult<Response> {
    let max_bytes = state.media.max_bytes();
    let form = match read_post_form(multipart, max_bytes).await {
        Ok(form) => form,
        Err(e) => {
            let err = AppError::from(e);
            let message = Some(err.to_string());
            let page = form_page(&state, identity, None, String::new(), String::new(), message);
            return Ok((error_status(&err), Html(page)).into_response());
        }
    };

    if !identity.verify_csrf(&form.csrf_token) {
        return Err(AppError::Forbidden);
    }

    let result = state
        .posts
        .create(&identity, &form.title, &form.content, form.image)
        .await;

    match result.map_err(AppError::from) {
        Ok(post) => Ok(Redirect::to(&format!("/posts/{}", post.id)).into_response()),
        Err(err) if err.is_user_facing() => {
            let message = Some(err.to_string());
            let page = form_page(&state, identity, None, form.title, form.content, message);
            Ok((error_status(&err), Html(page)).into_response())
        }
        Err(err) => Err(err),
    }
}

/// GET /posts/{id}; unknown ids go back to the listing
pub async fn view(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Path(raw_id): Path<String>,
) -> AppResult<Response> {
    let Some(id) = parse_id(&raw_id) else {
        return Ok(Redirect::to("/").into_response());
    };

    let view = match state.posts.read(id).await {
        Ok(view) => view,
        Err(PostError::NotFound) => return Ok(Redirect::to("/").into_response()),
        Err(e) => return Err(e.into()),
    };

    let post = view.post;
    let is_owner = maybe_user
        .0
        .as_ref()
        .is_some_and(|user| user.id == post.user_id);
    let normalized = content::normalize_line_endings(&post.content);
    let offset = state.config.utc_offset();
    let updated = (post.updated_at != post.created_at)
        .then(|| content::format_date(&post.updated_at, &offset));

    Ok(Html(PostTemplate {
        page: Page::new(&state, maybe_user.0),
        id: post.id,
        lines: normalized.split('\n').map(str::to_string).collect(),
        reading_minutes: content::estimated_reading_minutes(&post.content),
        image_url: state.media.url_for(post.image.as_deref()),
        created: content::format_date(&post.created_at, &offset),
        updated,
        title: post.title,
        author: view.author,
        is_owner,
    })
    .into_response())
}

/// GET /posts/{id}/edit
pub async fn edit_page(
    State(state): State<AppState>,
    identity: Identity,
    Path(raw_id): Path<String>,
) -> AppResult<Response> {
    let Some(id) = parse_id(&raw_id) else {
        return Ok(Redirect::to("/").into_response());
    };

    let view = match state.posts.read_owned(id, &identity).await {
        Ok(view) => view,
        Err(PostError::NotFound) => return Ok(Redirect::to("/").into_response()),
        Err(e) => return Err(e.into()),
    };

    let post = view.post;
    let page = form_page(
        &state,
        identity,
        Some((post.id, post.image.as_deref())),
        post.title.clone(),
        content::normalize_line_endings(&post.content),
        None,
    );
    Ok(Html(page).into_response())
}

/// POST /posts/{id}/edit
pub async fn update(
    State(state): State<AppState>,
    identity: Identity,
    Path(raw_id): Path<String>,
    multipart: Multipart,
) -> AppResult<Response> {
    let Some(id) = parse_id(&raw_id) else {
        return Ok(Redirect::to("/").into_response());
    };

    let existing = match state.posts.read_owned(id, &identity).await {
        Ok(view) => view.post,
        Err(PostError::NotFound) => return Ok(Redirect::to("/").into_response()),
        Err(e) => return Err(e.into()),
    };

    let max_bytes = state.media.max_bytes();
    let form = match read_post_form(multipart, max_bytes).await {
        Ok(form) => form,
        Err(e) => {
            let err = AppError::from(e);
            let page = form_page(
                &state,
                identity,
                Some((id, existing.image.as_deref())),
                existing.title.clone(),
                content::normalize_line_endings(&existing.content),
                Some(err.to_string()),
            );
            return Ok((error_status(&err), Html(page)).into_response());
        }
    };

    if !identity.verify_csrf(&form.csrf_token) {
        return Err(AppError::Forbidden);
    }

    let result = state
        .posts
        .update(
            id,
            &identity,
            &form.title,
            &form.content,
            form.remove_image,
            form.image,
        )
        .await;

    match result {
        Ok(post) => Ok(Redirect::to(&format!("/posts/{}", post.id)).into_response()),
        Err(PostError::NotFound) => Ok(Redirect::to("/").into_response()),
        Err(e) => {
            let err = AppError::from(e);
            if !err.is_user_facing() {
                return Err(err);
            }
            let page = form_page(
                &state,
                identity,
                Some((id, existing.image.as_deref())),
                form.title,
                form.content,
                Some(err.to_string()),
            );
            Ok((error_status(&err), Html(page)).into_response())
        }
    }
}

/// POST /posts/{id}/delete: always lands on the listing with a status message
pub async fn delete(
    State(state): State<AppState>,
    identity: Identity,
    Path(raw_id): Path<String>,
    Form(form): Form<CsrfForm>,
) -> AppResult<Response> {
    if !identity.verify_csrf(&form.csrf_token) {
        return Err(AppError::Forbidden);
    }

    let flash = match parse_id(&raw_id) {
        None => Flash::DeleteNotFound,
        Some(id) => match state.posts.delete(id, &identity).await {
            Ok(()) => Flash::PostDeleted,
            Err(PostError::NotFound) => Flash::DeleteNotFound,
            Err(e) => {
                tracing::error!(post_id = id, "Failed to delete post: {}", e);
                Flash::DeleteFailed
            }
        },
    };

    Ok((
        StatusCode::SEE_OTHER,
        [
            (header::LOCATION, "/".to_string()),
            (header::SET_COOKIE, flash.set_cookie()),
        ],
        "",
    )
        .into_response())
}
