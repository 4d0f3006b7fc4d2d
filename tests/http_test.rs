use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use image::{ImageFormat, RgbImage};
use std::io::Cursor;
use tempfile::TempDir;
use tower::ServiceExt;

use blogchain::auth::session;
use blogchain::config::Config;
use blogchain::db;
use blogchain::routes;
use blogchain::state::AppState;

const TEST_BCRYPT_COST: u32 = 4;
const CONTENT: &str = "This body is comfortably longer than twenty characters.";
const BOUNDARY: &str = "----blogchain-test-boundary";

struct TestApp {
    app: Router,
    state: AppState,
    _tmp: TempDir,
}

fn test_app_with(configure: impl FnOnce(&mut Config)) -> TestApp {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::in_dir(tmp.path());
    config.auth.bcrypt_cost = TEST_BCRYPT_COST;
    configure(&mut config);

    let pool = db::create_pool(&config.db_path()).unwrap();
    db::run_migrations(&pool).unwrap();
    let state = AppState::new(pool, config);

    TestApp {
        app: routes::app(state.clone()),
        state,
        _tmp: tmp,
    }
}

fn test_app() -> TestApp {
    test_app_with(|_| {})
}

fn png() -> Vec<u8> {
    let img = RgbImage::from_fn(8, 8, |x, y| image::Rgb([x as u8 * 30, y as u8 * 30, 90]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn location(response: &Response<Body>) -> &str {
    response.headers()[header::LOCATION].to_str().unwrap()
}

/// `name=value` of the first Set-Cookie header naming `name`.
fn set_cookie(response: &Response<Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or_default().trim().to_string())
        .find(|pair| pair.starts_with(&format!("{}=", name)))
}

fn form_request(uri: &str, cookie: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get_request(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, Vec<u8>),
}

fn multipart_request(uri: &str, cookie: &str, parts: Vec<Part<'_>>) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, file_name, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                         Content-Type: image/png\r\n\r\n",
                        name, file_name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(&bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .header(header::COOKIE, cookie)
        .body(Body::from(body))
        .unwrap()
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn register(&self, username: &str) -> Response<Body> {
        let body = format!(
            "username={u}&email={u}%40example.com&password=secret1&confirm_password=secret1",
            u = username
        );
        self.send(form_request("/register", None, &body)).await
    }

    /// Register and log in; returns the session cookie pair and CSRF token.
    async fn login_as(&self, username: &str) -> (String, String) {
        self.register(username).await;
        let response = self
            .send(form_request(
                "/login",
                None,
                &format!("username={}&password=secret1", username),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let cookie = set_cookie(&response, "blogchain_session").unwrap();
        let token = cookie.split_once('=').unwrap().1;
        let identity = session::lookup_identity(&self.state.db, token)
            .unwrap()
            .unwrap();
        (cookie, identity.csrf_token)
    }

    async fn create_post(
        &self,
        cookie: &str,
        csrf: &str,
        title: &str,
        image: Option<Vec<u8>>,
    ) -> Response<Body> {
        let mut parts = vec![
            Part::Text("csrf_token", csrf),
            Part::Text("title", title),
            Part::Text("content", CONTENT),
        ];
        if let Some(bytes) = image {
            parts.push(Part::File("blog_image", "photo.png", bytes));
        }
        self.send(multipart_request("/posts", cookie, parts)).await
    }

    fn uploaded_files(&self) -> usize {
        std::fs::read_dir(self.state.media.root())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

fn post_id(response: &Response<Body>) -> i64 {
    location(response)
        .strip_prefix("/posts/")
        .unwrap()
        .parse()
        .unwrap()
}

#[tokio::test]
async fn registration_messages() {
    let t = test_app();

    let response = t.register("alice").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response)
        .await
        .contains("Registration successful! You can now login."));

    let response = t.register("alice").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert!(body_text(response)
        .await
        .contains("Username or email already exists"));

    let response = t
        .send(form_request(
            "/register",
            None,
            "username=bob&email=bob%40example.com&password=secret1&confirm_password=secret2",
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("Passwords do not match"));

    let response = t
        .send(form_request(
            "/register",
            None,
            "username=bob&email=not-an-email&password=secret1&confirm_password=secret1",
        ))
        .await;
    assert!(body_text(response).await.contains("Invalid email format"));

    let response = t
        .send(form_request(
            "/register",
            None,
            "username=bob&email=bob%40example.com&password=abc&confirm_password=abc",
        ))
        .await;
    assert!(body_text(response)
        .await
        .contains("Password must be at least 6 characters"));
}

#[tokio::test]
async fn login_failure_is_uniform() {
    let t = test_app();
    t.register("alice").await;

    let wrong_password = t
        .send(form_request("/login", None, "username=alice&password=nope123"))
        .await;
    let unknown_user = t
        .send(form_request("/login", None, "username=mallory&password=secret1"))
        .await;

    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_user.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookie(&wrong_password, "blogchain_session").is_none());
    assert!(body_text(wrong_password)
        .await
        .contains("Invalid username or password"));
    assert!(body_text(unknown_user)
        .await
        .contains("Invalid username or password"));
}

#[tokio::test]
async fn guarded_pages_redirect_to_login() {
    let t = test_app();

    let response = t.send(get_request("/posts/new", None)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");

    let response = t
        .send(get_request("/posts/new", Some("blogchain_session=forged")))
        .await;
    assert_eq!(location(&response), "/login");
}

#[tokio::test]
async fn login_rotates_presented_session() {
    let t = test_app();
    let (first_cookie, _) = t.login_as("alice").await;

    let response = t
        .send(form_request(
            "/login",
            Some(&first_cookie),
            "username=alice&password=secret1",
        ))
        .await;
    let second_cookie = set_cookie(&response, "blogchain_session").unwrap();
    assert_ne!(first_cookie, second_cookie);

    let old = t.send(get_request("/posts/new", Some(&first_cookie))).await;
    assert_eq!(old.status(), StatusCode::SEE_OTHER);
    let new = t.send(get_request("/posts/new", Some(&second_cookie))).await;
    assert_eq!(new.status(), StatusCode::OK);
}

#[tokio::test]
async fn create_and_view_post_with_image() {
    let t = test_app();
    let (cookie, csrf) = t.login_as("alice").await;

    let response = t.create_post(&cookie, &csrf, "Hello World Today", Some(png())).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let id = post_id(&response);

    let page = body_text(t.send(get_request(&format!("/posts/{}", id), None)).await).await;
    assert!(page.contains("Hello World Today"));
    assert!(page.contains("alice"));

    let view = t.state.posts.read(id).await.unwrap();
    let key = view.post.image.unwrap();
    assert!(page.contains(&format!("/uploads/{}", key)));

    let image = t.send(get_request(&format!("/uploads/{}", key), None)).await;
    assert_eq!(image.status(), StatusCode::OK);
    assert_eq!(image.headers()[header::CONTENT_TYPE], "image/png");

    let listing = body_text(t.send(get_request("/", None)).await).await;
    assert!(listing.contains("Hello World Today"));
    assert!(listing.contains("1 min read"));
}

#[tokio::test]
async fn mutations_require_csrf_token() {
    let t = test_app();
    let (cookie, _csrf) = t.login_as("alice").await;

    let response = t.create_post(&cookie, "wrong-token", "Hello World Today", None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(t.state.posts.list().await.unwrap().is_empty());

    let response = t
        .send(form_request("/logout", Some(&cookie), "csrf_token=wrong"))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let still_in = t.send(get_request("/posts/new", Some(&cookie))).await;
    assert_eq!(still_in.status(), StatusCode::OK);
}

#[tokio::test]
async fn invalid_submissions_rerender_the_form() {
    let t = test_app();
    let (cookie, csrf) = t.login_as("alice").await;

    let response = t.create_post(&cookie, &csrf, "Hey", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response)
        .await
        .contains("Title must be at least 5 characters."));

    let response = t
        .create_post(&cookie, &csrf, "Hello World Today", Some(b"GIF89a not really".to_vec()))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("File is not a valid image"));

    assert!(t.state.posts.list().await.unwrap().is_empty());
    assert_eq!(t.uploaded_files(), 0);
}

#[tokio::test]
async fn oversized_image_is_rejected() {
    let t = test_app_with(|config| config.storage.max_upload_bytes = 16);
    let (cookie, csrf) = t.login_as("alice").await;

    let response = t.create_post(&cookie, &csrf, "Hello World Today", Some(png())).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(body_text(response).await.contains("Image is too large"));
    assert!(t.state.posts.list().await.unwrap().is_empty());
    assert_eq!(t.uploaded_files(), 0);
}

#[tokio::test]
async fn storage_failure_rerenders_the_form() {
    let t = test_app();
    let (cookie, csrf) = t.login_as("alice").await;
    let id = post_id(&t.create_post(&cookie, &csrf, "Hello World Today", None).await);

    // A regular file where the upload directory should be.
    std::fs::write(t.state.media.root(), b"not a directory").unwrap();

    let response = t.create_post(&cookie, &csrf, "Second post title", Some(png())).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_text(response).await;
    assert!(body.contains("Could not save the image. Please try again."));
    assert!(body.contains("value=\"Second post title\""));
    assert!(!body.contains("Something went wrong"));

    let response = t
        .send(multipart_request(
            &format!("/posts/{}/edit", id),
            &cookie,
            vec![
                Part::Text("csrf_token", &csrf),
                Part::Text("title", "Edited title here"),
                Part::Text("content", CONTENT),
                Part::File("blog_image", "new.png", png()),
            ],
        ))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_text(response).await;
    assert!(body.contains("Could not save the image. Please try again."));
    assert!(body.contains("Edit Post"));

    let posts = t.state.posts.list().await.unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].post.title, "Hello World Today");
    assert_eq!(posts[0].post.image, None);
}

#[tokio::test]
async fn broken_edit_body_rerenders_normalized_content() {
    let t = test_app_with(|config| config.storage.max_upload_bytes = 16);
    let (cookie, csrf) = t.login_as("alice").await;
    let id = post_id(&t.create_post(&cookie, &csrf, "Hello World Today", None).await);
    t.state
        .db
        .get()
        .unwrap()
        .execute(
            "UPDATE posts SET content = ?1 WHERE id = ?2",
            rusqlite::params!["Imported line one\r\nImported line two", id],
        )
        .unwrap();

    let oversized = vec![0u8; 2 * 1024 * 1024];
    let response = t
        .send(multipart_request(
            &format!("/posts/{}/edit", id),
            &cookie,
            vec![
                Part::Text("csrf_token", &csrf),
                Part::Text("title", "Hello World Today"),
                Part::Text("content", CONTENT),
                Part::File("blog_image", "huge.png", oversized),
            ],
        ))
        .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = body_text(response).await;
    assert!(body.contains("Image is too large"));
    assert!(body.contains("Imported line one\nImported line two"));
    assert!(!body.contains('\r'));
}

#[tokio::test]
async fn truncated_remove_image_field_is_a_failed_upload() {
    let t = test_app();
    let (cookie, csrf) = t.login_as("alice").await;
    let id = post_id(&t.create_post(&cookie, &csrf, "Hello World Today", Some(png())).await);
    let key = t.state.posts.read(id).await.unwrap().post.image.unwrap();

    let mut body = String::new();
    let fields = [
        ("csrf_token", csrf.as_str()),
        ("title", "Changed title"),
        ("content", CONTENT),
    ];
    for (name, value) in fields {
        body.push_str(&format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
            BOUNDARY, name, value
        ));
    }
    // The body ends inside the remove_image part, with no closing boundary.
    body.push_str(&format!(
        "--{}\r\nContent-Disposition: form-data; name=\"remove_image\"\r\n\r\n1",
        BOUNDARY
    ));

    let request = Request::builder()
        .method("POST")
        .uri(format!("/posts/{}/edit", id))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .header(header::COOKIE, &cookie)
        .body(Body::from(body))
        .unwrap();
    let response = t.send(request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response)
        .await
        .contains("The image upload did not complete. Please try again."));

    let post = t.state.posts.read(id).await.unwrap().post;
    assert_eq!(post.title, "Hello World Today");
    assert_eq!(post.image, Some(key.clone()));
    assert!(t.state.media.exists(&key));
}

#[tokio::test]
async fn only_the_owner_can_edit_or_delete() {
    let t = test_app();
    let (alice, alice_csrf) = t.login_as("alice").await;
    let (bob, bob_csrf) = t.login_as("bob").await;

    let id = post_id(&t.create_post(&alice, &alice_csrf, "Alice writes", Some(png())).await);

    let response = t.send(get_request(&format!("/posts/{}/edit", id), Some(&bob))).await;
    assert_eq!(location(&response), "/");

    let response = t
        .send(multipart_request(
            &format!("/posts/{}/edit", id),
            &bob,
            vec![
                Part::Text("csrf_token", &bob_csrf),
                Part::Text("title", "Bob was here"),
                Part::Text("content", CONTENT),
            ],
        ))
        .await;
    assert_eq!(location(&response), "/");

    let foreign = t
        .send(form_request(
            &format!("/posts/{}/delete", id),
            Some(&bob),
            &format!("csrf_token={}", bob_csrf),
        ))
        .await;
    let missing = t
        .send(form_request(
            "/posts/9999/delete",
            Some(&bob),
            &format!("csrf_token={}", bob_csrf),
        ))
        .await;
    assert_eq!(
        set_cookie(&foreign, "blogchain_flash"),
        set_cookie(&missing, "blogchain_flash")
    );

    let view = t.state.posts.read(id).await.unwrap();
    assert_eq!(view.post.title, "Alice writes");
    assert_eq!(t.uploaded_files(), 1);
}

#[tokio::test]
async fn owner_edits_replace_the_image() {
    let t = test_app();
    let (cookie, csrf) = t.login_as("alice").await;
    let id = post_id(&t.create_post(&cookie, &csrf, "Hello World Today", Some(png())).await);
    let old_key = t.state.posts.read(id).await.unwrap().post.image.unwrap();

    let response = t
        .send(multipart_request(
            &format!("/posts/{}/edit", id),
            &cookie,
            vec![
                Part::Text("csrf_token", &csrf),
                Part::Text("title", "Hello Again World"),
                Part::Text("content", CONTENT),
                Part::File("blog_image", "new.png", png()),
            ],
        ))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), format!("/posts/{}", id));

    let post = t.state.posts.read(id).await.unwrap().post;
    assert_eq!(post.title, "Hello Again World");
    let new_key = post.image.unwrap();
    assert_ne!(new_key, old_key);
    assert!(!t.state.media.exists(&old_key));
    assert_eq!(t.uploaded_files(), 1);

    let response = t
        .send(multipart_request(
            &format!("/posts/{}/edit", id),
            &cookie,
            vec![
                Part::Text("csrf_token", &csrf),
                Part::Text("title", "Hello Again World"),
                Part::Text("content", CONTENT),
                Part::Text("remove_image", "1"),
            ],
        ))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(t.state.posts.read(id).await.unwrap().post.image, None);
    assert_eq!(t.uploaded_files(), 0);
}

#[tokio::test]
async fn delete_sets_flash_shown_once() {
    let t = test_app();
    let (cookie, csrf) = t.login_as("alice").await;
    let id = post_id(&t.create_post(&cookie, &csrf, "Short lived post", Some(png())).await);

    let response = t
        .send(form_request(
            &format!("/posts/{}/delete", id),
            Some(&cookie),
            &format!("csrf_token={}", csrf),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");
    let flash = set_cookie(&response, "blogchain_flash").unwrap();
    assert_eq!(t.uploaded_files(), 0);

    let listing = t.send(get_request("/", Some(&flash))).await;
    assert_eq!(
        set_cookie(&listing, "blogchain_flash").as_deref(),
        Some("blogchain_flash=")
    );
    assert!(body_text(listing)
        .await
        .contains("Blog post deleted successfully!"));

    let response = t.send(get_request(&format!("/posts/{}", id), None)).await;
    assert_eq!(location(&response), "/");
}

#[tokio::test]
async fn logout_ends_the_session() {
    let t = test_app();
    let (cookie, csrf) = t.login_as("alice").await;

    let response = t
        .send(form_request("/logout", Some(&cookie), &format!("csrf_token={}", csrf)))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");
    assert_eq!(
        set_cookie(&response, "blogchain_session").as_deref(),
        Some("blogchain_session=")
    );

    let response = t.send(get_request("/posts/new", Some(&cookie))).await;
    assert_eq!(location(&response), "/login");

    // A second logout with the dead cookie is harmless.
    let response = t.send(form_request("/logout", Some(&cookie), "")).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn unknown_uploads_are_404() {
    let t = test_app();
    let response = t.send(get_request("/uploads/nothing-here.png", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = t.send(get_request("/uploads/..%2Fblogchain.db", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn infrastructure_errors_are_generic_outside_development() {
    let t = test_app();
    t.state
        .db
        .get()
        .unwrap()
        .execute_batch("DROP TABLE posts;")
        .unwrap();

    let response = t.send(get_request("/", None)).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_text(response).await;
    assert!(body.contains("Something went wrong"));
    assert!(!body.contains("posts"));
}

#[tokio::test]
async fn development_mode_shows_error_detail() {
    let t = test_app_with(|config| config.server.environment = "development".into());
    t.state
        .db
        .get()
        .unwrap()
        .execute_batch("DROP TABLE posts;")
        .unwrap();

    let response = t.send(get_request("/", None)).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_text(response).await;
    assert!(body.contains("Database error"));
    assert!(body.contains("posts"));
}
