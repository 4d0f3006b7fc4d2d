use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::auth::credentials::CredentialStore;
use crate::config::Config;
use crate::media::MediaStore;
use crate::posts::{PostService, SqlitePostStore};

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub credentials: CredentialStore,
    pub media: MediaStore,
    pub posts: PostService,
}

impl AppState {
    /// Wire the stores over an already-migrated pool.
    pub fn new(db: DbPool, config: Config) -> Self {
        let credentials = CredentialStore::new(db.clone(), config.auth.bcrypt_cost);
        let media = MediaStore::new(config.uploads_path(), config.storage.max_upload_bytes);
        let posts = PostService::new(
            Arc::new(SqlitePostStore::new(db.clone())),
            media.clone(),
            credentials.clone(),
        );

        Self {
            db,
            config,
            credentials,
            media,
            posts,
        }
    }
}
