use chrono::{FixedOffset, Offset, Utc};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Default upload ceiling: 5 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Parser, Debug, Default)]
#[command(name = "blogchain", about = "A small authenticated publishing platform")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, env = "BLOGCHAIN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long, env = "BLOGCHAIN_HOST")]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long, env = "BLOGCHAIN_PORT")]
    pub port: Option<u16>,

    /// Path to data directory
    #[arg(long, env = "BLOGCHAIN_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Path to the SQLite database file
    #[arg(long, env = "DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Site display name
    #[arg(long, env = "SITE_NAME")]
    pub site_name: Option<String>,

    /// Site tagline
    #[arg(long, env = "SITE_TAGLINE")]
    pub site_tagline: Option<String>,

    /// UTC offset dates are displayed in, e.g. `+05:30`
    #[arg(long, env = "TIMEZONE")]
    pub timezone: Option<String>,

    /// Directory uploaded images are stored in
    #[arg(long, env = "UPLOAD_DIR")]
    pub upload_dir: Option<PathBuf>,

    /// Maximum upload size in bytes
    #[arg(long, env = "MAX_FILE_SIZE")]
    pub max_file_size: Option<u64>,

    /// Session lifetime in seconds
    #[arg(long, env = "SESSION_LIFETIME")]
    pub session_lifetime: Option<u64>,

    /// Environment mode (`development` shows detailed errors)
    #[arg(long, env = "ENVIRONMENT")]
    pub environment: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub site: SiteConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SiteConfig {
    pub name: String,
    pub tagline: String,
    /// Fixed UTC offset (`+05:30`, `-0800`) for rendered dates.
    pub timezone: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub path: Option<PathBuf>,
    pub max_upload_bytes: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub cookie_name: String,
    pub session_lifetime_secs: u64,
    pub bcrypt_cost: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            environment: "production".to_string(),
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            name: "Blog_Chain".to_string(),
            tagline: "Linking thoughts, one post at a time".to_string(),
            timezone: "+00:00".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: "blogchain_session".to_string(),
            session_lifetime_secs: 3600,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // CLI / environment overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }
        if let Some(ref env) = cli.environment {
            config.server.environment = env.clone();
        }
        if let Some(ref path) = cli.db_path {
            config.database.path = Some(path.clone());
        }
        if let Some(ref name) = cli.site_name {
            config.site.name = name.clone();
        }
        if let Some(ref tagline) = cli.site_tagline {
            config.site.tagline = tagline.clone();
        }
        if let Some(ref tz) = cli.timezone {
            config.site.timezone = tz.clone();
        }
        if let Some(ref dir) = cli.upload_dir {
            config.storage.path = Some(dir.clone());
        }
        if let Some(max) = cli.max_file_size {
            config.storage.max_upload_bytes = max;
        }
        if let Some(secs) = cli.session_lifetime {
            config.auth.session_lifetime_secs = secs;
        }

        if config.site.timezone.parse::<FixedOffset>().is_err() {
            anyhow::bail!(
                "Invalid site timezone {:?}: expected a UTC offset such as +05:30",
                config.site.timezone
            );
        }

        // Resolve paths relative to data dir
        if config.database.path.is_none() {
            config.database.path = Some(data_dir.join("blogchain.db"));
        }
        if config.storage.path.is_none() {
            config.storage.path = Some(data_dir.join("uploads"));
        }

        Ok(config)
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".blogchain")
        })
    }

    /// A config rooted entirely inside `dir`, used by tests and local tooling.
    pub fn in_dir(dir: &std::path::Path) -> Self {
        let mut config = Config::default();
        config.database.path = Some(dir.join("blogchain.db"));
        config.storage.path = Some(dir.join("uploads"));
        config
    }

    pub fn db_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("blogchain.db"))
    }

    pub fn uploads_path(&self) -> PathBuf {
        self.storage
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("uploads"))
    }

    /// Offset used for displayed dates. `load` rejects unparseable values,
    /// so the UTC fallback only applies to hand-built configs.
    pub fn utc_offset(&self) -> FixedOffset {
        self.site
            .timezone
            .parse()
            .unwrap_or_else(|_| Utc.fix())
    }

    pub fn is_development(&self) -> bool {
        self.server.environment.eq_ignore_ascii_case("development")
    }
}
