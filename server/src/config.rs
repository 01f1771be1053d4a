use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

/// Command line options for the chat server.
#[derive(Parser, Debug, Default)]
#[command(name = "chatapp", about = "Two-party chat backend")]
pub struct Cli {
    /// Override bind address (host:port).
    #[arg(long)]
    pub bind: Option<String>,
    /// Override server port.
    #[arg(long)]
    pub port: Option<u16>,
    /// Enable or disable logging (true/false).
    #[arg(long)]
    pub logging: Option<bool>,
    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Runtime configuration for the server resolved from file, env and CLI.
#[derive(Clone)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind: String,
    /// Base directory for the database, uploaded media and the signing secret.
    pub data_dir: PathBuf,
    /// Maximum upload size in megabytes.
    pub max_upload_mb: u64,
    /// Whether verbose logging is enabled.
    pub logging_enabled: bool,
    /// Origin media URLs are built from.
    pub public_url: String,
    /// Allowed browser origin; `None` allows any.
    pub cors_origin: Option<String>,
    /// Reject a login while the account already holds a live session.
    pub single_session: bool,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
    /// Explicit token signing secret; generated and persisted when absent.
    pub jwt_secret: Option<String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind", &self.bind)
            .field("data_dir", &self.data_dir)
            .field("max_upload_mb", &self.max_upload_mb)
            .field("logging_enabled", &self.logging_enabled)
            .field("public_url", &self.public_url)
            .field("cors_origin", &self.cors_origin)
            .field("single_session", &self.single_session)
            .field("access_ttl_minutes", &self.access_ttl_minutes)
            .field("refresh_ttl_days", &self.refresh_ttl_days)
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: format!("127.0.0.1:{}", default_port()),
            data_dir: default_data_dir(),
            max_upload_mb: 5,
            logging_enabled: default_logging(),
            public_url: format!("http://127.0.0.1:{}", default_port()),
            cors_origin: None,
            single_session: true,
            access_ttl_minutes: default_access_ttl(),
            refresh_ttl_days: default_refresh_ttl(),
            jwt_secret: None,
        }
    }
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    logging: FileLogging,
    #[serde(default)]
    auth: FileAuth,
}

#[derive(Deserialize)]
struct FileServer {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    public_url: Option<String>,
    #[serde(default)]
    cors_origin: Option<String>,
    #[serde(default)]
    max_upload_mb: Option<u64>,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

#[derive(Deserialize)]
struct FileAuth {
    #[serde(default = "default_single_session")]
    single_session: bool,
    #[serde(default = "default_access_ttl")]
    access_ttl_minutes: i64,
    #[serde(default = "default_refresh_ttl")]
    refresh_ttl_days: i64,
}

fn default_port() -> u16 {
    8787
}

fn default_logging() -> bool {
    true
}

fn default_single_session() -> bool {
    true
}

fn default_access_ttl() -> i64 {
    60
}

fn default_refresh_ttl() -> i64 {
    30
}

impl Default for FileServer {
    fn default() -> Self {
        Self {
            port: default_port(),
            public_url: None,
            cors_origin: None,
            max_upload_mb: None,
        }
    }
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_logging(),
        }
    }
}

impl Default for FileAuth {
    fn default() -> Self {
        Self {
            single_session: default_single_session(),
            access_ttl_minutes: default_access_ttl(),
            refresh_ttl_days: default_refresh_ttl(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        // config file path precedence: CLI -> ENV -> default
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("CHATAPP_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/chatapp.toml"));

        let file_cfg = match fs::read(&config_path) {
            Ok(bytes) => {
                let contents = String::from_utf8_lossy(&bytes);
                toml::from_str::<FileConfig>(&contents).context("invalid config file")?
            }
            Err(_) => FileConfig::default(),
        };
        let mut port = file_cfg.server.port;
        let mut logging = file_cfg.logging.enabled;

        // environment overrides
        if let Some(p) = env_parse::<u16>("CHATAPP_PORT") {
            port = p;
        }
        if let Some(l) = env_parse::<bool>("CHATAPP_LOGGING") {
            logging = l;
        }

        // CLI overrides
        if let Some(p) = cli.port {
            port = p;
        }
        if let Some(l) = cli.logging {
            logging = l;
        }

        if !(1024..=65535).contains(&port) {
            anyhow::bail!("invalid_port");
        }
        if file_cfg.auth.access_ttl_minutes <= 0 || file_cfg.auth.refresh_ttl_days <= 0 {
            anyhow::bail!("invalid_token_ttl");
        }

        let bind = if let Some(b) = &cli.bind {
            b.clone()
        } else if let Ok(b) = std::env::var("BIND") {
            b
        } else {
            format!("127.0.0.1:{}", port)
        };

        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());
        let max_upload_mb = env_parse("MAX_UPLOAD_MB")
            .or(file_cfg.server.max_upload_mb)
            .unwrap_or(5);
        let public_url = std::env::var("PUBLIC_URL")
            .ok()
            .or(file_cfg.server.public_url)
            .unwrap_or_else(|| format!("http://{}", bind));
        let cors_origin = std::env::var("CORS_ORIGIN")
            .ok()
            .or(file_cfg.server.cors_origin)
            .filter(|o| !o.trim().is_empty());
        let jwt_secret = std::env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty());

        Ok(Self {
            bind,
            data_dir,
            max_upload_mb,
            logging_enabled: logging,
            public_url,
            cors_origin,
            single_session: file_cfg.auth.single_session,
            access_ttl_minutes: file_cfg.auth.access_ttl_minutes,
            refresh_ttl_days: file_cfg.auth.refresh_ttl_days,
            jwt_secret,
        })
    }

    /// Helper to return the upload limit in bytes.
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb * 1024 * 1024
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chatapp.db")
    }

    pub fn media_dir(&self) -> PathBuf {
        self.data_dir.join("media")
    }

    pub fn secret_path(&self) -> PathBuf {
        self.data_dir.join("jwt.secret")
    }
}

/// Determine the default data directory.
pub fn default_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        let mut p = PathBuf::from(home);
        p.push(".local/share/chatapp");
        p
    } else {
        PathBuf::from("./chatapp_data")
    }
}
