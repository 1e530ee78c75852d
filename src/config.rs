use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Cli;
use crate::settings::{RuntimeSettings, UploadMode};
use crate::transport::{ChatRef, UserRef};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_MAX_FILE_SIZE_MB: u64 = 50;
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 900;
pub const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct SpotifyCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Process configuration, fixed for the lifetime of the process. Mutable
/// policy lives in [`RuntimeSettings`].
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub allowed_group: ChatRef,
    pub admins: Vec<UserRef>,
    pub force_sub_channel: Option<String>,
    pub bot_username: Option<String>,
    pub spotify: Option<SpotifyCredentials>,
    pub cookie_file: Option<PathBuf>,
    pub default_settings: RuntimeSettings,
    pub max_file_size: u64,
    pub download_timeout: Duration,
    pub upload_timeout: Duration,
    pub cache_ttl: Option<Duration>,
    pub ytdlp_bin: PathBuf,
    pub port: u16,
    pub data_dir: PathBuf,
}

impl Config {
    /// Read the `.env` file named on the command line (if present), then the
    /// process environment. Command line flags win.
    pub fn load(cli: &Cli) -> Result<Self> {
        match dotenvy::from_path(&cli.env_file) {
            Ok(()) => tracing::debug!(path = %cli.env_file.display(), "loaded env file"),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(e).with_context(|| format!("reading {}", cli.env_file.display())),
        }
        let mut config = Self::from_lookup(env_var_string)?;
        if let Some(dir) = &cli.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(port) = cli.port {
            config.port = port;
        }
        Ok(config)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bot_token = lookup("BOT_TOKEN").ok_or_else(|| anyhow!("BOT_TOKEN is not set"))?;
        let allowed_group = lookup("ALLOWED_GROUP_ID")
            .ok_or_else(|| anyhow!("ALLOWED_GROUP_ID is not set"))?
            .parse::<i64>()
            .map(ChatRef)
            .context("ALLOWED_GROUP_ID must be a numeric chat id")?;

        let admins = parse_admins(&lookup("ADMINS").unwrap_or_default())?;
        if admins.is_empty() {
            bail!("ADMINS is not set or is empty");
        }

        let spotify = match (lookup("SPOTIPY_CLIENT_ID"), lookup("SPOTIPY_CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => Some(SpotifyCredentials {
                client_id,
                client_secret,
            }),
            _ => None,
        };

        let default_settings = RuntimeSettings {
            upload_mode: lookup("UPLOAD_MODE")
                .and_then(|v| UploadMode::parse(&v))
                .unwrap_or(UploadMode::Direct),
            queue_enabled: lookup("QUEUE_ENABLED").map(|v| parse_flag(&v)).unwrap_or(false),
            auto_delete_delay: lookup("AUTO_DELETE_DELAY")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0),
        };

        let cache_ttl_hours = parse_or("CACHE_TTL_HOURS", &lookup, 0)?;

        Ok(Self {
            bot_token,
            allowed_group,
            admins,
            force_sub_channel: lookup("FORCE_SUB_CHANNEL"),
            bot_username: lookup("BOT_USERNAME").map(|u| u.trim_start_matches('@').to_string()),
            spotify,
            cookie_file: lookup("COOKIE_FILE_PATH").map(PathBuf::from),
            default_settings,
            max_file_size: parse_or("MAX_FILE_SIZE_MB", &lookup, DEFAULT_MAX_FILE_SIZE_MB)?
                * 1024
                * 1024,
            download_timeout: Duration::from_secs(parse_or(
                "DOWNLOAD_TIMEOUT_SECS",
                &lookup,
                DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            )?),
            upload_timeout: Duration::from_secs(parse_or(
                "UPLOAD_TIMEOUT_SECS",
                &lookup,
                DEFAULT_UPLOAD_TIMEOUT_SECS,
            )?),
            cache_ttl: (cache_ttl_hours > 0).then(|| Duration::from_secs(cache_ttl_hours * 3600)),
            ytdlp_bin: lookup("YTDLP_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("yt-dlp")),
            port: lookup("PORT")
                .map(|v| v.parse::<u16>().context("PORT must be a port number"))
                .transpose()?
                .unwrap_or(DEFAULT_PORT),
            data_dir: lookup("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
        })
    }

    pub fn is_admin(&self, user: UserRef) -> bool {
        self.admins.contains(&user)
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.data_dir.join("downloads")
    }

    pub fn error_log_dir(&self) -> PathBuf {
        self.data_dir.join("errors")
    }

    pub fn managed_cookie_path(&self) -> PathBuf {
        self.data_dir.join("cookies.txt")
    }
}

fn parse_admins(raw: &str) -> Result<Vec<UserRef>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map(UserRef)
                .with_context(|| format!("ADMINS entry {s:?} is not a user id"))
        })
        .collect()
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "t")
}

fn parse_or(key: &str, lookup: &impl Fn(&str) -> Option<String>, default: u64) -> Result<u64> {
    lookup(key)
        .map(|v| v.parse::<u64>().with_context(|| format!("{key} must be a whole number")))
        .transpose()
        .map(|v| v.unwrap_or(default))
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
