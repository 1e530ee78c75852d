use std::time::Duration;
use thiserror::Error;

use crate::transport::TransportError;

/// Substrings the extractor prints when its session cookies are missing,
/// rejected or expired. Matching is case-insensitive and best-effort: the
/// extractor has no stable error taxonomy.
const AUTH_MARKERS: [&str; 7] = [
    "sign in to confirm",
    "confirm you're not a bot",
    "confirm you’re not a bot",
    "use --cookies",
    "cookies are no longer valid",
    "login required",
    "requires authentication",
];

#[derive(Debug, Error)]
pub enum BotError {
    #[error("could not resolve track: {0}")]
    Resolution(String),

    #[error("search returned no results")]
    EmptyResult,

    /// Carries the exact text shown to the requester.
    #[error("unsupported link: {0}")]
    UnsupportedLink(String),

    #[error("Spotify lookup failed: {0}")]
    Spotify(String),

    #[error("downloaded audio file not found")]
    ArtifactNotFound,

    #[error("artifact is {size} bytes, limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("upload timed out")]
    UploadTimedOut,

    #[error("extractor did not finish within {0:?}")]
    DownloadTimedOut(Duration),

    #[error("extractor authentication failed: {0}")]
    AuthExpired(String),

    #[error("pipeline failure: {0}")]
    Pipeline(String),

    #[error("download queue is closed")]
    QueueClosed,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BotError {
    /// Short stable label used in logs and the failure journal.
    pub fn category(&self) -> &'static str {
        match self {
            BotError::Resolution(_) => "resolution",
            BotError::EmptyResult => "empty_result",
            BotError::UnsupportedLink(_) => "unsupported_link",
            BotError::Spotify(_) => "spotify",
            BotError::ArtifactNotFound => "artifact_not_found",
            BotError::TooLarge { .. } => "too_large",
            BotError::UploadTimedOut => "upload_timed_out",
            BotError::DownloadTimedOut(_) => "download_timed_out",
            BotError::AuthExpired(_) => "auth_expired",
            BotError::Pipeline(_) => "pipeline",
            BotError::QueueClosed => "queue_closed",
            BotError::Transport(_) => "transport",
            BotError::Storage(_) => "storage",
            BotError::Io(_) => "io",
        }
    }

    /// Text left in the requester's status message.
    pub fn user_message(&self) -> String {
        match self {
            BotError::Resolution(_) | BotError::EmptyResult => {
                "Could not find the song or an error occurred.".to_string()
            }
            BotError::UnsupportedLink(text) => text.clone(),
            BotError::Spotify(_) => "Could not process the Spotify link.".to_string(),
            BotError::ArtifactNotFound => {
                "Sorry, the downloaded file could not be found.".to_string()
            }
            BotError::TooLarge { size, limit } => format!(
                "❌ The file is too large to send ({:.1} MB, limit is {:.0} MB).",
                *size as f64 / 1_048_576.0,
                *limit as f64 / 1_048_576.0
            ),
            BotError::UploadTimedOut => {
                "⏱️ Uploading the song timed out. Please try again later.".to_string()
            }
            BotError::DownloadTimedOut(_) => {
                "⏱️ The download took too long and was stopped.".to_string()
            }
            BotError::AuthExpired(_) => "Sorry, the download failed because the bot's access \
                 to the source has expired. The admins have been notified."
                .to_string(),
            BotError::QueueClosed => {
                "The bot is restarting. Please send your request again in a moment.".to_string()
            }
            _ => "Sorry, an unexpected error occurred during download.".to_string(),
        }
    }

    pub fn notifies_admins(&self) -> bool {
        matches!(self, BotError::AuthExpired(_))
    }
}

/// Map the extractor's error output to a failure category.
pub fn classify_extractor_failure(stderr: &str) -> BotError {
    let lowered = stderr.to_lowercase();
    let detail = last_error_line(stderr);
    if AUTH_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        BotError::AuthExpired(detail)
    } else {
        BotError::Pipeline(detail)
    }
}

fn last_error_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.starts_with("ERROR"))
        .or_else(|| stderr.lines().rev().map(str::trim).find(|l| !l.is_empty()))
        .unwrap_or("extractor exited without output")
        .to_string()
}
