use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::BotError;
use crate::sources::models::TrackMetadata;
use crate::transport::{ChatRef, UserRef};

const FAILURES_FILE: &str = "download.json";

/// One request that ended in an error.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FailureEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub chat: i64,
    pub user: Option<u64>,
    pub track_id: Option<String>,
    pub title: Option<String>,
    pub category: String,
    pub error: String,
}

impl FailureEntry {
    pub fn new(
        chat: ChatRef,
        user: Option<UserRef>,
        track: Option<&TrackMetadata>,
        error: &BotError,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            chat: chat.0,
            user: user.map(|u| u.0),
            track_id: track.map(|t| t.id.clone()),
            title: track.map(|t| t.title.clone()),
            category: error.category().to_string(),
            error: error.to_string(),
        }
    }
}

/// Failed requests, one JSON array per day under `<base>/<YYYY-MM-DD>/`.
pub struct ErrorLogManager {
    base_path: PathBuf,
}

impl ErrorLogManager {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self { base_path: base_path.into() }
    }

    /// Today's date as a string (YYYY-MM-DD)
    pub fn today_str() -> String {
        Local::now().format("%Y-%m-%d").to_string()
    }

    fn log_path(&self, date: &str) -> PathBuf {
        self.base_path.join(date).join(FAILURES_FILE)
    }

    pub fn record(&self, entry: FailureEntry) -> io::Result<()> {
        let path = self.log_path(&Self::today_str());
        let mut entries = load_entries(&path);
        entries.push(entry);
        save_entries(&path, &entries)
    }

    pub fn entries_for_date(&self, date: &str) -> Vec<FailureEntry> {
        load_entries(&self.log_path(date))
    }

    pub fn count_for_date(&self, date: &str) -> usize {
        self.entries_for_date(date).len()
    }

    /// Dates that have a log, newest first.
    pub fn list_dates(&self) -> Vec<String> {
        let mut dates: Vec<String> = fs::read_dir(&self.base_path)
            .into_iter()
            .flatten()
            .flatten()
            .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| NaiveDate::parse_from_str(name, "%Y-%m-%d").is_ok())
            .collect();
        dates.sort_by(|a, b| b.cmp(a));
        dates
    }

    /// Most recent entries across all dates, newest first.
    pub fn recent(&self, limit: usize) -> Vec<FailureEntry> {
        let mut all = Vec::new();
        for date in self.list_dates() {
            all.extend(self.entries_for_date(&date));
            if all.len() >= limit {
                break;
            }
        }
        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        all.truncate(limit);
        all
    }
}

fn load_entries(path: &Path) -> Vec<FailureEntry> {
    match fs::read_to_string(path) {
        Ok(data) => serde_json::from_str(&data).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "failure log unreadable, starting a new one");
            Vec::new()
        }),
        Err(_) => Vec::new(),
    }
}

fn save_entries(path: &Path, entries: &[FailureEntry]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_string_pretty(entries).map_err(io::Error::other)?;
    fs::write(path, data)
}
