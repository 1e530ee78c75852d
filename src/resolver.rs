use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::downloader::MediaExtractor;
use crate::error::BotError;
use crate::sources::is_url;
use crate::sources::models::{RawInfo, TrackMetadata};

/// Turns a free-text query or a link into canonical track metadata.
pub struct Resolver {
    extractor: Arc<dyn MediaExtractor>,
    timeout: Duration,
}

impl Resolver {
    pub fn new(extractor: Arc<dyn MediaExtractor>, timeout: Duration) -> Self {
        Self { extractor, timeout }
    }

    /// Search terms pick the single top-ranked result; links are probed as-is.
    pub async fn resolve(
        &self,
        query: &str,
        cookies: Option<PathBuf>,
    ) -> Result<TrackMetadata, BotError> {
        let target = search_target(query);
        let extractor = Arc::clone(&self.extractor);
        let timeout = self.timeout;
        debug!(%target, "probing extractor");

        let raw = tokio::task::spawn_blocking(move || {
            extractor.probe(&target, cookies.as_deref(), timeout)
        })
        .await
        .map_err(|e| BotError::Resolution(format!("probe task failed: {e}")))??;

        let track = normalize(raw)?;
        info!(track_id = %track.id, title = %track.title, "track resolved");
        Ok(track)
    }
}

pub fn search_target(query: &str) -> String {
    let query = query.trim();
    if is_url(query) {
        query.to_string()
    } else {
        format!("ytsearch1:{query}")
    }
}

/// Narrow a playlist-shaped result to its first entry and map it onto the
/// strict metadata record.
pub fn normalize(raw: RawInfo) -> Result<TrackMetadata, BotError> {
    let mut raw = raw;
    if let Some(entries) = raw.entries.take() {
        raw = entries.into_iter().next().ok_or(BotError::EmptyResult)?;
    }

    let id = raw
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| BotError::Resolution("result has no id".to_string()))?;
    let webpage_url = raw
        .webpage_url
        .or(raw.url)
        .filter(|url| is_url(url))
        .ok_or_else(|| BotError::Resolution(format!("result {id} has no source url")))?;

    let artist = raw
        .artist
        .or(raw.uploader)
        .or(raw.channel)
        .filter(|a| !a.trim().is_empty())
        .unwrap_or_else(|| "Unknown Artist".to_string());

    Ok(TrackMetadata {
        title: raw
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "Unknown Title".to_string()),
        artist,
        album: raw.album.filter(|a| !a.trim().is_empty()),
        duration_secs: raw
            .duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| d.round() as u32)
            .unwrap_or(0),
        webpage_url,
        thumbnail_url: raw.thumbnail,
        id,
    })
}
