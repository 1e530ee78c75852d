use serde::{Deserialize, Serialize};

/// Canonical description of a playable track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration_secs: u32,
    pub webpage_url: String,
    pub thumbnail_url: Option<String>,
}

/// The subset of the extractor's JSON dump we read. Search results and
/// playlists arrive with `entries`; single videos without.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawInfo {
    pub id: Option<String>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub uploader: Option<String>,
    pub channel: Option<String>,
    pub album: Option<String>,
    pub duration: Option<f64>,
    pub webpage_url: Option<String>,
    pub url: Option<String>,
    pub thumbnail: Option<String>,
    pub entries: Option<Vec<RawInfo>>,
}
