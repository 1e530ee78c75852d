pub mod jiosaavn;
pub mod models;
pub mod spotify;

use regex::Regex;
use std::sync::LazyLock;

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://\S+").expect("valid regex")
});

/// What a request message points at.
#[derive(Debug, Clone, PartialEq)]
pub enum SongRequest {
    /// Free text to search for.
    Search(String),
    /// A link the extractor resolves itself (YouTube and friends).
    Direct(String),
    /// An `open.spotify.com/track/...` link.
    Spotify(String),
    /// A `jiosaavn.com/song/...` link.
    JioSaavn(String),
}

pub fn classify_request(text: &str) -> SongRequest {
    let text = text.trim();
    if !URL_PATTERN.is_match(text) {
        return SongRequest::Search(text.to_string());
    }
    if text.contains("spotify.com") {
        SongRequest::Spotify(text.to_string())
    } else if text.contains("jiosaavn.com") {
        SongRequest::JioSaavn(text.to_string())
    } else {
        SongRequest::Direct(text.to_string())
    }
}

/// Check whether the text is a link rather than a search term
pub fn is_url(text: &str) -> bool {
    URL_PATTERN.is_match(text.trim())
}
