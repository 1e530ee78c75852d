use regex::Regex;
use rspotify::clients::BaseClient;
use rspotify::model::TrackId;
use rspotify::{ClientCredsSpotify, Credentials};
use std::sync::LazyLock;
use tracing::debug;

use crate::error::BotError;

static TRACK_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"spotify\.com/(?:intl-[a-z]+/)?track/([A-Za-z0-9]{22})").expect("valid regex")
});

/// Pull the base62 track id out of an `open.spotify.com/track/...` link.
pub fn track_id_from_link(link: &str) -> Option<&str> {
    TRACK_LINK
        .captures(link)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Client-credentials Spotify lookups.
pub struct SpotifyClient {
    credentials: Credentials,
}

impl SpotifyClient {
    pub fn new(client_id: &str, client_secret: &str) -> Self {
        Self {
            credentials: Credentials::new(client_id, client_secret),
        }
    }

    /// Turn a track link into a `"<title> <first artist>"` search query.
    pub async fn track_query(&self, link: &str) -> Result<String, BotError> {
        let id = track_id_from_link(link)
            .ok_or_else(|| BotError::Spotify(format!("not a track link: {link}")))?;
        let track_id = TrackId::from_id(id).map_err(|e| BotError::Spotify(e.to_string()))?;

        let spotify = ClientCredsSpotify::new(self.credentials.clone());
        spotify
            .request_token()
            .await
            .map_err(|e| BotError::Spotify(e.to_string()))?;
        let track = spotify
            .track(track_id, None)
            .await
            .map_err(|e| BotError::Spotify(e.to_string()))?;

        let query = match track.artists.first() {
            Some(artist) => format!("{} {}", track.name, artist.name),
            None => track.name.clone(),
        };
        debug!(%link, %query, "spotify track resolved");
        Ok(query)
    }
}
