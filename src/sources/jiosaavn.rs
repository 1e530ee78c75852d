use regex::Regex;
use std::sync::LazyLock;

static SONG_SLUG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/song/([^/?]+)").expect("valid regex")
});

/// Build a search query from a JioSaavn song link.
///
/// Song pages look like `https://www.jiosaavn.com/song/<slug>/<id>`; the slug
/// is the hyphenated song name and is good enough as a search term.
pub fn query_from_link(link: &str) -> Option<String> {
    let slug = SONG_SLUG.captures(link)?.get(1)?.as_str();
    let query = slug.replace('-', " ").trim().to_string();
    if query.is_empty() {
        None
    } else {
        Some(query)
    }
}
