use id3::frame::{Picture, PictureType};
use id3::{Tag, TagLike, Version};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{GenericImageView, ImageError};
use std::path::Path;

use crate::sources::models::TrackMetadata;

const MAX_COVER_DIM: u32 = 500;
const MAX_COVER_BYTES: usize = 300 * 1024;

/// Write ID3v2.3 title/artist/album and, when given, a front cover.
///
/// Returns whether a cover was embedded. A cover that cannot be decoded is
/// skipped; only a failure to write the tag itself is an error.
pub fn tag_audio(
    file_path: &Path,
    track: &TrackMetadata,
    cover: Option<&[u8]>,
) -> Result<bool, id3::Error> {
    let mut tag = Tag::new();
    tag.set_title(track.title.as_str());
    tag.set_artist(track.artist.as_str());
    if let Some(album) = &track.album {
        tag.set_album(album.as_str());
    }
    if track.duration_secs > 0 {
        tag.set_duration(track.duration_secs.saturating_mul(1000));
    }

    let mut embedded = false;
    if let Some(bytes) = cover {
        match shrink_cover(bytes) {
            Ok(data) => {
                tag.add_frame(Picture {
                    mime_type: "image/jpeg".to_string(),
                    picture_type: PictureType::CoverFront,
                    description: "cover".to_string(),
                    data,
                });
                embedded = true;
            }
            Err(e) => tracing::warn!(track_id = %track.id, error = %e, "cover art unusable, not embedding"),
        }
    }

    tag.write_to_path(file_path, Version::Id3v23)?;
    Ok(embedded)
}

/// Re-encode cover art as a JPEG no larger than 500px on its long edge,
/// lowering quality until it fits in 300 KB.
pub fn shrink_cover(bytes: &[u8]) -> Result<Vec<u8>, ImageError> {
    let img = image::load_from_memory(bytes)?;
    let (w, h) = img.dimensions();
    let scale = (MAX_COVER_DIM as f32 / w.max(h) as f32).min(1.0);
    let resized = if scale < 1.0 {
        let new_w = ((w as f32 * scale).round() as u32).max(1);
        let new_h = ((h as f32 * scale).round() as u32).max(1);
        img.resize_exact(new_w, new_h, FilterType::Lanczos3)
    } else {
        img
    };
    let rgb = resized.to_rgb8();

    let mut quality = 85u8;
    loop {
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, quality).encode_image(&rgb)?;
        if buf.len() <= MAX_COVER_BYTES || quality <= 30 {
            return Ok(buf);
        }
        quality -= 10;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    fn png(w: u32, h: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(w, h, |x, y| image::Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    fn track() -> TrackMetadata {
        TrackMetadata {
            id: "abc".into(),
            title: "Song".into(),
            artist: "Artist".into(),
            album: Some("Album".into()),
            duration_secs: 200,
            webpage_url: "https://www.youtube.com/watch?v=abc".into(),
            thumbnail_url: None,
        }
    }

    #[test]
    fn test_shrink_cover_limits_size() {
        let out = shrink_cover(&png(1280, 720)).unwrap();
        assert!(out.len() <= MAX_COVER_BYTES);
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.dimensions(), (500, 281));
    }

    #[test]
    fn test_small_cover_keeps_dimensions() {
        let out = shrink_cover(&png(120, 90)).unwrap();
        assert_eq!(image::load_from_memory(&out).unwrap().dimensions(), (120, 90));
    }

    #[test]
    fn test_tag_audio_writes_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.mp3");
        std::fs::write(&path, b"").unwrap();

        assert!(tag_audio(&path, &track(), Some(&png(64, 64))).unwrap());
        let tag = Tag::read_from_path(&path).unwrap();
        assert_eq!(tag.title(), Some("Song"));
        assert_eq!(tag.artist(), Some("Artist"));
        assert_eq!(tag.album(), Some("Album"));
        assert_eq!(tag.pictures().count(), 1);
    }

    #[test]
    fn test_bad_cover_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.mp3");
        std::fs::write(&path, b"").unwrap();

        assert!(!tag_audio(&path, &track(), Some(b"not an image")).unwrap());
        assert_eq!(Tag::read_from_path(&path).unwrap().pictures().count(), 0);
    }
}
