use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::downloader::{FetchProgress, FetchRequest, MediaExtractor, AUDIO_FORMAT};
use crate::error::BotError;
use crate::file_utils::{find_artifact, find_thumbnail, output_template};
use crate::metadata::tag_audio;
use crate::sources::models::TrackMetadata;

const COVER_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(15);

/// Inputs for one run, fixed at dispatch time.
#[derive(Debug, Clone)]
pub struct PipelineJob {
    pub track: TrackMetadata,
    /// Directory leased to this run.
    pub scratch: PathBuf,
    pub cookies: Option<PathBuf>,
}

#[derive(Debug)]
pub struct Artifact {
    pub audio: PathBuf,
    pub thumbnail: Option<PathBuf>,
    /// Cover image bytes, from the extractor's thumbnail or the track's
    /// thumbnail URL.
    pub cover: Option<Vec<u8>>,
    pub cover_embedded: bool,
    pub size: u64,
}

impl Artifact {
    /// Cover to send next to the audio because it could not be embedded.
    pub fn loose_cover(&self) -> Option<&[u8]> {
        match (&self.cover, self.cover_embedded) {
            (Some(cover), false) => Some(cover),
            _ => None,
        }
    }
}

/// Fetch, transcode and tag one track. Blocking; run it on the blocking pool.
pub struct Pipeline {
    extractor: Arc<dyn MediaExtractor>,
    max_bytes: u64,
    download_timeout: Duration,
}

impl Pipeline {
    pub fn new(extractor: Arc<dyn MediaExtractor>, max_bytes: u64, download_timeout: Duration) -> Self {
        Self { extractor, max_bytes, download_timeout }
    }

    pub fn run(
        &self,
        job: &PipelineJob,
        on_progress: &mut dyn FnMut(FetchProgress),
    ) -> Result<Artifact, BotError> {
        let track = &job.track;
        fs::create_dir_all(&job.scratch)?;

        let template = output_template(&job.scratch, &track.id);
        let request = FetchRequest {
            url: &track.webpage_url,
            output_template: &template,
            cookies: job.cookies.as_deref(),
            timeout: self.download_timeout,
        };
        self.extractor.fetch(&request, on_progress)?;

        let audio = find_artifact(&job.scratch, &track.id, AUDIO_FORMAT).ok_or(BotError::ArtifactNotFound)?;
        let thumbnail = find_thumbnail(&job.scratch, &track.id);

        let cover = match &thumbnail {
            Some(path) => fs::read(path)
                .inspect_err(|e| warn!(path = %path.display(), error = %e, "thumbnail unreadable"))
                .ok(),
            None => track.thumbnail_url.as_deref().and_then(download_cover),
        };

        let cover_embedded = match tag_audio(&audio, track, cover.as_deref()) {
            Ok(embedded) => embedded,
            Err(e) => {
                warn!(track_id = %track.id, error = %e, "tagging failed, sending untagged audio");
                false
            }
        };

        let size = fs::metadata(&audio)?.len();
        if size > self.max_bytes {
            return Err(BotError::TooLarge { size, limit: self.max_bytes });
        }

        info!(track_id = %track.id, size, cover_embedded, "artifact ready");
        Ok(Artifact { audio, thumbnail, cover, cover_embedded, size })
    }
}

fn download_cover(url: &str) -> Option<Vec<u8>> {
    let fetch = || -> reqwest::Result<Vec<u8>> {
        let client = reqwest::blocking::Client::builder()
            .timeout(COVER_DOWNLOAD_TIMEOUT)
            .build()?;
        let bytes = client.get(url).send()?.error_for_status()?.bytes()?;
        Ok(bytes.to_vec())
    };
    match fetch() {
        Ok(bytes) => {
            debug!(url, len = bytes.len(), "downloaded cover art");
            Some(bytes)
        }
        Err(e) => {
            warn!(url, error = %e, "cover art download failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::normalize;
    use crate::testutil::{png_bytes, raw_track, FakeExtractor, FakeFetch};

    fn setup() -> (tempfile::TempDir, Arc<FakeExtractor>, PipelineJob) {
        let dir = tempfile::tempdir().unwrap();
        let track = normalize(raw_track("abc", "Song")).unwrap();
        let job = PipelineJob { track, scratch: dir.path().join("-100"), cookies: None };
        (dir, Arc::new(FakeExtractor::new()), job)
    }

    #[test]
    fn test_successful_run_embeds_cover() {
        let (_dir, extractor, job) = setup();
        extractor.set_outcome(
            &job.track.webpage_url,
            FakeFetch::Audio { bytes: 4096, thumbnail: Some(png_bytes()) },
        );
        let pipeline = Pipeline::new(extractor, 1024 * 1024, Duration::from_secs(5));

        let mut reports = Vec::new();
        let artifact = pipeline.run(&job, &mut |p| reports.push(p.percent)).unwrap();
        assert_eq!(artifact.audio, job.scratch.join("abc.mp3"));
        assert_eq!(artifact.thumbnail, Some(job.scratch.join("abc.jpg")));
        assert!(artifact.cover_embedded);
        assert!(artifact.loose_cover().is_none());
        assert!(artifact.size > 4096);
        assert_eq!(reports, vec![50.0, 100.0]);
    }

    #[test]
    fn test_unusable_thumbnail_becomes_loose_cover() {
        let (_dir, extractor, job) = setup();
        extractor.set_outcome(
            &job.track.webpage_url,
            FakeFetch::Audio { bytes: 10, thumbnail: Some(b"garbage".to_vec()) },
        );
        let pipeline = Pipeline::new(extractor, 1024 * 1024, Duration::from_secs(5));

        let artifact = pipeline.run(&job, &mut |_| {}).unwrap();
        assert!(!artifact.cover_embedded);
        assert_eq!(artifact.loose_cover(), Some(&b"garbage"[..]));
    }

    #[test]
    fn test_missing_output_is_artifact_not_found() {
        let (_dir, extractor, job) = setup();
        extractor.set_outcome(&job.track.webpage_url, FakeFetch::Nothing);
        let pipeline = Pipeline::new(extractor, 1024, Duration::from_secs(5));
        assert!(matches!(pipeline.run(&job, &mut |_| {}), Err(BotError::ArtifactNotFound)));
    }

    #[test]
    fn test_oversized_artifact_is_rejected() {
        let (_dir, extractor, job) = setup();
        extractor.set_outcome(
            &job.track.webpage_url,
            FakeFetch::Audio { bytes: 5000, thumbnail: None },
        );
        let pipeline = Pipeline::new(extractor, 1000, Duration::from_secs(5));
        match pipeline.run(&job, &mut |_| {}) {
            Err(BotError::TooLarge { size, limit }) => {
                assert!(size >= 5000);
                assert_eq!(limit, 1000);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_extractor_failure_propagates() {
        let (_dir, extractor, job) = setup();
        extractor.set_outcome(
            &job.track.webpage_url,
            FakeFetch::Fail("ERROR: Sign in to confirm you're not a bot".into()),
        );
        let pipeline = Pipeline::new(extractor, 1000, Duration::from_secs(5));
        assert!(matches!(pipeline.run(&job, &mut |_| {}), Err(BotError::AuthExpired(_))));
    }
}
