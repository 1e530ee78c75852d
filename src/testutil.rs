//! In-memory doubles for the extractor and the chat transport.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::Config;
use crate::downloader::{FetchProgress, FetchRequest, MediaExtractor};
use crate::error::{classify_extractor_failure, BotError};
use crate::settings::RuntimeSettings;
use crate::sources::models::RawInfo;
use crate::transport::{
    AudioSource, ChatRef, ChatTransport, Keyboard, MemberStatus, MessageRef, OutgoingAudio,
    SentAudio, TransportError, UserRef,
};

pub fn raw_track(id: &str, title: &str) -> RawInfo {
    RawInfo {
        id: Some(id.to_string()),
        title: Some(title.to_string()),
        uploader: Some("Test Artist".to_string()),
        duration: Some(213.0),
        webpage_url: Some(format!("https://www.youtube.com/watch?v={id}")),
        thumbnail: None,
        ..Default::default()
    }
}

pub fn test_config(data_dir: &Path) -> Config {
    Config {
        bot_token: "123:test".into(),
        allowed_group: ChatRef(-100),
        admins: vec![UserRef(900), UserRef(901)],
        force_sub_channel: None,
        bot_username: Some("songbot".into()),
        spotify: None,
        cookie_file: None,
        default_settings: RuntimeSettings::default(),
        max_file_size: 50 * 1024 * 1024,
        download_timeout: Duration::from_secs(30),
        upload_timeout: Duration::from_secs(300),
        cache_ttl: None,
        ytdlp_bin: PathBuf::from("yt-dlp"),
        port: 0,
        data_dir: data_dir.to_path_buf(),
    }
}

/// Small valid PNG for thumbnail tests.
pub fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(32, 32, image::Rgb([200, 40, 40]));
    let mut buf = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

#[derive(Debug, Clone)]
pub enum FakeFetch {
    /// Write an audio file of `bytes` bytes and optionally a thumbnail.
    Audio { bytes: usize, thumbnail: Option<Vec<u8>> },
    /// Exit with this error output.
    Fail(String),
    /// Exit successfully without producing anything.
    Nothing,
}

#[derive(Default)]
struct ExtractorState {
    probes: HashMap<String, RawInfo>,
    outcomes: HashMap<String, FakeFetch>,
    probed: Vec<String>,
    fetched: Vec<String>,
    active: usize,
    max_active: usize,
}

pub struct FakeExtractor {
    state: Mutex<ExtractorState>,
    fetch_delay: Mutex<Duration>,
}

impl FakeExtractor {
    pub fn new() -> Self {
        Self { state: Mutex::new(ExtractorState::default()), fetch_delay: Mutex::new(Duration::ZERO) }
    }

    /// Register the single result for a search term.
    pub fn add_search(&self, query: &str, raw: RawInfo) {
        let wrapped = RawInfo { entries: Some(vec![raw]), ..Default::default() };
        self.add_probe(&format!("ytsearch1:{query}"), wrapped);
    }

    pub fn add_probe(&self, target: &str, raw: RawInfo) {
        self.state.lock().probes.insert(target.to_string(), raw);
    }

    pub fn set_outcome(&self, url: &str, outcome: FakeFetch) {
        self.state.lock().outcomes.insert(url.to_string(), outcome);
    }

    /// Real (wall clock) time each fetch takes.
    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock() = delay;
    }

    pub fn probed(&self) -> Vec<String> {
        self.state.lock().probed.clone()
    }

    pub fn fetched(&self) -> Vec<String> {
        self.state.lock().fetched.clone()
    }

    pub fn max_concurrent_fetches(&self) -> usize {
        self.state.lock().max_active
    }
}

impl MediaExtractor for FakeExtractor {
    fn probe(
        &self,
        target: &str,
        _cookies: Option<&Path>,
        _timeout: Duration,
    ) -> Result<RawInfo, BotError> {
        let mut state = self.state.lock();
        state.probed.push(target.to_string());
        state
            .probes
            .get(target)
            .cloned()
            .ok_or_else(|| BotError::Resolution(format!("ERROR: no results for {target}")))
    }

    fn fetch(
        &self,
        request: &FetchRequest<'_>,
        on_progress: &mut dyn FnMut(FetchProgress),
    ) -> Result<(), BotError> {
        let outcome = {
            let mut state = self.state.lock();
            state.fetched.push(request.url.to_string());
            state.active += 1;
            state.max_active = state.max_active.max(state.active);
            state
                .outcomes
                .get(request.url)
                .cloned()
                .unwrap_or(FakeFetch::Audio { bytes: 2048, thumbnail: None })
        };

        on_progress(FetchProgress { percent: 50.0, total_size: Some("2.00KiB".into()), speed: None });
        let delay = *self.fetch_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let template = request.output_template.to_string_lossy().into_owned();
        let produce = || -> Result<(), BotError> {
            match outcome {
                FakeFetch::Audio { bytes, thumbnail } => {
                    std::fs::write(template.replace("%(ext)s", "mp3"), vec![0u8; bytes])?;
                    if let Some(image) = thumbnail {
                        std::fs::write(template.replace("%(ext)s", "jpg"), image)?;
                    }
                    on_progress(FetchProgress { percent: 100.0, total_size: None, speed: None });
                    Ok(())
                }
                FakeFetch::Fail(stderr) => Err(classify_extractor_failure(&stderr)),
                FakeFetch::Nothing => Ok(()),
            }
        };
        let result = produce();

        self.state.lock().active -= 1;
        result
    }
}

/// Everything the bot asked the transport to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text { message: MessageRef, text: String, keyboard: Option<Keyboard> },
    Edit { message: MessageRef, text: String, keyboard: Option<Keyboard> },
    Delete(MessageRef),
    Audio { message: MessageRef, source: AudioSource, caption: String },
    Photo(MessageRef),
    Copy { to: ChatRef, message: MessageRef },
    Answer(String),
}

#[derive(Default)]
struct TransportState {
    log: Vec<Sent>,
    next_id: i32,
    members: HashMap<UserRef, Result<MemberStatus, TransportError>>,
    member_lookups: usize,
    audio_failures: VecDeque<TransportError>,
    edit_failures: VecDeque<TransportError>,
    unreachable: HashSet<ChatRef>,
    audio_delay: Option<Duration>,
}

pub struct RecordingTransport {
    state: Mutex<TransportState>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self { state: Mutex::new(TransportState::default()) }
    }

    pub fn set_member(&self, user: UserRef, status: Result<MemberStatus, TransportError>) {
        self.state.lock().members.insert(user, status);
    }

    pub fn fail_next_audio(&self, error: TransportError) {
        self.state.lock().audio_failures.push_back(error);
    }

    pub fn fail_next_edit(&self, error: TransportError) {
        self.state.lock().edit_failures.push_back(error);
    }

    /// Sends and copies to this chat fail.
    pub fn make_unreachable(&self, chat: ChatRef) {
        self.state.lock().unreachable.insert(chat);
    }

    /// Audio uploads take this long (tokio time).
    pub fn set_audio_delay(&self, delay: Duration) {
        self.state.lock().audio_delay = Some(delay);
    }

    pub fn log(&self) -> Vec<Sent> {
        self.state.lock().log.clone()
    }

    pub fn member_lookups(&self) -> usize {
        self.state.lock().member_lookups
    }

    pub fn texts_to(&self, chat: ChatRef) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text { message, text, .. } if message.chat == chat => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn edits_of(&self, target: MessageRef) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Edit { message, text, .. } if message == target => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn last_edit_keyboard(&self, target: MessageRef) -> Option<Keyboard> {
        self.log().into_iter().rev().find_map(|s| match s {
            Sent::Edit { message, keyboard, .. } if message == target => keyboard,
            _ => None,
        })
    }

    pub fn audios(&self) -> Vec<(MessageRef, AudioSource, String)> {
        self.log()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Audio { message, source, caption } => Some((message, source, caption)),
                _ => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> Vec<MessageRef> {
        self.log()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Delete(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn photos(&self) -> usize {
        self.log().iter().filter(|s| matches!(s, Sent::Photo(_))).count()
    }

    pub fn copies(&self) -> Vec<ChatRef> {
        self.log()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Copy { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }

    fn next_message(&self, chat: ChatRef) -> MessageRef {
        let mut state = self.state.lock();
        state.next_id += 1;
        MessageRef { chat, id: state.next_id }
    }

    fn check_reachable(&self, chat: ChatRef) -> Result<(), TransportError> {
        if self.state.lock().unreachable.contains(&chat) {
            Err(TransportError::Rejected("Forbidden: bot was blocked by the user".into()))
        } else {
            Ok(())
        }
    }

    fn record(&self, sent: Sent) {
        self.state.lock().log.push(sent);
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_text(
        &self,
        chat: ChatRef,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<MessageRef, TransportError> {
        self.check_reachable(chat)?;
        let message = self.next_message(chat);
        self.record(Sent::Text { message, text: text.to_string(), keyboard });
        Ok(message)
    }

    async fn edit_text(
        &self,
        message: MessageRef,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), TransportError> {
        if let Some(error) = self.state.lock().edit_failures.pop_front() {
            return Err(error);
        }
        self.record(Sent::Edit { message, text: text.to_string(), keyboard });
        Ok(())
    }

    async fn delete_message(&self, message: MessageRef) -> Result<(), TransportError> {
        self.record(Sent::Delete(message));
        Ok(())
    }

    async fn send_audio(
        &self,
        chat: ChatRef,
        audio: OutgoingAudio,
    ) -> Result<SentAudio, TransportError> {
        let delay = self.state.lock().audio_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.state.lock().audio_failures.pop_front() {
            return Err(error);
        }
        self.check_reachable(chat)?;
        let message = self.next_message(chat);
        let handle = match &audio.source {
            AudioSource::File(_) => format!("cached-{}", message.id),
            AudioSource::Handle(handle) => handle.clone(),
        };
        self.record(Sent::Audio { message, source: audio.source, caption: audio.caption });
        Ok(SentAudio { message, handle: Some(handle) })
    }

    async fn send_photo(&self, chat: ChatRef, _image: Vec<u8>) -> Result<MessageRef, TransportError> {
        self.check_reachable(chat)?;
        let message = self.next_message(chat);
        self.record(Sent::Photo(message));
        Ok(message)
    }

    async fn copy_message(&self, to: ChatRef, message: MessageRef) -> Result<(), TransportError> {
        self.check_reachable(to)?;
        self.record(Sent::Copy { to, message });
        Ok(())
    }

    async fn member_status(
        &self,
        _group: &str,
        user: UserRef,
    ) -> Result<MemberStatus, TransportError> {
        let mut state = self.state.lock();
        state.member_lookups += 1;
        state.members.get(&user).cloned().unwrap_or(Ok(MemberStatus::Left))
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<(), TransportError> {
        self.record(Sent::Answer(callback_id.to_string()));
        Ok(())
    }
}
