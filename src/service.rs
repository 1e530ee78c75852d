use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{ArtifactHandle, ResultCache};
use crate::commands::{
    deep_link_track, parse_command, song_deep_link, BroadcastTarget, CallbackAction, Command,
    ModeChange,
};
use crate::config::Config;
use crate::cookies::{CookieError, CookieManager};
use crate::db::Store;
use crate::delivery::{build_caption, Delivery};
use crate::downloader::MediaExtractor;
use crate::error::BotError;
use crate::error_log::{ErrorLogManager, FailureEntry};
use crate::file_utils::{cleanup_scratch, ScratchSpace};
use crate::gate::AccessGate;
use crate::pipeline::{Pipeline, PipelineJob};
use crate::progress::{self, edit_status, edit_status_with};
use crate::resolver::Resolver;
use crate::settings::{RuntimeSettings, SettingsHandle, UploadMode, MAX_AUTO_DELETE_MINUTES};
use crate::sources::models::TrackMetadata;
use crate::sources::spotify::SpotifyClient;
use crate::sources::{classify_request, jiosaavn, SongRequest};
use crate::transport::{
    AudioSource, Button, ChatRef, ChatTransport, IncomingCallback, IncomingMessage, MessageRef,
    UserRef,
};
use crate::worker::{DownloadHandler, DownloadQueue, DownloadRequest};

const PENDING_CAPACITY: usize = 1000;
const BROADCAST_PAUSE: Duration = Duration::from_millis(100);
const NOT_AUTHORIZED: &str = "You are not authorized to use this command.";

/// Resolved tracks waiting on a deep link or a "Try Again" press, keyed by
/// track id. Oldest entries are dropped first.
struct PendingTracks {
    tracks: HashMap<String, TrackMetadata>,
    order: VecDeque<String>,
}

impl PendingTracks {
    fn new() -> Self {
        Self { tracks: HashMap::new(), order: VecDeque::new() }
    }

    fn insert(&mut self, track: TrackMetadata) {
        if self.tracks.insert(track.id.clone(), track.clone()).is_none() {
            self.order.push_back(track.id);
        }
        while self.order.len() > PENDING_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.tracks.remove(&oldest);
            }
        }
    }

    fn get(&self, id: &str) -> Option<TrackMetadata> {
        self.tracks.get(id).cloned()
    }
}

/// Request lifecycle and admin operations, independent of the chat platform.
pub struct BotService {
    config: Arc<Config>,
    transport: Arc<dyn ChatTransport>,
    store: Arc<Store>,
    settings: SettingsHandle,
    queue: DownloadQueue,
    resolver: Resolver,
    gate: AccessGate,
    cache: ResultCache,
    pipeline: Arc<Pipeline>,
    delivery: Delivery,
    scratch: ScratchSpace,
    cookies: CookieManager,
    journal: Arc<ErrorLogManager>,
    spotify: Option<SpotifyClient>,
    pending: Mutex<PendingTracks>,
}

impl BotService {
    pub fn new(
        config: Config,
        transport: Arc<dyn ChatTransport>,
        extractor: Arc<dyn MediaExtractor>,
        store: Arc<Store>,
        queue: DownloadQueue,
        shutdown: CancellationToken,
    ) -> Self {
        let config = Arc::new(config);
        let settings = SettingsHandle::load(Arc::clone(&store), config.default_settings.clone());
        let spotify = config
            .spotify
            .as_ref()
            .map(|c| SpotifyClient::new(&c.client_id, &c.client_secret));
        Self {
            resolver: Resolver::new(Arc::clone(&extractor), config.download_timeout),
            gate: AccessGate::new(Arc::clone(&transport), config.force_sub_channel.clone()),
            cache: ResultCache::new(Arc::clone(&store), config.cache_ttl),
            pipeline: Arc::new(Pipeline::new(extractor, config.max_file_size, config.download_timeout)),
            delivery: Delivery::new(Arc::clone(&transport), config.upload_timeout, shutdown),
            scratch: ScratchSpace::new(config.scratch_root()),
            cookies: CookieManager::new(
                Arc::clone(&store),
                config.managed_cookie_path(),
                config.cookie_file.clone(),
            ),
            journal: Arc::new(ErrorLogManager::new(config.error_log_dir())),
            pending: Mutex::new(PendingTracks::new()),
            spotify,
            settings,
            queue,
            store,
            transport,
            config,
        }
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    pub fn cookies(&self) -> &CookieManager {
        &self.cookies
    }

    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    pub async fn handle_message(&self, msg: IncomingMessage) -> Result<(), BotError> {
        if msg.private {
            if let Err(e) = self.store.add_user(msg.user.0).await {
                warn!(user = msg.user.0, error = %e, "failed to record user");
            }
        }

        if let Some(command) = parse_command(&msg.text, self.config.bot_username.as_deref()) {
            return self.handle_command(&msg, command).await;
        }

        if msg.private {
            self.reply(msg.chat, "Sorry, you can't request songs directly in PM. Please use the allowed group.")
                .await?;
            return Ok(());
        }
        if msg.chat != self.config.allowed_group {
            self.reply(msg.chat, "This group is not authorized to use this bot.").await?;
            return Ok(());
        }
        if msg.text.trim().is_empty() {
            return Ok(());
        }

        self.process_request(&msg).await
    }

    pub async fn handle_callback(&self, callback: IncomingCallback) -> Result<(), BotError> {
        if let Err(e) = self.transport.answer_callback(&callback.id).await {
            debug!(error = %e, "could not answer callback");
        }
        let (Some(data), Some(message)) = (callback.data.as_deref(), callback.message) else {
            return Ok(());
        };

        match CallbackAction::parse(data) {
            CallbackAction::CheckSubscription(track_id) => {
                if !self.gate.is_authorized(callback.user).await {
                    edit_status(
                        self.transport.as_ref(),
                        message,
                        "You are still not subscribed. Please join the channel and try again.",
                    )
                    .await;
                    return Ok(());
                }
                edit_status(self.transport.as_ref(), message, "Thank you for subscribing! Processing request...")
                    .await;
                let track = self.pending.lock().get(&track_id);
                match track {
                    Some(track) => {
                        let settings = self.settings.snapshot();
                        self.continue_request(message.chat, callback.user, track, message, &settings)
                            .await;
                    }
                    None => {
                        edit_status(self.transport.as_ref(), message, "Sorry, the song request expired.").await;
                    }
                }
            }
            CallbackAction::Unknown => debug!(data, "ignoring unknown callback"),
        }
        Ok(())
    }

    async fn process_request(&self, msg: &IncomingMessage) -> Result<(), BotError> {
        let status = self.transport.send_text(msg.chat, "Processing...", None).await?;
        info!(chat = msg.chat.0, user = msg.user.0, text = %msg.text, "song requested");

        let query = match self.query_for(&msg.text, status).await {
            Ok(query) => query,
            Err(e) => {
                self.fail(msg.chat, msg.user, status, None, e).await;
                return Ok(());
            }
        };

        edit_status(self.transport.as_ref(), status, &format!("Searching for '{query}'...")).await;
        let track = match self.resolver.resolve(&query, self.cookies.active_path()).await {
            Ok(track) => track,
            Err(e) => {
                self.fail(msg.chat, msg.user, status, None, e).await;
                return Ok(());
            }
        };
        self.pending.lock().insert(track.clone());

        let settings = self.settings.snapshot();
        match settings.upload_mode {
            UploadMode::Info => self.show_info(status, &track).await,
            UploadMode::Direct => {
                if self.gate.is_authorized(msg.user).await {
                    self.continue_request(msg.chat, msg.user, track, status, &settings).await;
                } else {
                    self.ask_to_subscribe(status, &track.id).await;
                }
            }
        }
        Ok(())
    }

    /// Turn the request text into something the resolver can search for.
    async fn query_for(&self, text: &str, status: MessageRef) -> Result<String, BotError> {
        match classify_request(text) {
            SongRequest::Search(query) | SongRequest::Direct(query) => Ok(query),
            SongRequest::Spotify(link) => {
                let client = self
                    .spotify
                    .as_ref()
                    .ok_or_else(|| BotError::Spotify("Spotify credentials are not configured".into()))?;
                let query = client.track_query(&link).await?;
                edit_status(
                    self.transport.as_ref(),
                    status,
                    &format!("Found on Spotify: '{query}'. Now searching on YouTube..."),
                )
                .await;
                Ok(query)
            }
            SongRequest::JioSaavn(link) => {
                let query = jiosaavn::query_from_link(&link).ok_or_else(|| {
                    BotError::UnsupportedLink("Could not extract info from Saavn link.".into())
                })?;
                edit_status(
                    self.transport.as_ref(),
                    status,
                    &format!("Found on Saavn: '{query}'. Now searching on YouTube..."),
                )
                .await;
                Ok(query)
            }
        }
    }

    /// Serve from the cache, queue, or run now, depending on the snapshot.
    async fn continue_request(
        &self,
        chat: ChatRef,
        user: UserRef,
        track: TrackMetadata,
        status: MessageRef,
        settings: &RuntimeSettings,
    ) {
        if let Some(handle) = self.cache.get(&track.id).await {
            info!(chat = chat.0, track_id = %track.id, "cache hit");
            self.deliver_cached(chat, user, &track, handle, status, settings).await;
            return;
        }

        let request = DownloadRequest::new(chat, user, track, status);
        if settings.queue_enabled {
            match self.queue.enqueue(request.clone()) {
                Ok(depth) => {
                    info!(item = %request.id, track_id = %request.track.id, depth, "queued");
                    edit_status(
                        self.transport.as_ref(),
                        status,
                        &format!("Added to queue. There are {depth} song(s) ahead of you."),
                    )
                    .await;
                }
                Err(e) => self.report_failure(&request, e).await,
            }
        } else if let Err(e) = self.execute(&request, settings).await {
            self.report_failure(&request, e).await;
        }
    }

    async fn deliver_cached(
        &self,
        chat: ChatRef,
        user: UserRef,
        track: &TrackMetadata,
        handle: ArtifactHandle,
        status: MessageRef,
        settings: &RuntimeSettings,
    ) {
        let outcome = self
            .delivery
            .deliver(chat, AudioSource::Handle(handle.0), track, settings, Some(status), None)
            .await;
        if let Err(e) = outcome {
            if matches!(e, BotError::Transport(_)) {
                self.cache.invalidate(&track.id).await;
            }
            self.fail(chat, user, status, Some(track), e).await;
        }
    }

    /// Download, deliver, cache and clean up one request.
    async fn execute(&self, request: &DownloadRequest, settings: &RuntimeSettings) -> Result<(), BotError> {
        let track = &request.track;
        let lease = self.scratch.acquire(request.chat).await;
        edit_status(self.transport.as_ref(), request.status, "Downloading...").await;

        let job = PipelineJob {
            track: track.clone(),
            scratch: lease.path().to_path_buf(),
            cookies: self.cookies.active_path(),
        };
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let relay = progress::relay(Arc::clone(&self.transport), request.status, progress_rx);
        let pipeline = Arc::clone(&self.pipeline);
        let run_job = job.clone();
        let result = tokio::task::spawn_blocking(move || {
            pipeline.run(&run_job, &mut |p| {
                let _ = progress_tx.send(p);
            })
        })
        .await
        .map_err(|e| BotError::Pipeline(format!("pipeline task failed: {e}")))
        .and_then(|r| r);
        if let Err(e) = relay.await {
            warn!(error = %e, "progress relay ended abnormally");
        }

        let outcome = match result {
            Ok(artifact) => {
                debug!(
                    track_id = %track.id,
                    size = artifact.size,
                    thumbnail = artifact.thumbnail.is_some(),
                    "uploading artifact"
                );
                edit_status(self.transport.as_ref(), request.status, "Uploading song...").await;
                let delivered = AssertUnwindSafe(self.delivery.deliver(
                    request.chat,
                    AudioSource::File(artifact.audio.clone()),
                    track,
                    settings,
                    Some(request.status),
                    artifact.loose_cover().map(<[u8]>::to_vec),
                ))
                .catch_unwind()
                .await;
                delivered.unwrap_or_else(|_| {
                    error!(track_id = %track.id, "delivery panicked");
                    Err(BotError::Pipeline("delivery panicked".into()))
                })
            }
            Err(e) => Err(e),
        };

        if let Ok(report) = &outcome {
            match &report.sent.handle {
                Some(handle) => self.cache.put(&track.id, ArtifactHandle(handle.clone())).await,
                None => debug!(track_id = %track.id, "transport returned no reusable handle"),
            }
            if let Some(job) = &report.deletion {
                debug!(message_id = job.message.id, "auto-delete scheduled");
            }
        }

        let dir = job.scratch.clone();
        let track_id = track.id.clone();
        match tokio::task::spawn_blocking(move || cleanup_scratch(&dir, &track_id)).await {
            Ok(report) => debug!(
                removed = report.removed,
                failed = report.failed,
                dir_removed = report.dir_removed,
                "scratch cleaned"
            ),
            Err(e) => error!(error = %e, "scratch cleanup task failed"),
        }
        drop(lease);

        outcome.map(|_| ())
    }

    /// Leave the status message showing the error, alert admins where the
    /// failure calls for it, and journal it.
    async fn fail(
        &self,
        chat: ChatRef,
        user: UserRef,
        status: MessageRef,
        track: Option<&TrackMetadata>,
        error: BotError,
    ) {
        let track_id = track.map(|t| t.id.as_str()).unwrap_or("-");
        match &error {
            BotError::Resolution(_) | BotError::EmptyResult | BotError::UnsupportedLink(_) | BotError::TooLarge { .. } => {
                warn!(chat = chat.0, user = user.0, track_id, category = error.category(), error = %error, "request failed")
            }
            _ => error!(chat = chat.0, user = user.0, track_id, category = error.category(), error = %error, "request failed"),
        }

        edit_status(self.transport.as_ref(), status, &error.user_message()).await;
        if error.notifies_admins() {
            self.notify_admins(track, &error).await;
        }

        let entry = FailureEntry::new(chat, Some(user), track, &error);
        let journal = Arc::clone(&self.journal);
        match tokio::task::spawn_blocking(move || journal.record(entry)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "failed to journal failure"),
            Err(e) => warn!(error = %e, "failure journal task failed"),
        }
    }

    async fn notify_admins(&self, track: Option<&TrackMetadata>, error: &BotError) {
        let subject = track
            .map(|t| format!("{} ({})", t.title, t.id))
            .unwrap_or_else(|| "unknown track".to_string());
        let text = format!(
            "⚠️ A download failed because the extractor's session looks expired.\n\
             Track: {subject}\nError: {error}\n\nUpload fresh cookies with /setcookies."
        );
        let sends = self.config.admins.iter().map(|admin| {
            let text = text.as_str();
            async move {
                let chat = ChatRef(admin.0 as i64);
                if let Err(e) = self.transport.send_text(chat, text, None).await {
                    warn!(admin = admin.0, error = %e, "failed to notify admin");
                }
            }
        });
        join_all(sends).await;
    }

    async fn show_info(&self, status: MessageRef, track: &TrackMetadata) {
        let caption = build_caption(track, 0);
        let keyboard = match &self.config.bot_username {
            Some(bot) => Some(vec![vec![Button::url("Get Song", song_deep_link(bot, &track.id))]]),
            None => {
                warn!("BOT_USERNAME is not set, info mode replies carry no download link");
                None
            }
        };
        edit_status_with(self.transport.as_ref(), status, &caption, keyboard).await;
    }

    fn subscribe_button(&self) -> Option<Button> {
        let channel = self.gate.channel()?;
        let name = channel.strip_prefix('@')?;
        Some(Button::url("Subscribe to Channel", format!("https://t.me/{name}")))
    }

    async fn ask_to_subscribe(&self, status: MessageRef, track_id: &str) {
        let mut keyboard = Vec::new();
        if let Some(button) = self.subscribe_button() {
            keyboard.push(vec![button]);
        }
        keyboard.push(vec![Button::callback("Try Again", CallbackAction::check_subscription(track_id))]);
        edit_status_with(
            self.transport.as_ref(),
            status,
            "You must subscribe to our channel to download songs directly.",
            Some(keyboard),
        )
        .await;
    }

    async fn send_song_in_private(&self, msg: &IncomingMessage, track_id: &str) -> Result<(), BotError> {
        let track = self.pending.lock().get(track_id);
        let Some(track) = track else {
            self.reply(msg.chat, "This song link has expired or is invalid.").await?;
            return Ok(());
        };

        if !self.gate.is_authorized(msg.user).await {
            let keyboard = self.subscribe_button().map(|b| vec![vec![b]]);
            self.transport
                .send_text(msg.chat, "You must subscribe to our channel to get the song.", keyboard)
                .await?;
            return Ok(());
        }

        let status = self.reply(msg.chat, "Processing your request...").await?;
        let settings = self.settings.snapshot();
        self.continue_request(msg.chat, msg.user, track, status, &settings).await;
        Ok(())
    }

    async fn handle_command(&self, msg: &IncomingMessage, command: Command) -> Result<(), BotError> {
        if command.is_admin_only() && !self.config.is_admin(msg.user) {
            self.reply(msg.chat, NOT_AUTHORIZED).await?;
            return Ok(());
        }

        match command {
            Command::Start(payload) => {
                if msg.private {
                    if let Some(track_id) = payload.as_deref().and_then(deep_link_track) {
                        return self.send_song_in_private(msg, track_id).await;
                    }
                    self.reply(msg.chat, "Hi! I'm a music bot. Add me to the allowed group to start downloading music.")
                        .await?;
                } else if msg.chat == self.config.allowed_group {
                    self.reply(msg.chat, "Hi! I'm ready to download music. Send me a song name or a link.")
                        .await?;
                } else {
                    self.reply(msg.chat, "This group is not authorized to use this bot.").await?;
                }
            }
            Command::Admin => {
                let text = self.admin_summary();
                self.reply(msg.chat, &text).await?;
            }
            Command::Stats => {
                let text = format!("Total users in the database: {}", self.store.user_count());
                self.reply(msg.chat, &text).await?;
            }
            Command::ToggleQueue => {
                let enabled = !self.settings.snapshot().queue_enabled;
                let saved = self.settings.set_queue_enabled(enabled).await;
                let text = format!(
                    "Queue system has been {}.",
                    if enabled { "enabled" } else { "disabled" }
                );
                self.reply(msg.chat, &with_save_note(text, saved)).await?;
            }
            Command::UploadMode(change) => {
                let mode = match change {
                    ModeChange::Toggle => self.settings.snapshot().upload_mode.toggled(),
                    ModeChange::Set(mode) => mode,
                    ModeChange::Invalid(value) => {
                        let text = format!("Unknown upload mode '{value}'. Usage: /uploadmode [direct|info]");
                        self.reply(msg.chat, &text).await?;
                        return Ok(());
                    }
                };
                let saved = self.settings.set_upload_mode(mode).await;
                let text = format!("Upload mode has been switched to '{}'.", mode.as_str());
                self.reply(msg.chat, &with_save_note(text, saved)).await?;
            }
            Command::SetDelay(None) => {
                let text = format!(
                    "Usage: /setdelay <minutes> (0 disables auto-delete, at most {MAX_AUTO_DELETE_MINUTES})"
                );
                self.reply(msg.chat, &text).await?;
            }
            Command::SetDelay(Some(minutes)) => {
                let saved = self.settings.set_auto_delete_delay(minutes).await;
                let text = if minutes == 0 {
                    "Auto-delete has been disabled.".to_string()
                } else {
                    format!("Auto-delete delay set to {minutes} minutes.")
                };
                self.reply(msg.chat, &with_save_note(text, saved)).await?;
            }
            Command::Queue => {
                let settings = self.settings.snapshot();
                let text = format!(
                    "📋 {} song(s) waiting in the queue. The queue system is {}.",
                    self.queue.depth(),
                    if settings.queue_enabled { "enabled" } else { "disabled" }
                );
                self.reply(msg.chat, &text).await?;
            }
            Command::Broadcast(target) => self.broadcast(msg, target).await?,
            Command::SetCookies => {
                let Some(text) = msg.reply_to.as_ref().and_then(|r| r.text.as_deref()) else {
                    self.reply(msg.chat, "Reply to a message containing a Netscape cookie file with /setcookies.")
                        .await?;
                    return Ok(());
                };
                let answer = match self.cookies.install(text).await {
                    Ok(record) => format!(
                        "✅ Cookies saved.\nExpires: {}",
                        record
                            .expires_at
                            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                            .unwrap_or_else(|| "session only".to_string())
                    ),
                    Err(CookieError::Storage(e)) => {
                        error!(error = %e, "failed to store cookies");
                        "Failed to save cookies.".to_string()
                    }
                    Err(e) => format!("❌ Invalid cookie file: {e}"),
                };
                self.reply(msg.chat, &answer).await?;
            }
            Command::DelCookies => {
                let text = match self.cookies.remove().await {
                    Ok(true) => "Cookies deleted.",
                    Ok(false) => "No cookies were stored.",
                    Err(e) => {
                        error!(error = %e, "failed to delete cookies");
                        "Failed to delete cookies."
                    }
                };
                self.reply(msg.chat, text).await?;
            }
            Command::Cookies => {
                let text = self.cookies.status(Utc::now()).describe();
                self.reply(msg.chat, &text).await?;
            }
            Command::Unknown(name) => debug!(command = %name, "ignoring unknown command"),
        }
        Ok(())
    }

    fn admin_summary(&self) -> String {
        let settings = self.settings.snapshot();
        let failures_today = self.journal.count_for_date(&ErrorLogManager::today_str());
        let last_failure = self
            .journal
            .recent(1)
            .into_iter()
            .next()
            .map(|f| format!("\nLast failure: {} ({})", f.category, f.timestamp.format("%Y-%m-%d %H:%M UTC")))
            .unwrap_or_default();
        format!(
            "⚙️ Admin Panel\n\n\
             📤 Upload mode: {}\n\
             🔄 Queue system: {}\n\
             ⏱️ Auto-delete delay: {} minutes\n\
             📋 Songs in queue: {}\n\
             📊 Users: {}\n\
             ⚠️ Failures today: {}{}\n\n\
             Commands: /uploadmode [direct|info], /togglequeue, /setdelay <minutes>, /queue, \
             /stats, /broadcast users|group, /setcookies, /delcookies, /cookies",
            settings.upload_mode.as_str(),
            if settings.queue_enabled { "enabled" } else { "disabled" },
            settings.auto_delete_delay,
            self.queue.depth(),
            self.store.user_count(),
            failures_today,
            last_failure,
        )
    }

    async fn broadcast(&self, msg: &IncomingMessage, target: Option<BroadcastTarget>) -> Result<(), BotError> {
        let (Some(source), Some(target)) = (msg.reply_to.as_ref(), target) else {
            self.reply(
                msg.chat,
                "Reply to the message you want to broadcast with /broadcast users or /broadcast group.",
            )
            .await?;
            return Ok(());
        };

        let targets: Vec<ChatRef> = match target {
            BroadcastTarget::Users => self.store.all_users().into_iter().map(|u| ChatRef(u as i64)).collect(),
            BroadcastTarget::Group => vec![self.config.allowed_group],
        };
        let status = self.reply(msg.chat, "Starting broadcast...").await?;
        info!(targets = targets.len(), ?target, "broadcast started");

        let (mut sent, mut failed) = (0usize, 0usize);
        for chat in targets {
            match self.transport.copy_message(chat, source.message).await {
                Ok(()) => {
                    sent += 1;
                    tokio::time::sleep(BROADCAST_PAUSE).await;
                }
                Err(e) => {
                    failed += 1;
                    warn!(chat = chat.0, error = %e, "broadcast delivery failed");
                }
            }
        }

        info!(sent, failed, "broadcast finished");
        edit_status(
            self.transport.as_ref(),
            status,
            &format!("Broadcast complete.\n- Sent: {sent}\n- Failed: {failed}"),
        )
        .await;
        Ok(())
    }

    async fn reply(&self, chat: ChatRef, text: &str) -> Result<MessageRef, BotError> {
        Ok(self.transport.send_text(chat, text, None).await?)
    }
}

fn with_save_note(text: String, saved: Result<(), BotError>) -> String {
    match saved {
        Ok(()) => text,
        Err(_) => format!("{text}\n(Could not be saved; it will reset on restart.)"),
    }
}

#[async_trait]
impl DownloadHandler for BotService {
    async fn handle(&self, request: DownloadRequest) -> Result<(), BotError> {
        let settings = self.settings.snapshot();
        self.execute(&request, &settings).await
    }

    async fn report_failure(&self, request: &DownloadRequest, error: BotError) {
        self.fail(request.chat, request.user, request.status, Some(&request.track), error)
            .await;
    }

    async fn abandon(&self, request: DownloadRequest) {
        edit_status(self.transport.as_ref(), request.status, &BotError::QueueClosed.user_message()).await;
    }
}
