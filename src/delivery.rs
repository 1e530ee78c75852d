use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::BotError;
use crate::settings::RuntimeSettings;
use crate::sources::models::TrackMetadata;
use crate::transport::{AudioSource, ChatRef, ChatTransport, MessageRef, OutgoingAudio, SentAudio, TransportError};

pub fn build_caption(track: &TrackMetadata, auto_delete_minutes: u64) -> String {
    let mut caption = format!("🎵 {}\n👤 {}", track.title, track.artist);
    if let Some(album) = &track.album {
        caption.push_str(&format!("\n💿 {album}"));
    }
    if auto_delete_minutes > 0 {
        caption.push_str(&format!(
            "\n\n⚠️ This file will be deleted in {auto_delete_minutes} minutes."
        ));
    }
    caption
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionJob {
    pub message: MessageRef,
    pub fire_at: Instant,
}

/// One-shot delayed deletions of delivered messages. Jobs still waiting at
/// shutdown are dropped.
pub struct DeletionScheduler {
    transport: Arc<dyn ChatTransport>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl DeletionScheduler {
    pub fn new(transport: Arc<dyn ChatTransport>, shutdown: CancellationToken) -> Self {
        Self { transport, shutdown, tracker: TaskTracker::new() }
    }

    /// Returns `None` when the deadline is too far out to represent.
    pub fn schedule(&self, message: MessageRef, delay: Duration) -> Option<DeletionJob> {
        let Some(fire_at) = Instant::now().checked_add(delay) else {
            warn!(chat = message.chat.0, message_id = message.id, ?delay, "deletion delay out of range, keeping message");
            return None;
        };
        let job = DeletionJob { message, fire_at };
        let transport = Arc::clone(&self.transport);
        let shutdown = self.shutdown.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(chat = message.chat.0, message_id = message.id, "deletion dropped at shutdown");
                }
                _ = tokio::time::sleep_until(job.fire_at) => {
                    match transport.delete_message(message).await {
                        Ok(()) => info!(chat = message.chat.0, message_id = message.id, "auto-deleted song"),
                        Err(e) => warn!(chat = message.chat.0, message_id = message.id, error = %e, "auto-delete failed"),
                    }
                }
            }
        });
        Some(job)
    }

    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    pub async fn close(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[derive(Debug)]
pub struct DeliveryReport {
    pub sent: SentAudio,
    pub deletion: Option<DeletionJob>,
}

/// Sends finished songs. On failure the caller reports the error in the
/// status message; on success the status message is removed here.
pub struct Delivery {
    transport: Arc<dyn ChatTransport>,
    upload_timeout: Duration,
    deletions: DeletionScheduler,
}

impl Delivery {
    pub fn new(transport: Arc<dyn ChatTransport>, upload_timeout: Duration, shutdown: CancellationToken) -> Self {
        let deletions = DeletionScheduler::new(Arc::clone(&transport), shutdown);
        Self { transport, upload_timeout, deletions }
    }

    pub fn deletions(&self) -> &DeletionScheduler {
        &self.deletions
    }

    pub async fn deliver(
        &self,
        chat: ChatRef,
        source: AudioSource,
        track: &TrackMetadata,
        settings: &RuntimeSettings,
        status: Option<MessageRef>,
        loose_cover: Option<Vec<u8>>,
    ) -> Result<DeliveryReport, BotError> {
        let audio = OutgoingAudio {
            source,
            caption: build_caption(track, settings.auto_delete_delay),
            title: track.title.clone(),
            performer: track.artist.clone(),
            duration_secs: track.duration_secs,
        };

        let sent = match tokio::time::timeout(self.upload_timeout, self.transport.send_audio(chat, audio)).await {
            Ok(Ok(sent)) => sent,
            Ok(Err(TransportError::Timeout)) | Err(_) => {
                warn!(chat = chat.0, track_id = %track.id, "upload timed out");
                return Err(BotError::UploadTimedOut);
            }
            Ok(Err(e)) => return Err(BotError::Transport(e)),
        };
        info!(chat = chat.0, track_id = %track.id, message_id = sent.message.id, "song delivered");

        if let Some(status) = status {
            if let Err(e) = self.transport.delete_message(status).await {
                debug!(chat = chat.0, error = %e, "could not delete status message");
            }
        }
        if let Some(cover) = loose_cover {
            if let Err(e) = self.transport.send_photo(chat, cover).await {
                warn!(chat = chat.0, track_id = %track.id, error = %e, "failed to send cover art");
            }
        }

        let deletion = match settings.auto_delete_delay {
            0 => None,
            minutes => match minutes.checked_mul(60) {
                Some(secs) => self.deletions.schedule(sent.message, Duration::from_secs(secs)),
                None => {
                    warn!(chat = chat.0, minutes, "auto-delete delay out of range, keeping message");
                    None
                }
            },
        };
        Ok(DeliveryReport { sent, deletion })
    }
}
