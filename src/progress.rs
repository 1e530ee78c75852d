use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::downloader::FetchProgress;
use crate::transport::{ChatTransport, Keyboard, MessageRef, TransportError};

/// Minimum spacing between two progress edits of the same status message.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);
const MAX_EDIT_ATTEMPTS: usize = 3;

pub struct ProgressThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    pub fn admit(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

pub fn format_progress(progress: &FetchProgress) -> String {
    let mut text = format!("📥 Downloading... {:.1}%", progress.percent);
    if let Some(size) = &progress.total_size {
        text.push_str(&format!("\nSize: {size}"));
    }
    if let Some(speed) = &progress.speed {
        text.push_str(&format!("\nSpeed: {speed}"));
    }
    text
}

/// Best-effort status edit. Waits out rate limits, treats "not modified" as
/// success and logs anything else. Returns whether the message now shows
/// `text`.
pub async fn edit_status(transport: &dyn ChatTransport, message: MessageRef, text: &str) -> bool {
    edit_status_with(transport, message, text, None).await
}

pub async fn edit_status_with(
    transport: &dyn ChatTransport,
    message: MessageRef,
    text: &str,
    keyboard: Option<Keyboard>,
) -> bool {
    for attempt in 1..=MAX_EDIT_ATTEMPTS {
        match transport.edit_text(message, text, keyboard.clone()).await {
            Ok(()) | Err(TransportError::NotModified) => return true,
            Err(TransportError::RetryAfter(wait)) if attempt < MAX_EDIT_ATTEMPTS => {
                debug!(chat = message.chat.0, ?wait, "status edit rate limited");
                tokio::time::sleep(wait).await;
            }
            Err(e) => {
                warn!(chat = message.chat.0, message_id = message.id, error = %e, "status edit failed");
                return false;
            }
        }
    }
    false
}

/// Forward extractor progress to the status message, at most one edit per
/// [`PROGRESS_INTERVAL`]. Ends when every sender is dropped.
pub fn relay(
    transport: Arc<dyn ChatTransport>,
    message: MessageRef,
    mut updates: mpsc::UnboundedReceiver<FetchProgress>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut throttle = ProgressThrottle::new(PROGRESS_INTERVAL);
        while let Some(progress) = updates.recv().await {
            if throttle.admit(Instant::now()) {
                edit_status(transport.as_ref(), message, &format_progress(&progress)).await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RecordingTransport;
    use crate::transport::ChatRef;

    fn status() -> MessageRef {
        MessageRef { chat: ChatRef(-100), id: 7 }
    }

    fn progress(percent: f32) -> FetchProgress {
        FetchProgress { percent, total_size: None, speed: None }
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_window() {
        let mut throttle = ProgressThrottle::new(PROGRESS_INTERVAL);
        let start = Instant::now();
        assert!(throttle.admit(start));
        assert!(!throttle.admit(start + Duration::from_millis(1999)));
        assert!(throttle.admit(start + Duration::from_secs(2)));
        assert!(!throttle.admit(start + Duration::from_secs(3)));
    }

    #[test]
    fn test_format_progress() {
        let text = format_progress(&FetchProgress {
            percent: 42.34,
            total_size: Some("3.52MiB".into()),
            speed: Some("1.21MiB/s".into()),
        });
        assert_eq!(text, "📥 Downloading... 42.3%\nSize: 3.52MiB\nSpeed: 1.21MiB/s");
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_waits_out_rate_limit() {
        let transport = RecordingTransport::new();
        transport.fail_next_edit(TransportError::RetryAfter(Duration::from_secs(5)));
        let started = Instant::now();

        assert!(edit_status(&transport, status(), "Uploading song...").await);
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(transport.edits_of(status()), vec!["Uploading song..."]);
    }

    #[tokio::test]
    async fn test_not_modified_is_swallowed() {
        let transport = RecordingTransport::new();
        transport.fail_next_edit(TransportError::NotModified);
        assert!(edit_status(&transport, status(), "same").await);
        assert!(transport.edits_of(status()).is_empty());
    }

    #[tokio::test]
    async fn test_other_errors_give_up() {
        let transport = RecordingTransport::new();
        transport.fail_next_edit(TransportError::Rejected("message to edit not found".into()));
        assert!(!edit_status(&transport, status(), "x").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_coalesces_bursts() {
        let transport = Arc::new(RecordingTransport::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let task = relay(transport.clone(), status(), rx);

        for pct in [10.0, 20.0, 30.0] {
            tx.send(progress(pct)).unwrap();
        }
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.edits_of(status()).len(), 1);

        tokio::time::sleep(PROGRESS_INTERVAL).await;
        tx.send(progress(90.0)).unwrap();
        drop(tx);
        task.await.unwrap();

        let edits = transport.edits_of(status());
        assert_eq!(edits.len(), 2);
        assert!(edits[0].contains("10.0%"));
        assert!(edits[1].contains("90.0%"));
    }
}
