use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::BotError;
use crate::sources::models::TrackMetadata;
use crate::transport::{ChatRef, MessageRef, UserRef};

/// A resolved song waiting for the worker.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub id: Uuid,
    pub chat: ChatRef,
    pub user: UserRef,
    pub track: TrackMetadata,
    /// The requester's status message, edited as the item progresses.
    pub status: MessageRef,
    pub enqueued_at: DateTime<Utc>,
}

impl DownloadRequest {
    pub fn new(chat: ChatRef, user: UserRef, track: TrackMetadata, status: MessageRef) -> Self {
        Self { id: Uuid::new_v4(), chat, user, track, status, enqueued_at: Utc::now() }
    }
}

/// Producer side of the FIFO. Cloning shares the same queue.
#[derive(Clone)]
pub struct DownloadQueue {
    tx: mpsc::UnboundedSender<DownloadRequest>,
    depth: Arc<AtomicUsize>,
}

/// Consumer side, handed to the single [`DownloadWorker`].
pub struct QueueReceiver {
    rx: mpsc::UnboundedReceiver<DownloadRequest>,
    depth: Arc<AtomicUsize>,
}

impl DownloadQueue {
    pub fn new() -> (Self, QueueReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        (Self { tx, depth: Arc::clone(&depth) }, QueueReceiver { rx, depth })
    }

    /// Never blocks. Returns the number of items waiting, this one included.
    pub fn enqueue(&self, request: DownloadRequest) -> Result<usize, BotError> {
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        if self.tx.send(request).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(BotError::QueueClosed);
        }
        Ok(depth)
    }

    /// Items waiting, not counting the one being processed.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

impl QueueReceiver {
    async fn recv(&mut self) -> Option<DownloadRequest> {
        let request = self.rx.recv().await?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Some(request)
    }

    fn close_and_drain(&mut self) -> Vec<DownloadRequest> {
        self.rx.close();
        let mut left = Vec::new();
        while let Ok(request) = self.rx.try_recv() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            left.push(request);
        }
        left
    }
}

#[async_trait]
pub trait DownloadHandler: Send + Sync {
    /// Run one item to completion.
    async fn handle(&self, request: DownloadRequest) -> Result<(), BotError>;

    /// Leave the item's status message in a terminal state after a failure.
    async fn report_failure(&self, request: &DownloadRequest, error: BotError);

    /// Called for items still queued at shutdown.
    async fn abandon(&self, request: DownloadRequest);
}

/// The single consumer: one item at a time, in enqueue order.
pub struct DownloadWorker {
    queue: QueueReceiver,
    handler: Arc<dyn DownloadHandler>,
    shutdown: CancellationToken,
}

impl DownloadWorker {
    pub fn new(queue: QueueReceiver, handler: Arc<dyn DownloadHandler>, shutdown: CancellationToken) -> Self {
        Self { queue, handler, shutdown }
    }

    pub async fn run(mut self) {
        info!("download worker started");
        loop {
            let request = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                next = self.queue.recv() => match next {
                    Some(request) => request,
                    None => break,
                },
            };

            let waited = Utc::now().signed_duration_since(request.enqueued_at);
            info!(
                item = %request.id,
                chat = request.chat.0,
                track_id = %request.track.id,
                waited_ms = waited.num_milliseconds(),
                "dispatching queued item"
            );

            let outcome = AssertUnwindSafe(self.handler.handle(request.clone()))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.handler.report_failure(&request, e).await,
                Err(_) => {
                    error!(item = %request.id, track_id = %request.track.id, "download handler panicked");
                    self.handler
                        .report_failure(&request, BotError::Pipeline("download handler panicked".into()))
                        .await;
                }
            }
        }

        let left = self.queue.close_and_drain();
        if !left.is_empty() {
            warn!(count = left.len(), "worker stopping with queued items");
        }
        for request in left {
            self.handler.abandon(request).await;
        }
        info!("download worker stopped");
    }
}
