use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChatRef(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserRef(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat: ChatRef,
    pub id: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Button {
    Url { text: String, url: String },
    Callback { text: String, data: String },
}

impl Button {
    pub fn url(text: impl Into<String>, url: impl Into<String>) -> Self {
        Button::Url { text: text.into(), url: url.into() }
    }

    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Button::Callback { text: text.into(), data: data.into() }
    }
}

/// Rows of inline buttons.
pub type Keyboard = Vec<Vec<Button>>;

#[derive(Debug, Clone, PartialEq)]
pub enum AudioSource {
    /// A file in scratch space, uploaded from disk.
    File(PathBuf),
    /// A handle returned by an earlier upload.
    Handle(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingAudio {
    pub source: AudioSource,
    pub caption: String,
    pub title: String,
    pub performer: String,
    pub duration_secs: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentAudio {
    pub message: MessageRef,
    /// Reusable reference to the uploaded file, when the transport returns one.
    pub handle: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Owner,
    Administrator,
    Member,
    Restricted,
    Left,
    Banned,
}

impl MemberStatus {
    pub fn is_subscribed(self) -> bool {
        matches!(
            self,
            MemberStatus::Owner | MemberStatus::Administrator | MemberStatus::Member
        )
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("rate limited, retry after {0:?}")]
    RetryAfter(Duration),
    #[error("message is not modified")]
    NotModified,
    #[error("request timed out")]
    Timeout,
    #[error("{0}")]
    Rejected(String),
}

/// A text message addressed to the bot.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub chat: ChatRef,
    pub private: bool,
    pub user: UserRef,
    pub text: String,
    pub reply_to: Option<RepliedMessage>,
}

#[derive(Debug, Clone)]
pub struct RepliedMessage {
    pub message: MessageRef,
    pub text: Option<String>,
}

/// An inline button press.
#[derive(Debug, Clone)]
pub struct IncomingCallback {
    pub id: String,
    pub user: UserRef,
    pub message: Option<MessageRef>,
    pub data: Option<String>,
}

/// Outbound chat operations the bot relies on.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(
        &self,
        chat: ChatRef,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<MessageRef, TransportError>;

    async fn edit_text(
        &self,
        message: MessageRef,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), TransportError>;

    async fn delete_message(&self, message: MessageRef) -> Result<(), TransportError>;

    async fn send_audio(
        &self,
        chat: ChatRef,
        audio: OutgoingAudio,
    ) -> Result<SentAudio, TransportError>;

    async fn send_photo(&self, chat: ChatRef, image: Vec<u8>) -> Result<MessageRef, TransportError>;

    async fn copy_message(&self, to: ChatRef, message: MessageRef) -> Result<(), TransportError>;

    /// `group` is either `@username` or a numeric chat id.
    async fn member_status(&self, group: &str, user: UserRef)
        -> Result<MemberStatus, TransportError>;

    async fn answer_callback(&self, callback_id: &str) -> Result<(), TransportError>;
}
