use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{
    ChatMemberKind, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId, Recipient,
};
use teloxide::{ApiError, RequestError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::service::BotService;
use crate::transport::{
    AudioSource, Button, ChatRef, ChatTransport, IncomingCallback, IncomingMessage, Keyboard,
    MemberStatus, MessageRef, OutgoingAudio, RepliedMessage, SentAudio, TransportError, UserRef,
};

/// Headroom over the delivery timeout so the bot's own deadline fires first.
const CLIENT_TIMEOUT_SLACK: Duration = Duration::from_secs(30);

pub fn build_bot(token: &str, upload_timeout: Duration) -> anyhow::Result<Bot> {
    let client = teloxide::net::default_reqwest_settings()
        .timeout(upload_timeout + CLIENT_TIMEOUT_SLACK)
        .build()?;
    Ok(Bot::with_client(token, client))
}

/// The bot's `@username`, used for deep links when none is configured.
pub async fn fetch_username(bot: &Bot) -> Option<String> {
    match bot.get_me().await {
        Ok(me) => me.user.username.clone(),
        Err(e) => {
            warn!(error = %e, "could not look up the bot's username");
            None
        }
    }
}

pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn chat_id(chat: ChatRef) -> ChatId {
    ChatId(chat.0)
}

fn map_error(error: RequestError) -> TransportError {
    match error {
        RequestError::RetryAfter(wait) => TransportError::RetryAfter(wait),
        RequestError::Api(ApiError::MessageNotModified) => TransportError::NotModified,
        RequestError::Network(e) if e.is_timeout() => TransportError::Timeout,
        other => TransportError::Rejected(other.to_string()),
    }
}

fn markup(keyboard: Keyboard) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(
        keyboard
            .into_iter()
            .map(|row| row.into_iter().filter_map(inline_button).collect::<Vec<_>>()),
    )
}

fn inline_button(button: Button) -> Option<InlineKeyboardButton> {
    match button {
        Button::Url { text, url } => match reqwest::Url::parse(&url) {
            Ok(url) => Some(InlineKeyboardButton::url(text, url)),
            Err(e) => {
                warn!(%url, error = %e, "dropping button with invalid url");
                None
            }
        },
        Button::Callback { text, data } => Some(InlineKeyboardButton::callback(text, data)),
    }
}

/// `@name` or a numeric chat id.
fn recipient(group: &str) -> Result<Recipient, TransportError> {
    if group.starts_with('@') {
        return Ok(Recipient::ChannelUsername(group.to_string()));
    }
    group
        .parse::<i64>()
        .map(|id| Recipient::Id(ChatId(id)))
        .map_err(|_| TransportError::Rejected(format!("invalid channel reference {group:?}")))
}

fn member_status(kind: &ChatMemberKind) -> MemberStatus {
    match kind {
        ChatMemberKind::Owner(_) => MemberStatus::Owner,
        ChatMemberKind::Administrator(_) => MemberStatus::Administrator,
        ChatMemberKind::Member => MemberStatus::Member,
        ChatMemberKind::Restricted(_) => MemberStatus::Restricted,
        ChatMemberKind::Left => MemberStatus::Left,
        ChatMemberKind::Banned(_) => MemberStatus::Banned,
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_text(
        &self,
        chat: ChatRef,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<MessageRef, TransportError> {
        let mut request = self.bot.send_message(chat_id(chat), text);
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(markup(keyboard));
        }
        let sent = request.await.map_err(map_error)?;
        Ok(MessageRef { chat, id: sent.id.0 })
    }

    async fn edit_text(
        &self,
        message: MessageRef,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), TransportError> {
        let mut request = self
            .bot
            .edit_message_text(chat_id(message.chat), MessageId(message.id), text);
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(markup(keyboard));
        }
        request.await.map_err(map_error)?;
        Ok(())
    }

    async fn delete_message(&self, message: MessageRef) -> Result<(), TransportError> {
        self.bot
            .delete_message(chat_id(message.chat), MessageId(message.id))
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn send_audio(
        &self,
        chat: ChatRef,
        audio: OutgoingAudio,
    ) -> Result<SentAudio, TransportError> {
        let file = match audio.source {
            AudioSource::File(path) => InputFile::file(path),
            AudioSource::Handle(handle) => InputFile::file_id(handle),
        };
        let sent = self
            .bot
            .send_audio(chat_id(chat), file)
            .caption(audio.caption)
            .title(audio.title)
            .performer(audio.performer)
            .duration(audio.duration_secs)
            .await
            .map_err(map_error)?;
        Ok(SentAudio {
            message: MessageRef { chat, id: sent.id.0 },
            handle: sent.audio().map(|a| a.file.id.clone()),
        })
    }

    async fn send_photo(&self, chat: ChatRef, image: Vec<u8>) -> Result<MessageRef, TransportError> {
        let sent = self
            .bot
            .send_photo(chat_id(chat), InputFile::memory(image).file_name("cover.jpg"))
            .await
            .map_err(map_error)?;
        Ok(MessageRef { chat, id: sent.id.0 })
    }

    async fn copy_message(&self, to: ChatRef, message: MessageRef) -> Result<(), TransportError> {
        self.bot
            .copy_message(chat_id(to), chat_id(message.chat), MessageId(message.id))
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn member_status(&self, group: &str, user: UserRef) -> Result<MemberStatus, TransportError> {
        let member = self
            .bot
            .get_chat_member(recipient(group)?, UserId(user.0))
            .await
            .map_err(map_error)?;
        Ok(member_status(&member.kind))
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<(), TransportError> {
        self.bot
            .answer_callback_query(callback_id.to_string())
            .await
            .map_err(map_error)?;
        Ok(())
    }
}

fn message_ref(msg: &Message) -> MessageRef {
    MessageRef { chat: ChatRef(msg.chat.id.0), id: msg.id.0 }
}

/// Text messages with a known sender; everything else is ignored.
fn incoming_message(msg: &Message) -> Option<IncomingMessage> {
    let text = msg.text()?;
    let user = msg.from()?;
    Some(IncomingMessage {
        chat: ChatRef(msg.chat.id.0),
        private: msg.chat.is_private(),
        user: UserRef(user.id.0),
        text: text.to_string(),
        reply_to: msg.reply_to_message().map(|replied| RepliedMessage {
            message: message_ref(replied),
            text: replied.text().map(str::to_string),
        }),
    })
}

fn incoming_callback(query: &CallbackQuery) -> IncomingCallback {
    IncomingCallback {
        id: query.id.clone(),
        user: UserRef(query.from.id.0),
        message: query.message.as_ref().map(message_ref),
        data: query.data.clone(),
    }
}

async fn on_message(msg: Message, service: Arc<BotService>) -> ResponseResult<()> {
    let Some(incoming) = incoming_message(&msg) else {
        return Ok(());
    };
    let chat = incoming.chat.0;
    if let Err(e) = service.handle_message(incoming).await {
        warn!(chat, error = %e, "message handling failed");
    }
    Ok(())
}

async fn on_callback(query: CallbackQuery, service: Arc<BotService>) -> ResponseResult<()> {
    let incoming = incoming_callback(&query);
    let user = incoming.user.0;
    if let Err(e) = service.handle_callback(incoming).await {
        warn!(user, error = %e, "callback handling failed");
    }
    Ok(())
}

/// Long-poll for updates until `shutdown` fires. Updates are handled
/// concurrently; downloads are serialised by the queue, not here.
pub async fn run_dispatcher(bot: Bot, service: Arc<BotService>, shutdown: CancellationToken) {
    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(on_message))
        .branch(Update::filter_callback_query().endpoint(on_callback));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![service])
        .default_handler(|update| async move {
            debug!(update_id = update.id, "ignoring update");
        })
        .distribution_function(|_| None::<()>)
        .build();

    let token = dispatcher.shutdown_token();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        match token.shutdown() {
            Ok(stopped) => stopped.await,
            Err(e) => debug!(error = ?e, "dispatcher was not running"),
        }
    });

    info!("polling for updates");
    dispatcher.dispatch().await;
    info!("dispatcher stopped");
}
