use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::db::Store;
use crate::error::BotError;

pub const UPLOAD_MODE_KEY: &str = "upload_mode";
pub const QUEUE_ENABLED_KEY: &str = "queue_enabled";
pub const AUTO_DELETE_DELAY_KEY: &str = "auto_delete_delay";
/// Longest accepted auto-delete delay: one week, in minutes.
pub const MAX_AUTO_DELETE_MINUTES: u64 = 7 * 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadMode {
    /// Download and send the audio.
    #[default]
    Direct,
    /// Reply with metadata and a deep link only.
    Info,
}

impl UploadMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "direct" => Some(UploadMode::Direct),
            "info" => Some(UploadMode::Info),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UploadMode::Direct => "direct",
            UploadMode::Info => "info",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            UploadMode::Direct => UploadMode::Info,
            UploadMode::Info => UploadMode::Direct,
        }
    }
}

/// Immutable snapshot of the admin-controlled policy. Each dispatched item
/// takes one at dispatch time and keeps it for its whole run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuntimeSettings {
    pub upload_mode: UploadMode,
    pub queue_enabled: bool,
    /// Minutes until a delivered song is deleted; 0 keeps it forever.
    pub auto_delete_delay: u64,
}

/// Process-wide settings: the current snapshot plus write-through to the store.
#[derive(Clone)]
pub struct SettingsHandle {
    tx: Arc<watch::Sender<RuntimeSettings>>,
    store: Arc<Store>,
}

impl SettingsHandle {
    /// Persisted values win; anything missing or malformed falls back to
    /// `defaults` (which come from the environment).
    pub fn load(store: Arc<Store>, defaults: RuntimeSettings) -> Self {
        let upload_mode = store
            .setting(UPLOAD_MODE_KEY)
            .and_then(|v| v.as_str().and_then(UploadMode::parse))
            .unwrap_or(defaults.upload_mode);
        let queue_enabled = store
            .setting(QUEUE_ENABLED_KEY)
            .and_then(|v| value_as_bool(&v))
            .unwrap_or(defaults.queue_enabled);
        let auto_delete_delay = store
            .setting(AUTO_DELETE_DELAY_KEY)
            .and_then(|v| value_as_u64(&v))
            .unwrap_or(defaults.auto_delete_delay);
        if auto_delete_delay > MAX_AUTO_DELETE_MINUTES {
            warn!(auto_delete_delay, max = MAX_AUTO_DELETE_MINUTES, "auto-delete delay too long, capping");
        }
        let auto_delete_delay = auto_delete_delay.min(MAX_AUTO_DELETE_MINUTES);

        let settings = RuntimeSettings { upload_mode, queue_enabled, auto_delete_delay };
        info!(
            upload_mode = settings.upload_mode.as_str(),
            queue_enabled = settings.queue_enabled,
            auto_delete_delay = settings.auto_delete_delay,
            "runtime settings loaded"
        );
        let (tx, _rx) = watch::channel(settings);
        Self { tx: Arc::new(tx), store }
    }

    pub fn snapshot(&self) -> RuntimeSettings {
        self.tx.borrow().clone()
    }

    pub async fn set_upload_mode(&self, mode: UploadMode) -> Result<(), BotError> {
        self.tx.send_modify(|s| s.upload_mode = mode);
        self.persist(UPLOAD_MODE_KEY, json!(mode.as_str())).await
    }

    pub async fn set_queue_enabled(&self, enabled: bool) -> Result<(), BotError> {
        self.tx.send_modify(|s| s.queue_enabled = enabled);
        self.persist(QUEUE_ENABLED_KEY, json!(enabled)).await
    }

    pub async fn set_auto_delete_delay(&self, minutes: u64) -> Result<(), BotError> {
        let minutes = minutes.min(MAX_AUTO_DELETE_MINUTES);
        self.tx.send_modify(|s| s.auto_delete_delay = minutes);
        self.persist(AUTO_DELETE_DELAY_KEY, json!(minutes)).await
    }

    async fn persist(&self, key: &str, value: Value) -> Result<(), BotError> {
        info!(key, %value, "setting changed");
        self.store.set_setting(key, value).await.inspect_err(|e| {
            warn!(key, error = %e, "setting applied but not persisted");
        })
    }
}

fn value_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "t" => Some(true),
            "false" | "0" | "f" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_u64().map(|n| n != 0),
        _ => None,
    }
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
