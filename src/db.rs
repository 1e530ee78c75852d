use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::BotError;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheRecord {
    pub handle: String,
    pub stored_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CookieRecord {
    pub data: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct StoreData {
    #[serde(default)]
    users: BTreeSet<u64>,
    #[serde(default)]
    settings: BTreeMap<String, Value>,
    #[serde(default)]
    cache: BTreeMap<String, CacheRecord>,
    #[serde(default)]
    cookies: Option<CookieRecord>,
}

/// Durable bot state in a single JSON file: settings, known users, the
/// track cache and the uploaded cookie record.
pub struct Store {
    file_path: PathBuf,
    data: Mutex<StoreData>,
    /// Serializes writers so the newest snapshot always lands last.
    write_lock: tokio::sync::Mutex<()>,
}

impl Store {
    /// Load the state file. A missing file starts empty; an unreadable one is
    /// set aside so the bot can still start.
    pub fn open(file_path: impl Into<PathBuf>) -> Result<Self, BotError> {
        let file_path = file_path.into();
        let data = if file_path.exists() {
            let raw = fs::read_to_string(&file_path)?;
            match serde_json::from_str(&raw) {
                Ok(data) => data,
                Err(e) => {
                    let backup = file_path.with_extension("json.corrupt");
                    warn!(path = %file_path.display(), error = %e, "state file unreadable, starting fresh");
                    fs::rename(&file_path, &backup)?;
                    StoreData::default()
                }
            }
        } else {
            StoreData::default()
        };

        info!(
            path = %file_path.display(),
            users = data.users.len(),
            cached = data.cache.len(),
            "state loaded"
        );
        Ok(Self {
            file_path,
            data: Mutex::new(data),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Returns true when the user was not known before.
    pub async fn add_user(&self, user_id: u64) -> Result<bool, BotError> {
        let inserted = self.data.lock().users.insert(user_id);
        if inserted {
            self.save().await?;
        }
        Ok(inserted)
    }

    pub fn user_count(&self) -> usize {
        self.data.lock().users.len()
    }

    pub fn all_users(&self) -> Vec<u64> {
        self.data.lock().users.iter().copied().collect()
    }

    pub fn setting(&self, key: &str) -> Option<Value> {
        self.data.lock().settings.get(key).cloned()
    }

    pub async fn set_setting(&self, key: &str, value: Value) -> Result<(), BotError> {
        self.data.lock().settings.insert(key.to_string(), value);
        self.save().await
    }

    pub fn cached(&self, track_id: &str) -> Option<CacheRecord> {
        self.data.lock().cache.get(track_id).cloned()
    }

    pub async fn put_cached(&self, track_id: &str, record: CacheRecord) -> Result<(), BotError> {
        self.data.lock().cache.insert(track_id.to_string(), record);
        self.save().await
    }

    pub async fn remove_cached(&self, track_id: &str) -> Result<bool, BotError> {
        let removed = self.data.lock().cache.remove(track_id).is_some();
        if removed {
            self.save().await?;
        }
        Ok(removed)
    }

    /// Remove the entry only if it is still the one written at `stored_at`.
    pub async fn remove_cached_from(&self, track_id: &str, stored_at: DateTime<Utc>) -> Result<bool, BotError> {
        let removed = {
            let mut data = self.data.lock();
            let current = data.cache.get(track_id).is_some_and(|r| r.stored_at == stored_at);
            current && data.cache.remove(track_id).is_some()
        };
        if removed {
            self.save().await?;
        }
        Ok(removed)
    }

    pub fn cookies(&self) -> Option<CookieRecord> {
        self.data.lock().cookies.clone()
    }

    pub async fn set_cookies(&self, record: CookieRecord) -> Result<(), BotError> {
        self.data.lock().cookies = Some(record);
        self.save().await
    }

    pub async fn delete_cookies(&self) -> Result<bool, BotError> {
        let removed = self.data.lock().cookies.take().is_some();
        if removed {
            self.save().await?;
        }
        Ok(removed)
    }

    async fn save(&self) -> Result<(), BotError> {
        let _writer = self.write_lock.lock().await;
        let json = {
            let data = self.data.lock();
            serde_json::to_string_pretty(&*data).map_err(|e| BotError::Storage(e.to_string()))?
        };

        if let Some(parent) = self.file_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.file_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.file_path).await?;
        Ok(())
    }
}
