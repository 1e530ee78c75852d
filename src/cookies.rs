use chrono::{DateTime, TimeZone, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::{CookieRecord, Store};
use crate::error::BotError;

const NETSCAPE_HEADERS: [&str; 2] = ["# Netscape HTTP Cookie File", "# HTTP Cookie File"];
const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

#[derive(Debug, Error)]
pub enum CookieError {
    #[error("missing the '# Netscape HTTP Cookie File' header")]
    MissingHeader,
    #[error("no cookie lines with 7 tab-separated fields")]
    NoCookies,
    #[error(transparent)]
    Storage(#[from] BotError),
}

/// Check the Netscape cookie-file format and return the earliest expiry of
/// any non-session cookie.
pub fn validate(text: &str) -> Result<Option<DateTime<Utc>>, CookieError> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let header = lines.next().ok_or(CookieError::MissingHeader)?;
    if !NETSCAPE_HEADERS.iter().any(|h| header.starts_with(h)) {
        return Err(CookieError::MissingHeader);
    }

    let mut cookies = 0usize;
    let mut earliest: Option<i64> = None;
    for line in lines {
        let line = line.strip_prefix(HTTP_ONLY_PREFIX).unwrap_or(line);
        if line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 7 {
            continue;
        }
        cookies += 1;
        if let Ok(expiry) = fields[4].parse::<i64>() {
            if expiry > 0 {
                earliest = Some(earliest.map_or(expiry, |e| e.min(expiry)));
            }
        }
    }

    if cookies == 0 {
        return Err(CookieError::NoCookies);
    }
    Ok(earliest.and_then(|ts| Utc.timestamp_opt(ts, 0).single()))
}

#[derive(Debug, Clone, PartialEq)]
pub enum CookieStatus {
    None,
    /// Only the file named in the environment is available.
    ConfiguredFile(PathBuf),
    Active(CookieRecord),
    Expired(CookieRecord),
}

impl CookieStatus {
    pub fn describe(&self) -> String {
        let expiry = |record: &CookieRecord| {
            record
                .expires_at
                .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_else(|| "session only".to_string())
        };
        match self {
            CookieStatus::None => "🍪 No cookies are configured.".to_string(),
            CookieStatus::ConfiguredFile(path) => {
                format!("🍪 Using the configured cookie file: {}", path.display())
            }
            CookieStatus::Active(record) => format!(
                "🍪 Cookies are active.\nExpires: {}\nUpdated: {}",
                expiry(record),
                record.updated_at.format("%Y-%m-%d %H:%M UTC")
            ),
            CookieStatus::Expired(record) => format!(
                "⚠️ Cookies have expired ({}). Upload fresh ones with /setcookies.",
                expiry(record)
            ),
        }
    }
}

/// Admin-uploaded cookies, persisted in the store and written out as a file
/// the extractor can read.
pub struct CookieManager {
    store: Arc<Store>,
    managed_path: PathBuf,
    fallback: Option<PathBuf>,
}

impl CookieManager {
    pub fn new(store: Arc<Store>, managed_path: PathBuf, fallback: Option<PathBuf>) -> Self {
        Self { store, managed_path, fallback }
    }

    /// Rewrite the cookie file from the stored record after a restart.
    pub async fn restore(&self) -> Result<(), BotError> {
        if let Some(record) = self.store.cookies() {
            self.materialise(&record.data).await?;
            info!(path = %self.managed_path.display(), "restored stored cookies");
        }
        Ok(())
    }

    pub async fn install(&self, text: &str) -> Result<CookieRecord, CookieError> {
        let expires_at = validate(text)?;
        let record = CookieRecord {
            data: text.to_string(),
            expires_at,
            updated_at: Utc::now(),
        };
        self.store.set_cookies(record.clone()).await?;
        self.materialise(text).await?;
        info!(expires_at = ?record.expires_at, "cookies installed");
        Ok(record)
    }

    /// Returns false when there was nothing to delete.
    pub async fn remove(&self) -> Result<bool, BotError> {
        let removed = self.store.delete_cookies().await?;
        match tokio::fs::remove_file(&self.managed_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.managed_path.display(), error = %e, "failed to remove cookie file"),
        }
        Ok(removed)
    }

    /// Cookie file to hand to the extractor, if any. Expired cookies are
    /// still passed along.
    pub fn active_path(&self) -> Option<PathBuf> {
        if self.store.cookies().is_some() && self.managed_path.is_file() {
            return Some(self.managed_path.clone());
        }
        self.fallback.clone()
    }

    pub fn status(&self, now: DateTime<Utc>) -> CookieStatus {
        match self.store.cookies() {
            Some(record) if record.expires_at.is_some_and(|t| t <= now) => {
                CookieStatus::Expired(record)
            }
            Some(record) => CookieStatus::Active(record),
            None => match &self.fallback {
                Some(path) => CookieStatus::ConfiguredFile(path.clone()),
                None => CookieStatus::None,
            },
        }
    }

    async fn materialise(&self, text: &str) -> Result<(), BotError> {
        if let Some(parent) = self.managed_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.managed_path, text).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# Netscape HTTP Cookie File\n\
        # This is a generated file\n\
        .youtube.com\tTRUE\t/\tTRUE\t1893456000\tPREF\tf6=40000000\n\
        #HttpOnly_.youtube.com\tTRUE\t/\tTRUE\t1861920000\tLOGIN_INFO\tabc\n\
        .youtube.com\tTRUE\t/\tTRUE\t0\tYSC\tsession\n";

    fn manager(dir: &tempfile::TempDir, fallback: Option<PathBuf>) -> CookieManager {
        let store = Arc::new(Store::open(dir.path().join("state.json")).unwrap());
        CookieManager::new(store, dir.path().join("cookies.txt"), fallback)
    }

    #[test]
    fn test_validate_takes_earliest_persistent_expiry() {
        let expiry = validate(SAMPLE).unwrap().unwrap();
        assert_eq!(expiry.timestamp(), 1861920000);
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        assert!(matches!(validate("hello"), Err(CookieError::MissingHeader)));
        assert!(matches!(validate(""), Err(CookieError::MissingHeader)));
        assert!(matches!(
            validate("# Netscape HTTP Cookie File\n.youtube.com\tTRUE\t/\n"),
            Err(CookieError::NoCookies)
        ));
    }

    #[test]
    fn test_session_only_cookies_have_no_expiry() {
        let text = "# Netscape HTTP Cookie File\n.a.com\tTRUE\t/\tFALSE\t0\tk\tv\n";
        assert_eq!(validate(text).unwrap(), None);
    }

    #[tokio::test]
    async fn test_install_status_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir, None);
        assert_eq!(manager.status(Utc::now()), CookieStatus::None);
        assert_eq!(manager.active_path(), None);

        manager.install(SAMPLE).await.unwrap();
        let path = manager.active_path().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), SAMPLE);

        let before_expiry = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert!(matches!(manager.status(before_expiry), CookieStatus::Active(_)));
        let after_expiry = Utc.timestamp_opt(1_900_000_000, 0).unwrap();
        let status = manager.status(after_expiry);
        assert!(matches!(status, CookieStatus::Expired(_)));
        assert!(status.describe().contains("/setcookies"));

        assert!(manager.remove().await.unwrap());
        assert!(!path.exists());
        assert!(!manager.remove().await.unwrap());
    }

    #[tokio::test]
    async fn test_fallback_file_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = PathBuf::from("/etc/songbot/cookies.txt");
        let manager = manager(&dir, Some(fallback.clone()));
        assert_eq!(manager.active_path(), Some(fallback.clone()));
        assert_eq!(manager.status(Utc::now()), CookieStatus::ConfiguredFile(fallback));

        manager.install(SAMPLE).await.unwrap();
        std::fs::remove_file(dir.path().join("cookies.txt")).unwrap();
        manager.restore().await.unwrap();
        assert_eq!(manager.active_path(), Some(dir.path().join("cookies.txt")));
    }
}
