use thiserror::Error;

use super::BoxFuture;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("rate limited")]
    RateLimited,
    #[error("session expired")]
    SessionExpired,
    #[error("rejected by platform: {0}")]
    Rejected(String),
}

impl PlatformError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited | Self::SessionExpired
        )
    }

    pub fn needs_reauth(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }
}

/// One moderation-log line, decoded once at the platform boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub external_id: String,
    pub community: String,
    pub moderator: String,
    /// Platform timestamps arrive in whole seconds.
    pub occurred_at_s: i64,
    pub kind: LogEntryKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogEntryKind {
    Ban {
        target: String,
        reason: String,
        details: String,
        permanent: bool,
    },
    Unban {
        target: String,
    },
    Other,
}

#[derive(Clone, Debug, Default)]
pub struct LogPage {
    pub entries: Vec<LogEntry>,
    pub has_more: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BanOrder {
    pub community: String,
    pub handle: String,
    pub message: String,
    pub reason_code: String,
    pub note: String,
}

pub trait PlatformClient: Send + Sync {
    fn ensure_session(&self) -> BoxFuture<'_, Result<(), PlatformError>>;

    fn moderated_communities(&self) -> BoxFuture<'_, Result<Vec<String>, PlatformError>>;

    /// Page of entries strictly older than `cursor`, newest first.
    /// `None` starts from the most recent entry.
    fn log_page_before(
        &self,
        community: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> BoxFuture<'_, Result<LogPage, PlatformError>>;

    /// Page of entries strictly newer than `cursor`, oldest first.
    /// `None` starts from the oldest entry.
    fn log_page_after(
        &self,
        community: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> BoxFuture<'_, Result<LogPage, PlatformError>>;

    fn ban(&self, order: &BanOrder) -> BoxFuture<'_, Result<(), PlatformError>>;

    fn unban(&self, community: &str, handle: &str) -> BoxFuture<'_, Result<(), PlatformError>>;

    fn notify_moderators(
        &self,
        community: &str,
        title: &str,
        body: &str,
    ) -> BoxFuture<'_, Result<(), PlatformError>>;

    fn notify_user(
        &self,
        handle: &str,
        title: &str,
        body: &str,
    ) -> BoxFuture<'_, Result<(), PlatformError>>;

    fn account_exists(&self, handle: &str) -> BoxFuture<'_, Result<bool, PlatformError>>;
}

pub trait LegacyListSource: Send + Sync {
    fn fetch(&self) -> BoxFuture<'_, Result<String, PlatformError>>;
}
