use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::directory::{Community, DirectoryService};
use crate::error::DomainError;
use crate::ports::history::HistoryRepository;
use crate::ports::platform::{LogEntry, LogEntryKind};
use crate::util::uuid_v7_without_dashes;

/// One ingested moderation-log line. The external id is the idempotency key:
/// exactly one row per distinct external id, ever.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModerationEvent {
    pub event_id: String,
    pub external_id: String,
    pub community_id: String,
    pub occurred_at_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BanRecord {
    pub ban_id: String,
    pub event_id: String,
    pub community_id: String,
    pub moderator_person_id: String,
    pub person_id: String,
    pub reason: String,
    pub details: String,
    pub permanent: bool,
    pub banned_at_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnbanRecord {
    pub unban_id: String,
    pub event_id: String,
    pub community_id: String,
    pub moderator_person_id: String,
    pub person_id: String,
    pub unbanned_at_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SanctionRecord {
    Ban(BanRecord),
    Unban(UnbanRecord),
}

impl SanctionRecord {
    pub fn event_id(&self) -> &str {
        match self {
            Self::Ban(ban) => &ban.event_id,
            Self::Unban(unban) => &unban.event_id,
        }
    }

    pub fn person_id(&self) -> &str {
        match self {
            Self::Ban(ban) => &ban.person_id,
            Self::Unban(unban) => &unban.person_id,
        }
    }

    pub fn community_id(&self) -> &str {
        match self {
            Self::Ban(ban) => &ban.community_id,
            Self::Unban(unban) => &unban.community_id,
        }
    }

    pub fn occurred_at_ms(&self) -> i64 {
        match self {
            Self::Ban(ban) => ban.banned_at_ms,
            Self::Unban(unban) => unban.unbanned_at_ms,
        }
    }
}

/// Turns one decoded log entry into history, keyed purely by external id.
/// Safe under arbitrary replay order.
#[derive(Clone)]
pub struct Recorder {
    repository: Arc<dyn HistoryRepository>,
    directory: DirectoryService,
}

impl Recorder {
    pub fn new(repository: Arc<dyn HistoryRepository>, directory: DirectoryService) -> Self {
        Self {
            repository,
            directory,
        }
    }

    pub async fn record(
        &self,
        community: &Community,
        entry: &LogEntry,
    ) -> DomainResult<Option<SanctionRecord>> {
        if !entry.community.eq_ignore_ascii_case(&community.name) {
            return Err(DomainError::Integrity(format!(
                "log entry {} belongs to {} but was fed as {}",
                entry.external_id, entry.community, community.name
            )));
        }
        if self
            .repository
            .event_by_external_id(&entry.external_id)
            .await?
            .is_some()
        {
            return Ok(None);
        }

        let event = self
            .repository
            .insert_event(&ModerationEvent {
                event_id: uuid_v7_without_dashes(),
                external_id: entry.external_id.clone(),
                community_id: community.community_id.clone(),
                occurred_at_ms: entry.occurred_at_s * 1_000,
            })
            .await?;

        match &entry.kind {
            LogEntryKind::Ban {
                target,
                reason,
                details,
                permanent,
            } => {
                let person = self.directory.ensure_person(target).await?;
                let moderator = self.directory.ensure_person(&entry.moderator).await?;
                let ban = self
                    .repository
                    .insert_ban(&BanRecord {
                        ban_id: uuid_v7_without_dashes(),
                        event_id: event.event_id.clone(),
                        community_id: event.community_id.clone(),
                        moderator_person_id: moderator.person_id,
                        person_id: person.person_id,
                        reason: reason.clone(),
                        details: details.clone(),
                        permanent: *permanent,
                        banned_at_ms: event.occurred_at_ms,
                    })
                    .await?;
                Ok(Some(SanctionRecord::Ban(ban)))
            }
            LogEntryKind::Unban { target } => {
                let person = self.directory.ensure_person(target).await?;
                let moderator = self.directory.ensure_person(&entry.moderator).await?;
                let unban = self
                    .repository
                    .insert_unban(&UnbanRecord {
                        unban_id: uuid_v7_without_dashes(),
                        event_id: event.event_id.clone(),
                        community_id: event.community_id.clone(),
                        moderator_person_id: moderator.person_id,
                        person_id: person.person_id,
                        unbanned_at_ms: event.occurred_at_ms,
                    })
                    .await?;
                Ok(Some(SanctionRecord::Unban(unban)))
            }
            LogEntryKind::Other => Ok(None),
        }
    }
}
