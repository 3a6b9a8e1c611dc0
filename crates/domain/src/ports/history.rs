use crate::DomainResult;
use crate::history::{BanRecord, ModerationEvent, SanctionRecord, UnbanRecord};
use crate::ports::BoxFuture;

pub trait HistoryRepository: Send + Sync {
    fn event_by_id(&self, event_id: &str) -> BoxFuture<'_, DomainResult<Option<ModerationEvent>>>;

    fn event_by_external_id(
        &self,
        external_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ModerationEvent>>>;

    fn insert_event(
        &self,
        event: &ModerationEvent,
    ) -> BoxFuture<'_, DomainResult<ModerationEvent>>;

    fn insert_ban(&self, ban: &BanRecord) -> BoxFuture<'_, DomainResult<BanRecord>>;

    fn insert_unban(&self, unban: &UnbanRecord) -> BoxFuture<'_, DomainResult<UnbanRecord>>;

    fn ban_for_event(&self, event_id: &str) -> BoxFuture<'_, DomainResult<Option<BanRecord>>>;

    fn unban_for_event(&self, event_id: &str)
    -> BoxFuture<'_, DomainResult<Option<UnbanRecord>>>;

    fn latest_ban_at_or_before(
        &self,
        person_id: &str,
        community_id: &str,
        at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Option<BanRecord>>>;

    fn latest_unban_at_or_before(
        &self,
        person_id: &str,
        community_id: &str,
        at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Option<UnbanRecord>>>;

    /// Every ban of the person in the community, oldest first.
    fn bans_for_person_in_community(
        &self,
        person_id: &str,
        community_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<BanRecord>>>;

    /// Events of one community at or after the timestamp, ordered by
    /// (occurred-at, event id), bounded by `limit`.
    fn events_for_community_at_or_after(
        &self,
        community_id: &str,
        at_ms: i64,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<ModerationEvent>>>;

    /// Ban/unban records across the given communities at or after the
    /// timestamp, ordered by (occurred-at, event id), bounded by `limit`.
    fn sanction_records_at_or_after(
        &self,
        at_ms: i64,
        community_ids: &[String],
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<SanctionRecord>>>;
}
