use crate::DomainResult;
use crate::merge::{ActionSnapshot, MergeCursor, SanctionAttachment};
use crate::ports::BoxFuture;

pub trait ActionRepository: Send + Sync {
    /// The person's `is_latest` canonical action, fully loaded (tags and
    /// per-community attachments included).
    fn latest_for_person(
        &self,
        person_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ActionSnapshot>>>;

    /// Append a new head to the person's action log, clearing the previous
    /// head's `is_latest` flag in the same operation.
    fn append_latest(
        &self,
        snapshot: &ActionSnapshot,
    ) -> BoxFuture<'_, DomainResult<ActionSnapshot>>;

    /// Replace the community's attachment slot on an existing action.
    fn attach(
        &self,
        action_id: &str,
        community_id: &str,
        attachment: &SanctionAttachment,
    ) -> BoxFuture<'_, DomainResult<()>>;

    fn detach(&self, action_id: &str, community_id: &str) -> BoxFuture<'_, DomainResult<()>>;

    fn merge_cursor(&self) -> BoxFuture<'_, DomainResult<MergeCursor>>;

    fn save_merge_cursor(&self, cursor: &MergeCursor) -> BoxFuture<'_, DomainResult<()>>;
}
