use crate::DomainResult;
use crate::ports::BoxFuture;
use crate::scheduler::PropagationProgress;

pub trait PropagationRepository: Send + Sync {
    fn pair_progress(
        &self,
        target_community_id: &str,
        source_community_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<PropagationProgress>>>;

    fn save_pair_progress(
        &self,
        progress: &PropagationProgress,
    ) -> BoxFuture<'_, DomainResult<()>>;

    /// Event ids already handled at exactly the pair's watermark timestamp.
    fn tie_set(
        &self,
        target_community_id: &str,
        source_community_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<String>>>;

    fn add_to_tie_set(
        &self,
        target_community_id: &str,
        source_community_id: &str,
        event_id: &str,
    ) -> BoxFuture<'_, DomainResult<()>>;

    fn clear_tie_set(
        &self,
        target_community_id: &str,
        source_community_id: &str,
    ) -> BoxFuture<'_, DomainResult<()>>;

    fn mark_dirty(&self, person_id: &str) -> BoxFuture<'_, DomainResult<()>>;

    /// Dirty person ids in deterministic order, bounded by `limit`.
    fn dirty_persons(&self, limit: usize) -> BoxFuture<'_, DomainResult<Vec<String>>>;

    fn clear_dirty(&self, person_id: &str) -> BoxFuture<'_, DomainResult<()>>;
}
