use crate::DomainResult;
use crate::ports::BoxFuture;
use crate::requests::UnbanRequest;

pub trait UnbanRequestRepository: Send + Sync {
    fn insert(&self, request: &UnbanRequest) -> BoxFuture<'_, DomainResult<UnbanRequest>>;

    /// Unhandled requests, oldest first, bounded by `limit`.
    fn pending(&self, limit: usize) -> BoxFuture<'_, DomainResult<Vec<UnbanRequest>>>;

    fn mark_handled(
        &self,
        request_id: &str,
        handled_at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<()>>;
}
