use crate::DomainResult;
use crate::ports::BoxFuture;
use crate::scanner::ScanProgress;

pub trait ScanRepository: Send + Sync {
    fn progress_for(
        &self,
        community_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ScanProgress>>>;

    fn save_progress(&self, progress: &ScanProgress) -> BoxFuture<'_, DomainResult<()>>;
}
