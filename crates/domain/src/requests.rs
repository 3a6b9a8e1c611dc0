use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::DomainResult;
use crate::clock::Clock;
use crate::deleted::DeletedAccountCache;
use crate::directory::DirectoryService;
use crate::gateway::PlatformGateway;
use crate::merge::SanctionMerger;
use crate::ports::propagation::PropagationRepository;
use crate::ports::requests::UnbanRequestRepository;
use crate::templates::MessageTemplates;
use crate::util::uuid_v7_without_dashes;

/// A removal request that already passed vetting. Folding it into the merge
/// model as a tag-clearing action lets the normal expect-unban policy branch
/// lift system bans community by community.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnbanRequest {
    pub request_id: String,
    pub handle: String,
    pub requested_at_ms: i64,
    pub handled_at_ms: Option<i64>,
}

impl UnbanRequest {
    pub fn new(handle: impl Into<String>, requested_at_ms: i64) -> Self {
        Self {
            request_id: uuid_v7_without_dashes(),
            handle: handle.into(),
            requested_at_ms,
            handled_at_ms: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
pub struct RequestSummary {
    pub handled: usize,
    pub cleared: usize,
}

pub struct UnbanRequestService {
    repository: Arc<dyn UnbanRequestRepository>,
    directory: DirectoryService,
    merger: SanctionMerger,
    propagation: Arc<dyn PropagationRepository>,
    gateway: Arc<PlatformGateway>,
    deleted: Arc<DeletedAccountCache>,
    templates: Arc<MessageTemplates>,
    clock: Arc<dyn Clock>,
}

impl UnbanRequestService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: Arc<dyn UnbanRequestRepository>,
        directory: DirectoryService,
        merger: SanctionMerger,
        propagation: Arc<dyn PropagationRepository>,
        gateway: Arc<PlatformGateway>,
        deleted: Arc<DeletedAccountCache>,
        templates: Arc<MessageTemplates>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            directory,
            merger,
            propagation,
            gateway,
            deleted,
            templates,
            clock,
        }
    }

    pub async fn process_pending(&self, limit: usize) -> DomainResult<RequestSummary> {
        let mut summary = RequestSummary::default();
        for request in self.repository.pending(limit).await? {
            let now = self.clock.now_ms();
            if let Some(person) = self.directory.find_person(&request.handle).await? {
                if let Some(person_id) = self.merger.clear_tags(&person.person_id, now).await? {
                    self.propagation.mark_dirty(&person_id).await?;
                    summary.cleared += 1;
                    info!(handle = %request.handle, "unban request cleared active tags");
                }
            }
            self.repository.mark_handled(&request.request_id, now).await?;

            if !self.deleted.is_deleted(&request.handle).await? {
                let title = self.templates.render("unban_request_ack_title", &[])?;
                let body = self.templates.render(
                    "unban_request_ack_body",
                    &[("handle", request.handle.as_str())],
                )?;
                self.gateway
                    .notify_user(&request.handle, &title, &body)
                    .await?;
            }
            summary.handled += 1;
        }
        Ok(summary)
    }
}
