use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::DomainResult;
use crate::clock::Clock;
use crate::deleted::DeletedAccountCache;
use crate::directory::{Community, Person, PolicyTag};
use crate::gateway::PlatformGateway;
use crate::history::SanctionRecord;
use crate::merge::ActionSnapshot;
use crate::error::DomainError;
use crate::ports::actions::ActionRepository;
use crate::ports::directory::DirectoryRepository;
use crate::ports::history::HistoryRepository;
use crate::ports::platform::BanOrder;
use crate::ports::propagation::PropagationRepository;
use crate::ports::scan::ScanRepository;
use crate::propagation::{ModNotice, PolicyContext, PropagationPlan, PropagationPolicy};
use crate::templates::MessageTemplates;
use crate::util::format_ms_rfc3339;

/// Watermark for one ordered (target, source) pair. Monotonically
/// non-decreasing; the same-timestamp tie set lives in the repository.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PropagationProgress {
    pub target_community_id: String,
    pub source_community_id: String,
    pub latest_propagated_at_ms: i64,
}

#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    pub batch_base: usize,
    pub batch_increment: usize,
    pub max_inspected_per_pair: usize,
    pub max_writes_per_pair: usize,
    pub dirty_sweep_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_base: 50,
            batch_increment: 50,
            max_inspected_per_pair: 200,
            max_writes_per_pair: 5,
            dirty_sweep_limit: 10,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
pub struct SchedulerSummary {
    pub pairs_visited: usize,
    pub pairs_skipped: usize,
    pub events_inspected: usize,
    pub plans_applied: usize,
    pub platform_writes: usize,
    pub dirty_swept: usize,
}

/// Applies one policy plan through the gateway: notices first, then at most
/// one ban or unban. Deleted accounts short-circuit every write.
pub struct PlanApplier {
    gateway: Arc<PlatformGateway>,
    deleted: Arc<DeletedAccountCache>,
    templates: Arc<MessageTemplates>,
}

impl PlanApplier {
    pub fn new(
        gateway: Arc<PlatformGateway>,
        deleted: Arc<DeletedAccountCache>,
        templates: Arc<MessageTemplates>,
    ) -> Self {
        Self {
            gateway,
            deleted,
            templates,
        }
    }

    pub async fn apply(
        &self,
        target: &Community,
        person: &Person,
        snapshot: &ActionSnapshot,
        plan: &PropagationPlan,
    ) -> DomainResult<usize> {
        if plan.is_empty() {
            return Ok(0);
        }
        if self.deleted.is_deleted(&person.handle).await? {
            debug!(handle = %person.handle, "account gone, skipping plan");
            return Ok(0);
        }

        let mut writes = 0;
        for notice in &plan.notices {
            let (title, body) = self.render_notice(person, plan, notice)?;
            self.gateway
                .notify_moderators(&target.name, &title, &body)
                .await?;
            writes += 1;
        }
        if let Some(directive) = &plan.ban {
            let tags = directive.tags.join(", ");
            let origin = directive.origin.render();
            let time = format_ms_rfc3339(snapshot.action.occurred_at_ms);
            let message = self.templates.render(
                "ban_message",
                &[("handle", person.handle.as_str()), ("tags", &tags), ("origin", &origin)],
            )?;
            let note = self.templates.render(
                "ban_note",
                &[("tags", &tags), ("origin", &origin), ("time", &time)],
            )?;
            self.gateway
                .ban(&BanOrder {
                    community: target.name.clone(),
                    handle: person.handle.clone(),
                    message,
                    reason_code: "other".to_string(),
                    note,
                })
                .await?;
            writes += 1;
        }
        if plan.unban {
            self.gateway.unban(&target.name, &person.handle).await?;
            writes += 1;
        }
        Ok(writes)
    }

    fn render_notice(
        &self,
        person: &Person,
        plan: &PropagationPlan,
        notice: &ModNotice,
    ) -> DomainResult<(String, String)> {
        let handle = person.handle.as_str();
        match notice {
            ModNotice::Courtesy => {
                let tags = plan
                    .ban
                    .as_ref()
                    .map(|directive| directive.tags.join(", "))
                    .unwrap_or_default();
                Ok((
                    self.templates
                        .render("courtesy_title", &[("handle", handle)])?,
                    self.templates
                        .render("courtesy_body", &[("handle", handle), ("tags", &tags)])?,
                ))
            }
            ModNotice::Collision { prior_ban_at_ms } => {
                let prior_time = format_ms_rfc3339(*prior_ban_at_ms);
                Ok((
                    self.templates
                        .render("collision_title", &[("handle", handle)])?,
                    self.templates.render(
                        "collision_body",
                        &[("handle", handle), ("prior_time", &prior_time)],
                    )?,
                ))
            }
            ModNotice::UnbanOverridden {
                unban_at_ms,
                prior_ban_at_ms,
            } => {
                let unban_time = format_ms_rfc3339(*unban_at_ms);
                let prior_time = prior_ban_at_ms
                    .map(format_ms_rfc3339)
                    .unwrap_or_else(|| "none on record".to_string());
                Ok((
                    self.templates
                        .render("unban_overridden_title", &[("handle", handle)])?,
                    self.templates.render(
                        "unban_overridden_body",
                        &[
                            ("handle", handle),
                            ("unban_time", &unban_time),
                            ("prior_time", &prior_time),
                        ],
                    )?,
                ))
            }
            ModNotice::BanOverridden { ban_at_ms } => {
                let ban_time = format_ms_rfc3339(*ban_at_ms);
                Ok((
                    self.templates
                        .render("ban_overridden_title", &[("handle", handle)])?,
                    self.templates.render(
                        "ban_overridden_body",
                        &[("handle", handle), ("ban_time", &ban_time)],
                    )?,
                ))
            }
            ModNotice::OverrideRefused { ban_at_ms } => {
                let ban_time = format_ms_rfc3339(*ban_at_ms);
                Ok((
                    self.templates
                        .render("override_refused_title", &[("handle", handle)])?,
                    self.templates.render(
                        "override_refused_body",
                        &[("handle", handle), ("ban_time", &ban_time)],
                    )?,
                ))
            }
            ModNotice::Lifted => Ok((
                self.templates.render("lifted_title", &[("handle", handle)])?,
                self.templates.render("lifted_body", &[("handle", handle)])?,
            )),
        }
    }
}

/// Replays every ordered (target, source) pair forward from its watermark,
/// then sweeps dirty persons. Bounded per tick so backlog drains over
/// several ticks without flooding the platform.
pub struct PropagationScheduler {
    policy: PropagationPolicy,
    directory: Arc<dyn DirectoryRepository>,
    history: Arc<dyn HistoryRepository>,
    actions: Arc<dyn ActionRepository>,
    scan: Arc<dyn ScanRepository>,
    progress: Arc<dyn PropagationRepository>,
    applier: PlanApplier,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl PropagationScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        policy: PropagationPolicy,
        directory: Arc<dyn DirectoryRepository>,
        history: Arc<dyn HistoryRepository>,
        actions: Arc<dyn ActionRepository>,
        scan: Arc<dyn ScanRepository>,
        progress: Arc<dyn PropagationRepository>,
        applier: PlanApplier,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            policy,
            directory,
            history,
            actions,
            scan,
            progress,
            applier,
            clock,
            config,
        }
    }

    pub async fn run_tick(&self) -> DomainResult<SchedulerSummary> {
        let mut roster: Vec<Community> = self
            .directory
            .list_communities()
            .await?
            .into_iter()
            .filter(|community| community.tracked)
            .collect();
        roster.sort_by(|left, right| left.name.cmp(&right.name));

        let mut subscriptions = HashMap::new();
        for community in &roster {
            subscriptions.insert(
                community.community_id.clone(),
                self.directory
                    .subscribed_tags(&community.community_id)
                    .await?,
            );
        }

        let mut summary = SchedulerSummary::default();
        // pair replay and the dirty sweep decide from the same latest
        // snapshots, so one application per (target, person) per tick is
        // enough
        let mut applied = HashSet::new();
        for target in &roster {
            for source in &roster {
                if target.community_id == source.community_id {
                    continue;
                }
                let trustworthy = self
                    .scan
                    .progress_for(&source.community_id)
                    .await?
                    .is_some_and(|progress| progress.last_full_history_ms.is_some());
                if !trustworthy {
                    summary.pairs_skipped += 1;
                    continue;
                }
                self.pair_tick(target, source, &roster, &subscriptions, &mut applied, &mut summary)
                    .await?;
            }
        }
        self.dirty_sweep(&roster, &subscriptions, &mut applied, &mut summary)
            .await?;
        Ok(summary)
    }

    async fn pair_tick(
        &self,
        target: &Community,
        source: &Community,
        roster: &[Community],
        subscriptions: &HashMap<String, Vec<PolicyTag>>,
        applied: &mut HashSet<(String, String)>,
        summary: &mut SchedulerSummary,
    ) -> DomainResult<()> {
        let mut progress = match self
            .progress
            .pair_progress(&target.community_id, &source.community_id)
            .await?
        {
            Some(progress) => progress,
            None => {
                // a new pair starts at the current time: only future actions
                // replay, never the whole backlog
                let progress = PropagationProgress {
                    target_community_id: target.community_id.clone(),
                    source_community_id: source.community_id.clone(),
                    latest_propagated_at_ms: self.clock.now_ms(),
                };
                self.progress.save_pair_progress(&progress).await?;
                progress
            }
        };

        let mut batch = self.config.batch_base;
        let mut inspected = 0usize;
        let mut writes = 0usize;
        'pair: loop {
            if inspected >= self.config.max_inspected_per_pair
                || writes >= self.config.max_writes_per_pair
            {
                break;
            }
            let tie = self
                .progress
                .tie_set(&target.community_id, &source.community_id)
                .await?;
            let events = self
                .history
                .events_for_community_at_or_after(
                    &source.community_id,
                    progress.latest_propagated_at_ms,
                    batch,
                )
                .await?;
            let fetched = events.len();
            let fresh: Vec<_> = events
                .into_iter()
                .filter(|event| !tie.contains(&event.event_id))
                .collect();
            if fresh.is_empty() {
                if fetched < batch {
                    break;
                }
                // a full batch of already-handled same-timestamp events:
                // widen the window to guarantee forward progress
                batch += self.config.batch_increment;
                continue;
            }
            for event in fresh {
                if inspected >= self.config.max_inspected_per_pair
                    || writes >= self.config.max_writes_per_pair
                {
                    break 'pair;
                }
                inspected += 1;
                let performed = self
                    .propagate_event(target, &event.event_id, roster, subscriptions, applied)
                    .await?;
                if performed > 0 {
                    writes += 1;
                    summary.plans_applied += 1;
                    summary.platform_writes += performed;
                }
                if event.occurred_at_ms > progress.latest_propagated_at_ms {
                    progress.latest_propagated_at_ms = event.occurred_at_ms;
                    self.progress
                        .clear_tie_set(&target.community_id, &source.community_id)
                        .await?;
                }
                self.progress
                    .add_to_tie_set(&target.community_id, &source.community_id, &event.event_id)
                    .await?;
                self.progress.save_pair_progress(&progress).await?;
            }
        }
        summary.events_inspected += inspected;
        summary.pairs_visited += 1;
        Ok(())
    }

    async fn propagate_event(
        &self,
        target: &Community,
        event_id: &str,
        roster: &[Community],
        subscriptions: &HashMap<String, Vec<PolicyTag>>,
        applied: &mut HashSet<(String, String)>,
    ) -> DomainResult<usize> {
        let record = if let Some(ban) = self.history.ban_for_event(event_id).await? {
            SanctionRecord::Ban(ban)
        } else if let Some(unban) = self.history.unban_for_event(event_id).await? {
            SanctionRecord::Unban(unban)
        } else {
            // other event kinds only advance the watermark
            return Ok(0);
        };
        let Some(snapshot) = self.actions.latest_for_person(record.person_id()).await? else {
            return Ok(0);
        };
        self.apply_for_target(target, &snapshot, roster, subscriptions, applied)
            .await
    }

    async fn apply_for_target(
        &self,
        target: &Community,
        snapshot: &ActionSnapshot,
        roster: &[Community],
        subscriptions: &HashMap<String, Vec<PolicyTag>>,
        applied: &mut HashSet<(String, String)>,
    ) -> DomainResult<usize> {
        let key = (
            target.community_id.clone(),
            snapshot.action.person_id.clone(),
        );
        if applied.contains(&key) {
            return Ok(0);
        }
        let person = self
            .directory
            .person_by_id(&snapshot.action.person_id)
            .await?
            .ok_or_else(|| {
                DomainError::Integrity(format!(
                    "person {} missing for canonical action {}",
                    snapshot.action.person_id, snapshot.action.action_id
                ))
            })?;
        let empty = Vec::new();
        let target_subscribed = subscriptions
            .get(&target.community_id)
            .unwrap_or(&empty);
        let prior_bans = self
            .history
            .bans_for_person_in_community(&person.person_id, &target.community_id)
            .await?;
        let plan = self.policy.decide(&PolicyContext {
            snapshot,
            person: &person,
            target,
            target_subscribed,
            communities: roster,
            subscriptions,
            target_prior_bans: &prior_bans,
        });
        if plan.is_empty() {
            return Ok(0);
        }
        applied.insert(key);
        self.applier.apply(target, &person, snapshot, &plan).await
    }

    /// Fan freshly merged (or event-less) actions out to every tracked
    /// community. Bounded by persons and by the per-tick write budget;
    /// persons left over stay dirty for the next tick.
    async fn dirty_sweep(
        &self,
        roster: &[Community],
        subscriptions: &HashMap<String, Vec<PolicyTag>>,
        applied: &mut HashSet<(String, String)>,
        summary: &mut SchedulerSummary,
    ) -> DomainResult<()> {
        let dirty = self
            .progress
            .dirty_persons(self.config.dirty_sweep_limit)
            .await?;
        let mut writes = 0usize;
        for person_id in dirty {
            if writes >= self.config.max_writes_per_pair {
                break;
            }
            if let Some(snapshot) = self.actions.latest_for_person(&person_id).await? {
                for target in roster {
                    let performed = self
                        .apply_for_target(target, &snapshot, roster, subscriptions, applied)
                        .await?;
                    if performed > 0 {
                        writes += 1;
                        summary.plans_applied += 1;
                        summary.platform_writes += performed;
                    }
                }
            }
            self.progress.clear_dirty(&person_id).await?;
            summary.dirty_swept += 1;
        }
        Ok(())
    }
}
