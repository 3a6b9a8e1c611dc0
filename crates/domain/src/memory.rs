//! In-memory reference implementations: the backing store used by the
//! memory backend and by tests, plus a scriptable platform fake.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::DomainResult;
use crate::directory::{Community, Person, PolicyTag, Subscription};
use crate::error::DomainError;
use crate::history::{BanRecord, ModerationEvent, SanctionRecord, UnbanRecord};
use crate::merge::{ActionSnapshot, MergeCursor, SanctionAttachment};
use crate::ports::BoxFuture;
use crate::ports::actions::ActionRepository;
use crate::ports::directory::DirectoryRepository;
use crate::ports::history::HistoryRepository;
use crate::ports::platform::{
    BanOrder, LegacyListSource, LogEntry, LogPage, PlatformClient, PlatformError,
};
use crate::ports::propagation::PropagationRepository;
use crate::ports::requests::UnbanRequestRepository;
use crate::ports::scan::ScanRepository;
use crate::requests::UnbanRequest;
use crate::scanner::ScanProgress;
use crate::scheduler::PropagationProgress;
use crate::templates::REQUIRED_TEMPLATES;

#[derive(Clone, Debug)]
struct StoredAction {
    snapshot: ActionSnapshot,
}

#[derive(Default)]
struct StoreState {
    communities: HashMap<String, Community>,
    persons: HashMap<String, Person>,
    tags: HashMap<String, PolicyTag>,
    subscriptions: Vec<Subscription>,
    events: HashMap<String, ModerationEvent>,
    events_by_external: HashMap<String, String>,
    bans: HashMap<String, BanRecord>,
    bans_by_event: HashMap<String, String>,
    unbans: HashMap<String, UnbanRecord>,
    unbans_by_event: HashMap<String, String>,
    scan_progress: HashMap<String, ScanProgress>,
    action_logs: HashMap<String, Vec<StoredAction>>,
    actions_by_id: HashMap<String, String>,
    merge_cursor: MergeCursor,
    propagation: HashMap<(String, String), PropagationProgress>,
    tie_sets: HashMap<(String, String), Vec<String>>,
    dirty: BTreeSet<String>,
    requests: HashMap<String, UnbanRequest>,
}

/// One store implementing every repository port. Per-call commits, no
/// transactions: the single-writer assumption holds because exactly one
/// worker owns the store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<StoreState>>,
}

impl MemoryStore {
    /// Test helper: length of a person's append-only action log.
    pub async fn action_log_len(&self, person_id: &str) -> usize {
        self.inner
            .read()
            .await
            .action_logs
            .get(person_id)
            .map_or(0, Vec::len)
    }

    /// Test helper: how many actions carry `is_latest` for the person.
    pub async fn latest_flag_count(&self, person_id: &str) -> usize {
        self.inner
            .read()
            .await
            .action_logs
            .get(person_id)
            .map_or(0, |log| {
                log.iter()
                    .filter(|stored| stored.snapshot.action.is_latest)
                    .count()
            })
    }
}

impl DirectoryRepository for MemoryStore {
    fn community_by_id(
        &self,
        community_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Community>>> {
        let community_id = community_id.to_string();
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.read().await.communities.get(&community_id).cloned()) })
    }

    fn community_by_name(&self, name: &str) -> BoxFuture<'_, DomainResult<Option<Community>>> {
        let name = name.to_string();
        let inner = self.inner.clone();
        Box::pin(async move {
            Ok(inner
                .read()
                .await
                .communities
                .values()
                .find(|community| community.name == name)
                .cloned())
        })
    }

    fn list_communities(&self) -> BoxFuture<'_, DomainResult<Vec<Community>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut rows: Vec<Community> =
                inner.read().await.communities.values().cloned().collect();
            rows.sort_by(|left, right| left.name.cmp(&right.name));
            Ok(rows)
        })
    }

    fn upsert_community(&self, community: &Community) -> BoxFuture<'_, DomainResult<Community>> {
        let community = community.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            inner
                .write()
                .await
                .communities
                .insert(community.community_id.clone(), community.clone());
            Ok(community)
        })
    }

    fn person_by_id(&self, person_id: &str) -> BoxFuture<'_, DomainResult<Option<Person>>> {
        let person_id = person_id.to_string();
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.read().await.persons.get(&person_id).cloned()) })
    }

    fn person_by_handle(&self, handle: &str) -> BoxFuture<'_, DomainResult<Option<Person>>> {
        let handle = handle.to_string();
        let inner = self.inner.clone();
        Box::pin(async move {
            Ok(inner
                .read()
                .await
                .persons
                .values()
                .find(|person| person.handle == handle)
                .cloned())
        })
    }

    fn insert_person(&self, person: &Person) -> BoxFuture<'_, DomainResult<Person>> {
        let person = person.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.write().await;
            if state
                .persons
                .values()
                .any(|existing| existing.handle == person.handle)
            {
                return Err(DomainError::Conflict);
            }
            state.persons.insert(person.person_id.clone(), person.clone());
            Ok(person)
        })
    }

    fn tag_by_text(&self, tag: &str) -> BoxFuture<'_, DomainResult<Option<PolicyTag>>> {
        let tag = tag.to_string();
        let inner = self.inner.clone();
        Box::pin(async move {
            Ok(inner
                .read()
                .await
                .tags
                .values()
                .find(|existing| existing.tag == tag)
                .cloned())
        })
    }

    fn list_tags(&self) -> BoxFuture<'_, DomainResult<Vec<PolicyTag>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut rows: Vec<PolicyTag> = inner.read().await.tags.values().cloned().collect();
            rows.sort_by(|left, right| left.tag.cmp(&right.tag));
            Ok(rows)
        })
    }

    fn insert_tag(&self, tag: &PolicyTag) -> BoxFuture<'_, DomainResult<PolicyTag>> {
        let tag = tag.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            inner
                .write()
                .await
                .tags
                .insert(tag.tag_id.clone(), tag.clone());
            Ok(tag)
        })
    }

    fn subscription(
        &self,
        community_id: &str,
        tag_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Subscription>>> {
        let community_id = community_id.to_string();
        let tag_id = tag_id.to_string();
        let inner = self.inner.clone();
        Box::pin(async move {
            Ok(inner
                .read()
                .await
                .subscriptions
                .iter()
                .find(|row| row.community_id == community_id && row.tag_id == tag_id)
                .cloned())
        })
    }

    fn upsert_subscription(
        &self,
        subscription: &Subscription,
    ) -> BoxFuture<'_, DomainResult<Subscription>> {
        let subscription = subscription.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.write().await;
            if let Some(row) = state.subscriptions.iter_mut().find(|row| {
                row.community_id == subscription.community_id && row.tag_id == subscription.tag_id
            }) {
                *row = subscription.clone();
            } else {
                state.subscriptions.push(subscription.clone());
            }
            Ok(subscription)
        })
    }

    fn subscribed_tags(&self, community_id: &str) -> BoxFuture<'_, DomainResult<Vec<PolicyTag>>> {
        let community_id = community_id.to_string();
        let inner = self.inner.clone();
        Box::pin(async move {
            let state = inner.read().await;
            let mut rows: Vec<PolicyTag> = state
                .subscriptions
                .iter()
                .filter(|row| row.community_id == community_id && row.is_active())
                .filter_map(|row| state.tags.get(&row.tag_id).cloned())
                .collect();
            rows.sort_by(|left, right| left.tag.cmp(&right.tag));
            Ok(rows)
        })
    }
}

impl HistoryRepository for MemoryStore {
    fn event_by_id(&self, event_id: &str) -> BoxFuture<'_, DomainResult<Option<ModerationEvent>>> {
        let event_id = event_id.to_string();
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.read().await.events.get(&event_id).cloned()) })
    }

    fn event_by_external_id(
        &self,
        external_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ModerationEvent>>> {
        let external_id = external_id.to_string();
        let inner = self.inner.clone();
        Box::pin(async move {
            let state = inner.read().await;
            let Some(event_id) = state.events_by_external.get(&external_id) else {
                return Ok(None);
            };
            Ok(state.events.get(event_id).cloned())
        })
    }

    fn insert_event(
        &self,
        event: &ModerationEvent,
    ) -> BoxFuture<'_, DomainResult<ModerationEvent>> {
        let event = event.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.write().await;
            if state.events_by_external.contains_key(&event.external_id) {
                return Err(DomainError::Conflict);
            }
            state
                .events_by_external
                .insert(event.external_id.clone(), event.event_id.clone());
            state.events.insert(event.event_id.clone(), event.clone());
            Ok(event)
        })
    }

    fn insert_ban(&self, ban: &BanRecord) -> BoxFuture<'_, DomainResult<BanRecord>> {
        let ban = ban.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.write().await;
            if state.bans_by_event.contains_key(&ban.event_id)
                || state.unbans_by_event.contains_key(&ban.event_id)
            {
                return Err(DomainError::Conflict);
            }
            state
                .bans_by_event
                .insert(ban.event_id.clone(), ban.ban_id.clone());
            state.bans.insert(ban.ban_id.clone(), ban.clone());
            Ok(ban)
        })
    }

    fn insert_unban(&self, unban: &UnbanRecord) -> BoxFuture<'_, DomainResult<UnbanRecord>> {
        let unban = unban.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.write().await;
            if state.unbans_by_event.contains_key(&unban.event_id)
                || state.bans_by_event.contains_key(&unban.event_id)
            {
                return Err(DomainError::Conflict);
            }
            state
                .unbans_by_event
                .insert(unban.event_id.clone(), unban.unban_id.clone());
            state.unbans.insert(unban.unban_id.clone(), unban.clone());
            Ok(unban)
        })
    }

    fn ban_for_event(&self, event_id: &str) -> BoxFuture<'_, DomainResult<Option<BanRecord>>> {
        let event_id = event_id.to_string();
        let inner = self.inner.clone();
        Box::pin(async move {
            let state = inner.read().await;
            Ok(state
                .bans_by_event
                .get(&event_id)
                .and_then(|ban_id| state.bans.get(ban_id))
                .cloned())
        })
    }

    fn unban_for_event(
        &self,
        event_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<UnbanRecord>>> {
        let event_id = event_id.to_string();
        let inner = self.inner.clone();
        Box::pin(async move {
            let state = inner.read().await;
            Ok(state
                .unbans_by_event
                .get(&event_id)
                .and_then(|unban_id| state.unbans.get(unban_id))
                .cloned())
        })
    }

    fn latest_ban_at_or_before(
        &self,
        person_id: &str,
        community_id: &str,
        at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Option<BanRecord>>> {
        let person_id = person_id.to_string();
        let community_id = community_id.to_string();
        let inner = self.inner.clone();
        Box::pin(async move {
            Ok(inner
                .read()
                .await
                .bans
                .values()
                .filter(|ban| {
                    ban.person_id == person_id
                        && ban.community_id == community_id
                        && ban.banned_at_ms <= at_ms
                })
                .max_by(|left, right| {
                    left.banned_at_ms
                        .cmp(&right.banned_at_ms)
                        .then_with(|| left.ban_id.cmp(&right.ban_id))
                })
                .cloned())
        })
    }

    fn latest_unban_at_or_before(
        &self,
        person_id: &str,
        community_id: &str,
        at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Option<UnbanRecord>>> {
        let person_id = person_id.to_string();
        let community_id = community_id.to_string();
        let inner = self.inner.clone();
        Box::pin(async move {
            Ok(inner
                .read()
                .await
                .unbans
                .values()
                .filter(|unban| {
                    unban.person_id == person_id
                        && unban.community_id == community_id
                        && unban.unbanned_at_ms <= at_ms
                })
                .max_by(|left, right| {
                    left.unbanned_at_ms
                        .cmp(&right.unbanned_at_ms)
                        .then_with(|| left.unban_id.cmp(&right.unban_id))
                })
                .cloned())
        })
    }

    fn bans_for_person_in_community(
        &self,
        person_id: &str,
        community_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<BanRecord>>> {
        let person_id = person_id.to_string();
        let community_id = community_id.to_string();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut rows: Vec<BanRecord> = inner
                .read()
                .await
                .bans
                .values()
                .filter(|ban| ban.person_id == person_id && ban.community_id == community_id)
                .cloned()
                .collect();
            rows.sort_by(|left, right| {
                left.banned_at_ms
                    .cmp(&right.banned_at_ms)
                    .then_with(|| left.ban_id.cmp(&right.ban_id))
            });
            Ok(rows)
        })
    }

    fn events_for_community_at_or_after(
        &self,
        community_id: &str,
        at_ms: i64,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<ModerationEvent>>> {
        let community_id = community_id.to_string();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut rows: Vec<ModerationEvent> = inner
                .read()
                .await
                .events
                .values()
                .filter(|event| {
                    event.community_id == community_id && event.occurred_at_ms >= at_ms
                })
                .cloned()
                .collect();
            rows.sort_by(|left, right| {
                left.occurred_at_ms
                    .cmp(&right.occurred_at_ms)
                    .then_with(|| left.event_id.cmp(&right.event_id))
            });
            rows.truncate(limit);
            Ok(rows)
        })
    }

    fn sanction_records_at_or_after(
        &self,
        at_ms: i64,
        community_ids: &[String],
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<SanctionRecord>>> {
        let community_ids = community_ids.to_vec();
        let inner = self.inner.clone();
        Box::pin(async move {
            let state = inner.read().await;
            let mut rows: Vec<SanctionRecord> = state
                .bans
                .values()
                .filter(|ban| {
                    ban.banned_at_ms >= at_ms && community_ids.contains(&ban.community_id)
                })
                .cloned()
                .map(SanctionRecord::Ban)
                .chain(
                    state
                        .unbans
                        .values()
                        .filter(|unban| {
                            unban.unbanned_at_ms >= at_ms
                                && community_ids.contains(&unban.community_id)
                        })
                        .cloned()
                        .map(SanctionRecord::Unban),
                )
                .collect();
            rows.sort_by(|left, right| {
                left.occurred_at_ms()
                    .cmp(&right.occurred_at_ms())
                    .then_with(|| left.event_id().cmp(right.event_id()))
            });
            rows.truncate(limit);
            Ok(rows)
        })
    }
}

impl ScanRepository for MemoryStore {
    fn progress_for(
        &self,
        community_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ScanProgress>>> {
        let community_id = community_id.to_string();
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.read().await.scan_progress.get(&community_id).cloned()) })
    }

    fn save_progress(&self, progress: &ScanProgress) -> BoxFuture<'_, DomainResult<()>> {
        let progress = progress.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            inner
                .write()
                .await
                .scan_progress
                .insert(progress.community_id.clone(), progress);
            Ok(())
        })
    }
}

impl ActionRepository for MemoryStore {
    fn latest_for_person(
        &self,
        person_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ActionSnapshot>>> {
        let person_id = person_id.to_string();
        let inner = self.inner.clone();
        Box::pin(async move {
            Ok(inner
                .read()
                .await
                .action_logs
                .get(&person_id)
                .and_then(|log| log.last())
                .filter(|stored| stored.snapshot.action.is_latest)
                .map(|stored| stored.snapshot.clone()))
        })
    }

    fn append_latest(
        &self,
        snapshot: &ActionSnapshot,
    ) -> BoxFuture<'_, DomainResult<ActionSnapshot>> {
        let snapshot = snapshot.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            if !snapshot.action.is_latest {
                return Err(DomainError::Validation(
                    "appended action must be the new head".into(),
                ));
            }
            let mut state = inner.write().await;
            state.actions_by_id.insert(
                snapshot.action.action_id.clone(),
                snapshot.action.person_id.clone(),
            );
            let log = state
                .action_logs
                .entry(snapshot.action.person_id.clone())
                .or_default();
            // head swap: the previous latest loses its flag in the same step
            for stored in log.iter_mut() {
                stored.snapshot.action.is_latest = false;
            }
            log.push(StoredAction {
                snapshot: snapshot.clone(),
            });
            Ok(snapshot)
        })
    }

    fn attach(
        &self,
        action_id: &str,
        community_id: &str,
        attachment: &SanctionAttachment,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let action_id = action_id.to_string();
        let community_id = community_id.to_string();
        let attachment = attachment.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.write().await;
            let person_id = state
                .actions_by_id
                .get(&action_id)
                .cloned()
                .ok_or(DomainError::NotFound)?;
            let stored = state
                .action_logs
                .get_mut(&person_id)
                .and_then(|log| {
                    log.iter_mut()
                        .find(|stored| stored.snapshot.action.action_id == action_id)
                })
                .ok_or(DomainError::NotFound)?;
            stored.snapshot.attachments.insert(community_id, attachment);
            Ok(())
        })
    }

    fn detach(&self, action_id: &str, community_id: &str) -> BoxFuture<'_, DomainResult<()>> {
        let action_id = action_id.to_string();
        let community_id = community_id.to_string();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.write().await;
            let person_id = state
                .actions_by_id
                .get(&action_id)
                .cloned()
                .ok_or(DomainError::NotFound)?;
            let stored = state
                .action_logs
                .get_mut(&person_id)
                .and_then(|log| {
                    log.iter_mut()
                        .find(|stored| stored.snapshot.action.action_id == action_id)
                })
                .ok_or(DomainError::NotFound)?;
            stored.snapshot.attachments.remove(&community_id);
            Ok(())
        })
    }

    fn merge_cursor(&self) -> BoxFuture<'_, DomainResult<MergeCursor>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.read().await.merge_cursor.clone()) })
    }

    fn save_merge_cursor(&self, cursor: &MergeCursor) -> BoxFuture<'_, DomainResult<()>> {
        let cursor = cursor.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.write().await.merge_cursor = cursor;
            Ok(())
        })
    }
}

impl PropagationRepository for MemoryStore {
    fn pair_progress(
        &self,
        target_community_id: &str,
        source_community_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<PropagationProgress>>> {
        let key = (
            target_community_id.to_string(),
            source_community_id.to_string(),
        );
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.read().await.propagation.get(&key).cloned()) })
    }

    fn save_pair_progress(
        &self,
        progress: &PropagationProgress,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let progress = progress.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.write().await.propagation.insert(
                (
                    progress.target_community_id.clone(),
                    progress.source_community_id.clone(),
                ),
                progress,
            );
            Ok(())
        })
    }

    fn tie_set(
        &self,
        target_community_id: &str,
        source_community_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<String>>> {
        let key = (
            target_community_id.to_string(),
            source_community_id.to_string(),
        );
        let inner = self.inner.clone();
        Box::pin(async move {
            Ok(inner
                .read()
                .await
                .tie_sets
                .get(&key)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn add_to_tie_set(
        &self,
        target_community_id: &str,
        source_community_id: &str,
        event_id: &str,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let key = (
            target_community_id.to_string(),
            source_community_id.to_string(),
        );
        let event_id = event_id.to_string();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.write().await;
            let tie = state.tie_sets.entry(key).or_default();
            if !tie.contains(&event_id) {
                tie.push(event_id);
            }
            Ok(())
        })
    }

    fn clear_tie_set(
        &self,
        target_community_id: &str,
        source_community_id: &str,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let key = (
            target_community_id.to_string(),
            source_community_id.to_string(),
        );
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.write().await.tie_sets.remove(&key);
            Ok(())
        })
    }

    fn mark_dirty(&self, person_id: &str) -> BoxFuture<'_, DomainResult<()>> {
        let person_id = person_id.to_string();
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.write().await.dirty.insert(person_id);
            Ok(())
        })
    }

    fn dirty_persons(&self, limit: usize) -> BoxFuture<'_, DomainResult<Vec<String>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            Ok(inner
                .read()
                .await
                .dirty
                .iter()
                .take(limit)
                .cloned()
                .collect())
        })
    }

    fn clear_dirty(&self, person_id: &str) -> BoxFuture<'_, DomainResult<()>> {
        let person_id = person_id.to_string();
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.write().await.dirty.remove(&person_id);
            Ok(())
        })
    }
}

impl UnbanRequestRepository for MemoryStore {
    fn insert(&self, request: &UnbanRequest) -> BoxFuture<'_, DomainResult<UnbanRequest>> {
        let request = request.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.write().await;
            if state.requests.contains_key(&request.request_id) {
                return Err(DomainError::Conflict);
            }
            state
                .requests
                .insert(request.request_id.clone(), request.clone());
            Ok(request)
        })
    }

    fn pending(&self, limit: usize) -> BoxFuture<'_, DomainResult<Vec<UnbanRequest>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut rows: Vec<UnbanRequest> = inner
                .read()
                .await
                .requests
                .values()
                .filter(|request| request.handled_at_ms.is_none())
                .cloned()
                .collect();
            rows.sort_by(|left, right| {
                left.requested_at_ms
                    .cmp(&right.requested_at_ms)
                    .then_with(|| left.request_id.cmp(&right.request_id))
            });
            rows.truncate(limit);
            Ok(rows)
        })
    }

    fn mark_handled(
        &self,
        request_id: &str,
        handled_at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let request_id = request_id.to_string();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.write().await;
            let request = state
                .requests
                .get_mut(&request_id)
                .ok_or(DomainError::NotFound)?;
            request.handled_at_ms = Some(handled_at_ms);
            Ok(())
        })
    }
}

/// Writes a platform fake has received, in call order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlatformWrite {
    Ban {
        community: String,
        handle: String,
        note: String,
    },
    Unban {
        community: String,
        handle: String,
    },
    ModNotice {
        community: String,
        title: String,
        body: String,
    },
    UserNotice {
        handle: String,
        title: String,
        body: String,
    },
}

#[derive(Default)]
struct FakePlatformState {
    moderated: Vec<String>,
    logs: HashMap<String, Vec<LogEntry>>,
    missing_accounts: BTreeSet<String>,
    writes: Vec<PlatformWrite>,
    faults: VecDeque<PlatformError>,
    session_calls: usize,
    exists_queries: usize,
}

/// Scriptable platform stand-in for tests and the memory backend: logs are
/// seeded per community, writes are captured, transient faults can be
/// queued to exercise the retry path.
#[derive(Default)]
pub struct FakePlatform {
    state: Arc<RwLock<FakePlatformState>>,
}

impl FakePlatform {
    pub async fn set_moderated(&self, names: Vec<String>) {
        self.state.write().await.moderated = names;
    }

    pub async fn add_log_entry(&self, entry: LogEntry) {
        let mut state = self.state.write().await;
        let log = state.logs.entry(entry.community.clone()).or_default();
        log.push(entry);
        log.sort_by(|left, right| {
            left.occurred_at_s
                .cmp(&right.occurred_at_s)
                .then_with(|| left.external_id.cmp(&right.external_id))
        });
    }

    pub async fn mark_missing(&self, handle: &str) {
        self.state
            .write()
            .await
            .missing_accounts
            .insert(handle.to_lowercase());
    }

    pub async fn push_fault(&self, fault: PlatformError) {
        self.state.write().await.faults.push_back(fault);
    }

    pub async fn writes(&self) -> Vec<PlatformWrite> {
        self.state.read().await.writes.clone()
    }

    pub async fn clear_writes(&self) {
        self.state.write().await.writes.clear();
    }

    pub async fn session_calls(&self) -> usize {
        self.state.read().await.session_calls
    }

    pub async fn exists_queries(&self) -> usize {
        self.state.read().await.exists_queries
    }

    async fn take_fault(&self) -> Option<PlatformError> {
        self.state.write().await.faults.pop_front()
    }
}

impl PlatformClient for FakePlatform {
    fn ensure_session(&self) -> BoxFuture<'_, Result<(), PlatformError>> {
        Box::pin(async move {
            if let Some(fault) = self.take_fault().await {
                return Err(fault);
            }
            self.state.write().await.session_calls += 1;
            Ok(())
        })
    }

    fn moderated_communities(&self) -> BoxFuture<'_, Result<Vec<String>, PlatformError>> {
        Box::pin(async move {
            if let Some(fault) = self.take_fault().await {
                return Err(fault);
            }
            Ok(self.state.read().await.moderated.clone())
        })
    }

    fn log_page_before(
        &self,
        community: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> BoxFuture<'_, Result<LogPage, PlatformError>> {
        let community = community.to_string();
        let cursor = cursor.map(str::to_string);
        Box::pin(async move {
            if let Some(fault) = self.take_fault().await {
                return Err(fault);
            }
            let state = self.state.read().await;
            let Some(log) = state.logs.get(&community) else {
                return Ok(LogPage::default());
            };
            let end = match cursor {
                Some(cursor) => match log
                    .iter()
                    .position(|entry| entry.external_id == cursor)
                {
                    Some(index) => index,
                    None => return Ok(LogPage::default()),
                },
                None => log.len(),
            };
            let start = end.saturating_sub(limit);
            let mut entries: Vec<LogEntry> = log[start..end].to_vec();
            entries.reverse();
            Ok(LogPage {
                entries,
                has_more: start > 0,
            })
        })
    }

    fn log_page_after(
        &self,
        community: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> BoxFuture<'_, Result<LogPage, PlatformError>> {
        let community = community.to_string();
        let cursor = cursor.map(str::to_string);
        Box::pin(async move {
            if let Some(fault) = self.take_fault().await {
                return Err(fault);
            }
            let state = self.state.read().await;
            let Some(log) = state.logs.get(&community) else {
                return Ok(LogPage::default());
            };
            let start = match cursor {
                Some(cursor) => match log
                    .iter()
                    .position(|entry| entry.external_id == cursor)
                {
                    Some(index) => index + 1,
                    None => return Ok(LogPage::default()),
                },
                None => 0,
            };
            let end = (start + limit).min(log.len());
            Ok(LogPage {
                entries: log[start..end].to_vec(),
                has_more: end < log.len(),
            })
        })
    }

    fn ban(&self, order: &BanOrder) -> BoxFuture<'_, Result<(), PlatformError>> {
        let order = order.clone();
        Box::pin(async move {
            if let Some(fault) = self.take_fault().await {
                return Err(fault);
            }
            self.state.write().await.writes.push(PlatformWrite::Ban {
                community: order.community,
                handle: order.handle,
                note: order.note,
            });
            Ok(())
        })
    }

    fn unban(&self, community: &str, handle: &str) -> BoxFuture<'_, Result<(), PlatformError>> {
        let community = community.to_string();
        let handle = handle.to_string();
        Box::pin(async move {
            if let Some(fault) = self.take_fault().await {
                return Err(fault);
            }
            self.state
                .write()
                .await
                .writes
                .push(PlatformWrite::Unban { community, handle });
            Ok(())
        })
    }

    fn notify_moderators(
        &self,
        community: &str,
        title: &str,
        body: &str,
    ) -> BoxFuture<'_, Result<(), PlatformError>> {
        let community = community.to_string();
        let title = title.to_string();
        let body = body.to_string();
        Box::pin(async move {
            if let Some(fault) = self.take_fault().await {
                return Err(fault);
            }
            self.state.write().await.writes.push(PlatformWrite::ModNotice {
                community,
                title,
                body,
            });
            Ok(())
        })
    }

    fn notify_user(
        &self,
        handle: &str,
        title: &str,
        body: &str,
    ) -> BoxFuture<'_, Result<(), PlatformError>> {
        let handle = handle.to_string();
        let title = title.to_string();
        let body = body.to_string();
        Box::pin(async move {
            if let Some(fault) = self.take_fault().await {
                return Err(fault);
            }
            self.state.write().await.writes.push(PlatformWrite::UserNotice {
                handle,
                title,
                body,
            });
            Ok(())
        })
    }

    fn account_exists(&self, handle: &str) -> BoxFuture<'_, Result<bool, PlatformError>> {
        let handle = handle.to_lowercase();
        Box::pin(async move {
            if let Some(fault) = self.take_fault().await {
                return Err(fault);
            }
            let mut state = self.state.write().await;
            state.exists_queries += 1;
            Ok(!state.missing_accounts.contains(&handle))
        })
    }
}

/// Legacy list source backed by a fixed string.
pub struct StaticLegacySource {
    text: String,
}

impl StaticLegacySource {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl LegacyListSource for StaticLegacySource {
    fn fetch(&self) -> BoxFuture<'_, Result<String, PlatformError>> {
        let text = self.text.clone();
        Box::pin(async move { Ok(text) })
    }
}

/// Built-in template set for the memory backend and tests.
pub fn default_templates() -> HashMap<String, String> {
    let mut templates = HashMap::new();
    templates.insert(
        "ban_message".to_string(),
        "You have been banned from this community under its shared scammer-list \
         policy ({tags}). If you believe this is a mistake you can request a \
         review."
            .to_string(),
    );
    templates.insert(
        "ban_note".to_string(),
        "shared list: {tags} via {origin} at {time}".to_string(),
    );
    templates.insert(
        "courtesy_title".to_string(),
        "Shared-list ban incoming for {handle}".to_string(),
    );
    templates.insert(
        "courtesy_body".to_string(),
        "{handle} matched the tags {tags} and will be banned here shortly."
            .to_string(),
    );
    templates.insert(
        "collision_title".to_string(),
        "Existing ban for {handle} collides with a shared-list action".to_string(),
    );
    templates.insert(
        "collision_body".to_string(),
        "{handle} was already banned here on {prior_time}, before the shared-list \
         action. Your ban has been left untouched."
            .to_string(),
    );
    templates.insert(
        "unban_overridden_title".to_string(),
        "Shared-list ban will override an unban of {handle}".to_string(),
    );
    templates.insert(
        "unban_overridden_body".to_string(),
        "{handle} was unbanned here on {unban_time} (closest prior ban: \
         {prior_time}), but a newer shared-list action requires a ban."
            .to_string(),
    );
    templates.insert(
        "ban_overridden_title".to_string(),
        "Shared-list unban for {handle}".to_string(),
    );
    templates.insert(
        "ban_overridden_body".to_string(),
        "The ban of {handle} from {ban_time} matched this community's subscribed \
         tags and has been lifted because the shared-list action was reversed."
            .to_string(),
    );
    templates.insert(
        "override_refused_title".to_string(),
        "Shared-list unban skipped for {handle}".to_string(),
    );
    templates.insert(
        "override_refused_body".to_string(),
        "The shared-list action for {handle} was reversed, but the local ban from \
         {ban_time} does not match this community's subscribed tags and was kept."
            .to_string(),
    );
    templates.insert(
        "lifted_title".to_string(),
        "Shared-list ban lifted for {handle}".to_string(),
    );
    templates.insert(
        "lifted_body".to_string(),
        "The shared-list ban of {handle} issued by this service has been lifted."
            .to_string(),
    );
    templates.insert(
        "unban_request_ack_title".to_string(),
        "Your removal request was processed".to_string(),
    );
    templates.insert(
        "unban_request_ack_body".to_string(),
        "The removal request for {handle} has been processed. Communities will be \
         updated over the next cycles."
            .to_string(),
    );
    debug_assert_eq!(templates.len(), REQUIRED_TEMPLATES.len());
    templates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::PolicyTag;
    use crate::merge::CanonicalAction;
    use crate::ports::platform::LogEntryKind;
    use crate::templates::MessageTemplates;

    fn entry(external_id: &str, at: i64) -> LogEntry {
        LogEntry {
            external_id: external_id.to_string(),
            community: "alpha".to_string(),
            moderator: "mod_one".to_string(),
            occurred_at_s: at,
            kind: LogEntryKind::Other,
        }
    }

    #[tokio::test]
    async fn fake_platform_pages_backward_newest_first() {
        let platform = FakePlatform::default();
        for (id, at) in [("e1", 10), ("e2", 20), ("e3", 30)] {
            platform.add_log_entry(entry(id, at)).await;
        }

        let page = platform.log_page_before("alpha", None, 2).await.unwrap();
        let ids: Vec<&str> = page
            .entries
            .iter()
            .map(|entry| entry.external_id.as_str())
            .collect();
        assert_eq!(ids, vec!["e3", "e2"]);
        assert!(page.has_more);

        let page = platform
            .log_page_before("alpha", Some("e2"), 2)
            .await
            .unwrap();
        let ids: Vec<&str> = page
            .entries
            .iter()
            .map(|entry| entry.external_id.as_str())
            .collect();
        assert_eq!(ids, vec!["e1"]);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn fake_platform_pages_forward_oldest_first() {
        let platform = FakePlatform::default();
        for (id, at) in [("e1", 10), ("e2", 20), ("e3", 30)] {
            platform.add_log_entry(entry(id, at)).await;
        }

        let page = platform
            .log_page_after("alpha", Some("e1"), 1)
            .await
            .unwrap();
        assert_eq!(page.entries[0].external_id, "e2");
        assert!(page.has_more);

        let page = platform
            .log_page_after("alpha", Some("e3"), 1)
            .await
            .unwrap();
        assert!(page.entries.is_empty());
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn append_latest_keeps_a_single_head() {
        let store = MemoryStore::default();
        for index in 0..3 {
            store
                .append_latest(&ActionSnapshot {
                    action: CanonicalAction {
                        action_id: format!("action-{index}"),
                        person_id: "person-1".to_string(),
                        occurred_at_ms: index * 100,
                        is_ban: true,
                        is_latest: true,
                    },
                    tags: vec![PolicyTag {
                        tag_id: "tag".to_string(),
                        tag: "fraud".to_string(),
                    }],
                    attachments: HashMap::new(),
                })
                .await
                .unwrap();
        }
        assert_eq!(store.action_log_len("person-1").await, 3);
        assert_eq!(store.latest_flag_count("person-1").await, 1);
        let latest = store
            .latest_for_person("person-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.action.action_id, "action-2");
    }

    #[tokio::test]
    async fn default_templates_satisfy_the_required_set() {
        assert!(MessageTemplates::load(default_templates()).is_ok());
    }
}
