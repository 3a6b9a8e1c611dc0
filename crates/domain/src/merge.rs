use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::DomainResult;
use crate::directory::PolicyTag;
use crate::error::DomainError;
use crate::history::{BanRecord, ModerationEvent, SanctionRecord, UnbanRecord};
use crate::ports::actions::ActionRepository;
use crate::ports::directory::DirectoryRepository;
use crate::ports::history::HistoryRepository;
use crate::ports::propagation::PropagationRepository;
use crate::ports::scan::ScanRepository;
use crate::util::{contains_ignore_case, uuid_v7_without_dashes};

/// The single current record of why a person is sanctioned. One `is_latest`
/// head per person, ever.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalAction {
    pub action_id: String,
    pub person_id: String,
    pub occurred_at_ms: i64,
    /// False only for pure tag-removal actions (manual unban requests).
    pub is_ban: bool,
    pub is_latest: bool,
}

/// What is currently known to be true on one community for a canonical
/// action: its most relevant ban or unban, at most one per community.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SanctionAttachment {
    Ban(BanRecord),
    Unban(UnbanRecord),
}

impl SanctionAttachment {
    pub fn occurred_at_ms(&self) -> i64 {
        match self {
            Self::Ban(ban) => ban.banned_at_ms,
            Self::Unban(unban) => unban.unbanned_at_ms,
        }
    }

    pub fn moderator_person_id(&self) -> &str {
        match self {
            Self::Ban(ban) => &ban.moderator_person_id,
            Self::Unban(unban) => &unban.moderator_person_id,
        }
    }
}

/// A canonical action with its tags and per-community attachments loaded.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionSnapshot {
    pub action: CanonicalAction,
    pub tags: Vec<PolicyTag>,
    pub attachments: HashMap<String, SanctionAttachment>,
}

impl ActionSnapshot {
    pub fn has_tag(&self, tag_id: &str) -> bool {
        self.tags.iter().any(|tag| tag.tag_id == tag_id)
    }
}

/// Global merge watermark over recorded history, with the set of event ids
/// already folded at exactly the watermark timestamp.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeCursor {
    pub latest_merged_at_ms: i64,
    pub tie: Vec<String>,
}

impl MergeCursor {
    pub fn contains(&self, event_id: &str) -> bool {
        self.tie.iter().any(|id| id == event_id)
    }

    pub fn advance(&mut self, occurred_at_ms: i64, event_id: &str) {
        if occurred_at_ms > self.latest_merged_at_ms {
            self.latest_merged_at_ms = occurred_at_ms;
            self.tie.clear();
        }
        self.tie.push(event_id.to_string());
    }
}

/// Folds ban/unban history into canonical actions. Must be fed strictly in
/// increasing occurred-at order per affected person; the `MergeFeed` below
/// establishes that order globally.
#[derive(Clone)]
pub struct SanctionMerger {
    actions: Arc<dyn ActionRepository>,
    history: Arc<dyn HistoryRepository>,
    directory: Arc<dyn DirectoryRepository>,
    system_person_id: String,
}

impl SanctionMerger {
    pub fn new(
        actions: Arc<dyn ActionRepository>,
        history: Arc<dyn HistoryRepository>,
        directory: Arc<dyn DirectoryRepository>,
        system_person_id: impl Into<String>,
    ) -> Self {
        Self {
            actions,
            history,
            directory,
            system_person_id: system_person_id.into(),
        }
    }

    pub async fn process_ban(
        &self,
        tags: &[PolicyTag],
        event: &ModerationEvent,
        ban: &BanRecord,
    ) -> DomainResult<Vec<String>> {
        if !ban.permanent {
            return Ok(Vec::new());
        }
        let person = self
            .directory
            .person_by_id(&ban.person_id)
            .await?
            .ok_or_else(|| {
                DomainError::Integrity(format!("person {} missing for ban {}", ban.person_id, ban.ban_id))
            })?;
        if person.tombstoned {
            return Ok(Vec::new());
        }
        let community = self
            .directory
            .community_by_id(&event.community_id)
            .await?
            .ok_or_else(|| {
                DomainError::Integrity(format!(
                    "community {} missing for event {}",
                    event.community_id, event.event_id
                ))
            })?;

        // Read-only communities read the list; their bans cannot introduce
        // policy tags.
        let relevant: Vec<PolicyTag> = if community.read_only {
            Vec::new()
        } else {
            tags.iter()
                .filter(|tag| contains_ignore_case(&ban.reason, &tag.tag))
                .cloned()
                .collect()
        };

        match self.actions.latest_for_person(&ban.person_id).await? {
            None => {
                if relevant.is_empty() {
                    return Ok(Vec::new());
                }
                // Echoes of the system's own bans must not reintroduce tags.
                let attached_tags = if ban.moderator_person_id == self.system_person_id {
                    Vec::new()
                } else {
                    relevant
                };
                let mut attachments = HashMap::new();
                for other in self.directory.list_communities().await? {
                    if other.community_id == event.community_id {
                        continue;
                    }
                    if let Some(attachment) = self
                        .latest_sanction_at_or_before(
                            &ban.person_id,
                            &other.community_id,
                            ban.banned_at_ms,
                        )
                        .await?
                    {
                        attachments.insert(other.community_id.clone(), attachment);
                    }
                }
                attachments.insert(
                    event.community_id.clone(),
                    SanctionAttachment::Ban(ban.clone()),
                );
                self.actions
                    .append_latest(&ActionSnapshot {
                        action: CanonicalAction {
                            action_id: uuid_v7_without_dashes(),
                            person_id: ban.person_id.clone(),
                            occurred_at_ms: ban.banned_at_ms,
                            is_ban: true,
                            is_latest: true,
                        },
                        tags: attached_tags,
                        attachments,
                    })
                    .await?;
                Ok(vec![ban.person_id.clone()])
            }
            Some(snapshot) => {
                let have: HashSet<&str> =
                    snapshot.tags.iter().map(|tag| tag.tag_id.as_str()).collect();
                let contained = relevant.iter().all(|tag| have.contains(tag.tag_id.as_str()));
                if contained {
                    if let Some(SanctionAttachment::Ban(old)) =
                        snapshot.attachments.get(&event.community_id)
                    {
                        if old.banned_at_ms > ban.banned_at_ms {
                            return Err(DomainError::Ordering(format!(
                                "ban {} at {} would displace newer ban {} at {}",
                                ban.ban_id, ban.banned_at_ms, old.ban_id, old.banned_at_ms
                            )));
                        }
                    }
                    self.actions
                        .attach(
                            &snapshot.action.action_id,
                            &event.community_id,
                            &SanctionAttachment::Ban(ban.clone()),
                        )
                        .await?;
                    Ok(vec![ban.person_id.clone()])
                } else {
                    let mut tags_union = snapshot.tags.clone();
                    for tag in &relevant {
                        if !have.contains(tag.tag_id.as_str()) {
                            tags_union.push(tag.clone());
                        }
                    }
                    let mut attachments = snapshot.attachments.clone();
                    attachments.insert(
                        event.community_id.clone(),
                        SanctionAttachment::Ban(ban.clone()),
                    );
                    self.actions
                        .append_latest(&ActionSnapshot {
                            action: CanonicalAction {
                                action_id: uuid_v7_without_dashes(),
                                person_id: ban.person_id.clone(),
                                occurred_at_ms: ban.banned_at_ms,
                                is_ban: true,
                                is_latest: true,
                            },
                            tags: tags_union,
                            attachments,
                        })
                        .await?;
                    Ok(vec![ban.person_id.clone()])
                }
            }
        }
    }

    pub async fn process_unban(
        &self,
        _tags: &[PolicyTag],
        event: &ModerationEvent,
        unban: &UnbanRecord,
    ) -> DomainResult<Vec<String>> {
        let Some(snapshot) = self.actions.latest_for_person(&unban.person_id).await? else {
            return Ok(Vec::new());
        };
        self.actions
            .attach(
                &snapshot.action.action_id,
                &event.community_id,
                &SanctionAttachment::Unban(unban.clone()),
            )
            .await?;
        Ok(vec![unban.person_id.clone()])
    }

    /// Supersede the person's action with a pure tag-removal: the
    /// expect-unban policy branch then lifts system bans everywhere.
    pub async fn clear_tags(
        &self,
        person_id: &str,
        occurred_at_ms: i64,
    ) -> DomainResult<Option<String>> {
        let Some(snapshot) = self.actions.latest_for_person(person_id).await? else {
            return Ok(None);
        };
        if !snapshot.action.is_ban && snapshot.tags.is_empty() {
            return Ok(None);
        }
        self.actions
            .append_latest(&ActionSnapshot {
                action: CanonicalAction {
                    action_id: uuid_v7_without_dashes(),
                    person_id: person_id.to_string(),
                    occurred_at_ms,
                    is_ban: false,
                    is_latest: true,
                },
                tags: Vec::new(),
                attachments: snapshot.attachments.clone(),
            })
            .await?;
        Ok(Some(person_id.to_string()))
    }

    /// Most recent ban-or-unban at or before the timestamp; ties favor the
    /// unban (benefit of the doubt).
    async fn latest_sanction_at_or_before(
        &self,
        person_id: &str,
        community_id: &str,
        at_ms: i64,
    ) -> DomainResult<Option<SanctionAttachment>> {
        let ban = self
            .history
            .latest_ban_at_or_before(person_id, community_id, at_ms)
            .await?;
        let unban = self
            .history
            .latest_unban_at_or_before(person_id, community_id, at_ms)
            .await?;
        Ok(match (ban, unban) {
            (Some(ban), Some(unban)) => {
                if ban.banned_at_ms > unban.unbanned_at_ms {
                    Some(SanctionAttachment::Ban(ban))
                } else {
                    Some(SanctionAttachment::Unban(unban))
                }
            }
            (Some(ban), None) => Some(SanctionAttachment::Ban(ban)),
            (None, Some(unban)) => Some(SanctionAttachment::Unban(unban)),
            (None, None) => None,
        })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MergeFeedConfig {
    pub batch_base: usize,
    pub batch_increment: usize,
    pub max_records_per_tick: usize,
}

impl Default for MergeFeedConfig {
    fn default() -> Self {
        Self {
            batch_base: 50,
            batch_increment: 50,
            max_records_per_tick: 500,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
pub struct MergeSummary {
    pub records_merged: usize,
    pub persons_dirtied: usize,
}

/// Drains recorded history into the merger in global (occurred-at, event id)
/// order, which implies the per-person order the merger requires. Only
/// communities whose back-fill has completed contribute; a community that
/// finishes back-fill after the cursor passed its old events does not get
/// them replayed (its history still informs attachment back-fill, which
/// queries by time directly).
pub struct MergeFeed {
    merger: SanctionMerger,
    actions: Arc<dyn ActionRepository>,
    history: Arc<dyn HistoryRepository>,
    directory: Arc<dyn DirectoryRepository>,
    scan: Arc<dyn ScanRepository>,
    propagation: Arc<dyn PropagationRepository>,
    config: MergeFeedConfig,
}

impl MergeFeed {
    pub fn new(
        merger: SanctionMerger,
        actions: Arc<dyn ActionRepository>,
        history: Arc<dyn HistoryRepository>,
        directory: Arc<dyn DirectoryRepository>,
        scan: Arc<dyn ScanRepository>,
        propagation: Arc<dyn PropagationRepository>,
        config: MergeFeedConfig,
    ) -> Self {
        Self {
            merger,
            actions,
            history,
            directory,
            scan,
            propagation,
            config,
        }
    }

    pub async fn drain(&self) -> DomainResult<MergeSummary> {
        let tags = self.directory.list_tags().await?;
        let mut summary = MergeSummary::default();

        // The cursor only moves forward, so it must not advance while any
        // tracked community is still back-filling: that community's backlog
        // carries old timestamps and would land behind the cursor for good.
        let mut sources = Vec::new();
        for community in self.directory.list_communities().await? {
            let backfilled = self
                .scan
                .progress_for(&community.community_id)
                .await?
                .is_some_and(|progress| !progress.search_forward);
            if backfilled {
                sources.push(community.community_id.clone());
            } else if community.tracked {
                debug!(community = %community.name, "merge held for back-fill");
                return Ok(summary);
            }
        }
        if sources.is_empty() {
            return Ok(summary);
        }

        let mut cursor = self.actions.merge_cursor().await?;
        let mut batch = self.config.batch_base;
        'drain: loop {
            if summary.records_merged >= self.config.max_records_per_tick {
                break;
            }
            let records = self
                .history
                .sanction_records_at_or_after(cursor.latest_merged_at_ms, &sources, batch)
                .await?;
            let fetched = records.len();
            let fresh: Vec<SanctionRecord> = records
                .into_iter()
                .filter(|record| !cursor.contains(record.event_id()))
                .collect();
            if fresh.is_empty() {
                if fetched < batch {
                    break;
                }
                batch += self.config.batch_increment;
                continue;
            }
            for record in fresh {
                if summary.records_merged >= self.config.max_records_per_tick {
                    break 'drain;
                }
                let event = self
                    .history
                    .event_by_id(record.event_id())
                    .await?
                    .ok_or_else(|| {
                        DomainError::Integrity(format!(
                            "moderation event {} missing for sanction record",
                            record.event_id()
                        ))
                    })?;
                let affected = match &record {
                    SanctionRecord::Ban(ban) => {
                        self.merger.process_ban(&tags, &event, ban).await?
                    }
                    SanctionRecord::Unban(unban) => {
                        self.merger.process_unban(&tags, &event, unban).await?
                    }
                };
                for person_id in affected {
                    self.propagation.mark_dirty(&person_id).await?;
                    summary.persons_dirtied += 1;
                }
                cursor.advance(record.occurred_at_ms(), record.event_id());
                self.actions.save_merge_cursor(&cursor).await?;
                summary.records_merged += 1;
            }
        }
        if summary.records_merged > 0 {
            debug!(
                merged = summary.records_merged,
                dirtied = summary.persons_dirtied,
                "merge feed drained"
            );
        }
        Ok(summary)
    }
}
