use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::clock::Clock;
use crate::error::DomainError;
use crate::ports::directory::DirectoryRepository;
use crate::util::uuid_v7_without_dashes;

/// A community that opted into the shared list. `read_only` communities read
/// the list (they may receive propagated bans but their own bans never
/// contribute policy tags); `write_only` communities write into it (their
/// bans contribute tags but they never receive propagated bans).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Community {
    pub community_id: String,
    pub name: String,
    pub silent: bool,
    pub read_only: bool,
    pub write_only: bool,
    pub tracked: bool,
    pub created_at_ms: i64,
}

impl Community {
    pub fn new(name: impl Into<String>, now_ms: i64) -> Self {
        Self {
            community_id: uuid_v7_without_dashes(),
            name: name.into(),
            silent: false,
            read_only: false,
            write_only: false,
            tracked: true,
            created_at_ms: now_ms,
        }
    }
}

/// Created on first reference, never deleted. `tombstoned` marks placeholder
/// handles that never had a real account behind them.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Person {
    pub person_id: String,
    pub handle: String,
    pub tombstoned: bool,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyTag {
    pub tag_id: String,
    pub tag: String,
}

/// Soft-deletable community/tag link. The unsubscribe timestamp is kept so
/// old canonical actions stay interpretable.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subscription {
    pub community_id: String,
    pub tag_id: String,
    pub subscribed_at_ms: i64,
    pub unsubscribed_at_ms: Option<i64>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.unsubscribed_at_ms.is_none()
    }
}

#[derive(Clone)]
pub struct DirectoryService {
    repository: Arc<dyn DirectoryRepository>,
    clock: Arc<dyn Clock>,
}

impl DirectoryService {
    pub fn new(repository: Arc<dyn DirectoryRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    pub async fn find_person(&self, handle: &str) -> DomainResult<Option<Person>> {
        self.repository
            .person_by_handle(&normalize_handle(handle)?)
            .await
    }

    pub async fn ensure_person(&self, handle: &str) -> DomainResult<Person> {
        let handle = normalize_handle(handle)?;
        if let Some(person) = self.repository.person_by_handle(&handle).await? {
            return Ok(person);
        }
        let person = Person {
            person_id: uuid_v7_without_dashes(),
            handle,
            tombstoned: false,
            created_at_ms: self.clock.now_ms(),
        };
        self.repository.insert_person(&person).await
    }

    pub async fn ensure_community(&self, name: &str) -> DomainResult<Community> {
        let name = normalize_name(name)?;
        if let Some(community) = self.repository.community_by_name(&name).await? {
            return Ok(community);
        }
        self.repository
            .upsert_community(&Community::new(name, self.clock.now_ms()))
            .await
    }

    /// Refresh the tracked flag set from the platform's moderated-community
    /// answer. Unseen names are inserted with all flags false; names absent
    /// from the answer are marked untracked but never deleted. Returns the
    /// tracked roster ordered by name.
    pub async fn sync_tracked(&self, names: &[String]) -> DomainResult<Vec<Community>> {
        let mut wanted = Vec::with_capacity(names.len());
        for name in names {
            wanted.push(normalize_name(name)?);
        }
        for name in &wanted {
            self.ensure_community(name).await?;
        }
        let mut tracked = Vec::new();
        for mut community in self.repository.list_communities().await? {
            let should_track = wanted.iter().any(|name| name == &community.name);
            if community.tracked != should_track {
                community.tracked = should_track;
                community = self.repository.upsert_community(&community).await?;
            }
            if community.tracked {
                tracked.push(community);
            }
        }
        tracked.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(tracked)
    }

    pub async fn tracked_communities(&self) -> DomainResult<Vec<Community>> {
        let mut tracked: Vec<Community> = self
            .repository
            .list_communities()
            .await?
            .into_iter()
            .filter(|community| community.tracked)
            .collect();
        tracked.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(tracked)
    }

    pub async fn define_tag(&self, tag: &str) -> DomainResult<PolicyTag> {
        let tag = tag.trim().to_lowercase();
        if tag.is_empty() {
            return Err(DomainError::Validation("policy tag is required".into()));
        }
        if let Some(existing) = self.repository.tag_by_text(&tag).await? {
            return Ok(existing);
        }
        self.repository
            .insert_tag(&PolicyTag {
                tag_id: uuid_v7_without_dashes(),
                tag,
            })
            .await
    }

    pub async fn all_tags(&self) -> DomainResult<Vec<PolicyTag>> {
        self.repository.list_tags().await
    }

    pub async fn subscribe(&self, community_id: &str, tag_id: &str) -> DomainResult<Subscription> {
        match self.repository.subscription(community_id, tag_id).await? {
            Some(existing) if existing.is_active() => Ok(existing),
            _ => {
                self.repository
                    .upsert_subscription(&Subscription {
                        community_id: community_id.to_string(),
                        tag_id: tag_id.to_string(),
                        subscribed_at_ms: self.clock.now_ms(),
                        unsubscribed_at_ms: None,
                    })
                    .await
            }
        }
    }

    pub async fn unsubscribe(&self, community_id: &str, tag_id: &str) -> DomainResult<()> {
        let Some(mut subscription) = self.repository.subscription(community_id, tag_id).await?
        else {
            return Err(DomainError::NotFound);
        };
        if subscription.is_active() {
            subscription.unsubscribed_at_ms = Some(self.clock.now_ms());
            self.repository.upsert_subscription(&subscription).await?;
        }
        Ok(())
    }

    pub async fn subscribed_tags(&self, community_id: &str) -> DomainResult<Vec<PolicyTag>> {
        self.repository.subscribed_tags(community_id).await
    }
}

fn normalize_handle(handle: &str) -> DomainResult<String> {
    let handle = handle.trim().trim_start_matches("u/").to_lowercase();
    if handle.is_empty() {
        return Err(DomainError::Validation("person handle is required".into()));
    }
    Ok(handle)
}

fn normalize_name(name: &str) -> DomainResult<String> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return Err(DomainError::Validation("community name is required".into()));
    }
    Ok(name)
}
