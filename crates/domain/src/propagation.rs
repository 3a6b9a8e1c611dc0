use std::collections::{HashMap, HashSet};

use crate::directory::{Community, Person, PolicyTag};
use crate::history::BanRecord;
use crate::merge::{ActionSnapshot, SanctionAttachment};
use crate::util::contains_ignore_case;

/// Everything the policy needs to judge one canonical action against one
/// target community. Assembled by the scheduler; the decision itself is
/// pure.
pub struct PolicyContext<'a> {
    pub snapshot: &'a ActionSnapshot,
    pub person: &'a Person,
    pub target: &'a Community,
    /// The target community's active subscribed tags.
    pub target_subscribed: &'a [PolicyTag],
    /// Full community roster, flags included.
    pub communities: &'a [Community],
    /// Active subscribed tags per community id, for origin attribution.
    pub subscriptions: &'a HashMap<String, Vec<PolicyTag>>,
    /// Every ban of the person in the target community, oldest first.
    pub target_prior_bans: &'a [BanRecord],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModNotice {
    /// An older human ban collided with a newer policy action; the ban is
    /// left untouched.
    Collision { prior_ban_at_ms: i64 },
    /// A human unban predating the action is being overridden; the nearest
    /// preceding ban is surfaced when one exists.
    UnbanOverridden {
        unban_at_ms: i64,
        prior_ban_at_ms: Option<i64>,
    },
    /// A human ban matched the community's own tags and is being lifted.
    BanOverridden { ban_at_ms: i64 },
    /// A human ban did not match the community's tags and stays in place.
    OverrideRefused { ban_at_ms: i64 },
    /// Courtesy heads-up before a policy ban lands.
    Courtesy,
    /// The system's own ban is being lifted.
    Lifted,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Origin {
    Community(String),
    Ambiguous,
    Unknown,
}

impl Origin {
    pub fn render(&self) -> String {
        match self {
            Self::Community(name) => name.clone(),
            Self::Ambiguous => "(ambiguous)".to_string(),
            Self::Unknown => "(unknown)".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BanDirective {
    /// Tag texts that triggered the ban, sorted for stable rendering.
    pub tags: Vec<String>,
    pub origin: Origin,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PropagationPlan {
    pub notices: Vec<ModNotice>,
    pub ban: Option<BanDirective>,
    pub unban: bool,
}

impl PropagationPlan {
    pub fn is_empty(&self) -> bool {
        self.notices.is_empty() && self.ban.is_none() && !self.unban
    }
}

/// Decides, for one canonical action and one community, what (if anything)
/// must change there.
#[derive(Clone, Debug)]
pub struct PropagationPolicy {
    system_person_id: String,
}

impl PropagationPolicy {
    pub fn new(system_person_id: impl Into<String>) -> Self {
        Self {
            system_person_id: system_person_id.into(),
        }
    }

    pub fn decide(&self, ctx: &PolicyContext<'_>) -> PropagationPlan {
        if self.expects_ban(ctx.target, ctx.target_subscribed, ctx.snapshot) {
            self.decide_expect_ban(ctx)
        } else {
            self.decide_expect_unban(ctx)
        }
    }

    fn is_system(&self, person_id: &str) -> bool {
        person_id == self.system_person_id
    }

    fn expects_ban(
        &self,
        community: &Community,
        subscribed: &[PolicyTag],
        snapshot: &ActionSnapshot,
    ) -> bool {
        if community.write_only || !snapshot.action.is_ban {
            return false;
        }
        let active: HashSet<&str> = snapshot
            .tags
            .iter()
            .map(|tag| tag.tag_id.as_str())
            .collect();
        subscribed.iter().any(|tag| active.contains(tag.tag_id.as_str()))
    }

    fn decide_expect_ban(&self, ctx: &PolicyContext<'_>) -> PropagationPlan {
        let mut plan = PropagationPlan::default();
        let action_at = ctx.snapshot.action.occurred_at_ms;

        match ctx.snapshot.attachments.get(&ctx.target.community_id) {
            Some(SanctionAttachment::Ban(ban)) => {
                if self.is_system(&ban.moderator_person_id) {
                    return plan;
                }
                if ban.banned_at_ms >= action_at {
                    // future or simultaneous information, leave it alone
                    return plan;
                }
                plan.notices.push(ModNotice::Collision {
                    prior_ban_at_ms: ban.banned_at_ms,
                });
                return plan;
            }
            Some(SanctionAttachment::Unban(unban)) => {
                if unban.unbanned_at_ms < action_at
                    && !self.is_system(&unban.moderator_person_id)
                {
                    let prior_ban_at_ms = ctx
                        .target_prior_bans
                        .iter()
                        .filter(|ban| ban.banned_at_ms <= unban.unbanned_at_ms)
                        .max_by_key(|ban| ban.banned_at_ms)
                        .map(|ban| ban.banned_at_ms);
                    plan.notices.push(ModNotice::UnbanOverridden {
                        unban_at_ms: unban.unbanned_at_ms,
                        prior_ban_at_ms,
                    });
                }
            }
            None => {}
        }

        if plan.notices.is_empty() && !ctx.target.silent {
            plan.notices.push(ModNotice::Courtesy);
        }
        let mut tags: Vec<String> = ctx
            .snapshot
            .tags
            .iter()
            .map(|tag| tag.tag.clone())
            .collect();
        tags.sort();
        plan.ban = Some(BanDirective {
            tags,
            origin: self.origin(ctx),
        });
        plan
    }

    fn decide_expect_unban(&self, ctx: &PolicyContext<'_>) -> PropagationPlan {
        let mut plan = PropagationPlan::default();
        let action_at = ctx.snapshot.action.occurred_at_ms;

        let Some(SanctionAttachment::Ban(ban)) =
            ctx.snapshot.attachments.get(&ctx.target.community_id)
        else {
            // already unbanned, or no ban at all: never unban speculatively
            return plan;
        };
        if ban.banned_at_ms >= action_at {
            return plan;
        }

        if self.is_system(&ban.moderator_person_id) {
            plan.unban = true;
            if !ctx.target.silent {
                plan.notices.push(ModNotice::Lifted);
            }
            return plan;
        }

        // a human ban only falls if the community's own tags match its reason
        let rematch = ctx
            .target_subscribed
            .iter()
            .any(|tag| contains_ignore_case(&ban.reason, &tag.tag));
        if rematch {
            plan.unban = true;
            plan.notices.push(ModNotice::BanOverridden {
                ban_at_ms: ban.banned_at_ms,
            });
        } else {
            plan.notices.push(ModNotice::OverrideRefused {
                ban_at_ms: ban.banned_at_ms,
            });
        }
        plan
    }

    /// A single unambiguous origin exists when exactly one community
    /// expected to show this ban holds a non-system ban attachment.
    fn origin(&self, ctx: &PolicyContext<'_>) -> Origin {
        let mut sources = Vec::new();
        for community in ctx.communities {
            let Some(subscribed) = ctx.subscriptions.get(&community.community_id) else {
                continue;
            };
            if !self.expects_ban(community, subscribed, ctx.snapshot) {
                continue;
            }
            if let Some(SanctionAttachment::Ban(ban)) =
                ctx.snapshot.attachments.get(&community.community_id)
            {
                if !self.is_system(&ban.moderator_person_id) {
                    sources.push(community.name.clone());
                }
            }
        }
        match sources.len() {
            0 => Origin::Unknown,
            1 => Origin::Community(sources.remove(0)),
            _ => Origin::Ambiguous,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::history::UnbanRecord;
    use crate::merge::CanonicalAction;

    const SYSTEM: &str = "system-person";
    const HUMAN: &str = "human-person";

    struct Fixture {
        communities: Vec<Community>,
        subscriptions: HashMap<String, Vec<PolicyTag>>,
        person: Person,
        fraud: PolicyTag,
    }

    fn community(name: &str) -> Community {
        Community {
            community_id: format!("id-{name}"),
            name: name.to_string(),
            silent: false,
            read_only: false,
            write_only: false,
            tracked: true,
            created_at_ms: 0,
        }
    }

    fn fixture() -> Fixture {
        let fraud = PolicyTag {
            tag_id: "tag-fraud".to_string(),
            tag: "fraud".to_string(),
        };
        let communities = vec![community("alpha"), community("beta")];
        let mut subscriptions = HashMap::new();
        for c in &communities {
            subscriptions.insert(c.community_id.clone(), vec![fraud.clone()]);
        }
        Fixture {
            communities,
            subscriptions,
            person: Person {
                person_id: "person-1".to_string(),
                handle: "scam_guy".to_string(),
                tombstoned: false,
                created_at_ms: 0,
            },
            fraud,
        }
    }

    fn ban_record(community_id: &str, moderator: &str, at_ms: i64, reason: &str) -> BanRecord {
        BanRecord {
            ban_id: format!("ban-{community_id}-{at_ms}"),
            event_id: format!("evt-{community_id}-{at_ms}"),
            community_id: community_id.to_string(),
            moderator_person_id: moderator.to_string(),
            person_id: "person-1".to_string(),
            reason: reason.to_string(),
            details: String::new(),
            permanent: true,
            banned_at_ms: at_ms,
        }
    }

    fn unban_record(community_id: &str, moderator: &str, at_ms: i64) -> UnbanRecord {
        UnbanRecord {
            unban_id: format!("unban-{community_id}-{at_ms}"),
            event_id: format!("uevt-{community_id}-{at_ms}"),
            community_id: community_id.to_string(),
            moderator_person_id: moderator.to_string(),
            person_id: "person-1".to_string(),
            unbanned_at_ms: at_ms,
        }
    }

    fn snapshot(
        fx: &Fixture,
        at_ms: i64,
        is_ban: bool,
        attachments: Vec<(&str, SanctionAttachment)>,
    ) -> ActionSnapshot {
        ActionSnapshot {
            action: CanonicalAction {
                action_id: "action-1".to_string(),
                person_id: fx.person.person_id.clone(),
                occurred_at_ms: at_ms,
                is_ban,
                is_latest: true,
            },
            tags: if is_ban { vec![fx.fraud.clone()] } else { Vec::new() },
            attachments: attachments
                .into_iter()
                .map(|(id, attachment)| (id.to_string(), attachment))
                .collect(),
        }
    }

    fn decide(fx: &Fixture, target_index: usize, snapshot: &ActionSnapshot) -> PropagationPlan {
        decide_with_priors(fx, target_index, snapshot, &[])
    }

    fn decide_with_priors(
        fx: &Fixture,
        target_index: usize,
        snapshot: &ActionSnapshot,
        priors: &[BanRecord],
    ) -> PropagationPlan {
        let policy = PropagationPolicy::new(SYSTEM);
        let target = &fx.communities[target_index];
        let subscribed = fx
            .subscriptions
            .get(&target.community_id)
            .cloned()
            .unwrap_or_default();
        policy.decide(&PolicyContext {
            snapshot,
            person: &fx.person,
            target,
            target_subscribed: &subscribed,
            communities: &fx.communities,
            subscriptions: &fx.subscriptions,
            target_prior_bans: priors,
        })
    }

    #[test]
    fn missing_ban_is_issued_with_courtesy_and_origin() {
        let fx = fixture();
        let source_ban = ban_record("id-alpha", HUMAN, 100, "scammer #fraud");
        let snap = snapshot(
            &fx,
            100,
            true,
            vec![("id-alpha", SanctionAttachment::Ban(source_ban))],
        );
        let plan = decide(&fx, 1, &snap);
        assert_eq!(plan.notices, vec![ModNotice::Courtesy]);
        let ban = plan.ban.expect("ban issued");
        assert_eq!(ban.tags, vec!["fraud".to_string()]);
        assert_eq!(ban.origin, Origin::Community("alpha".to_string()));
        assert!(!plan.unban);
    }

    #[test]
    fn silent_community_gets_the_ban_without_courtesy() {
        let mut fx = fixture();
        fx.communities[1].silent = true;
        let snap = snapshot(
            &fx,
            100,
            true,
            vec![(
                "id-alpha",
                SanctionAttachment::Ban(ban_record("id-alpha", HUMAN, 100, "#fraud")),
            )],
        );
        let plan = decide(&fx, 1, &snap);
        assert!(plan.notices.is_empty());
        assert!(plan.ban.is_some());
    }

    #[test]
    fn existing_system_ban_means_nothing_to_do() {
        let fx = fixture();
        let snap = snapshot(
            &fx,
            100,
            true,
            vec![(
                "id-beta",
                SanctionAttachment::Ban(ban_record("id-beta", SYSTEM, 90, "policy")),
            )],
        );
        assert!(decide(&fx, 1, &snap).is_empty());
    }

    #[test]
    fn human_ban_at_or_after_the_action_is_left_alone() {
        let fx = fixture();
        for at in [100, 150] {
            let snap = snapshot(
                &fx,
                100,
                true,
                vec![(
                    "id-beta",
                    SanctionAttachment::Ban(ban_record("id-beta", HUMAN, at, "unrelated")),
                )],
            );
            assert!(decide(&fx, 1, &snap).is_empty());
        }
    }

    #[test]
    fn older_human_ban_collides_and_is_not_touched() {
        let fx = fixture();
        let snap = snapshot(
            &fx,
            100,
            true,
            vec![(
                "id-beta",
                SanctionAttachment::Ban(ban_record("id-beta", HUMAN, 50, "unrelated")),
            )],
        );
        let plan = decide(&fx, 1, &snap);
        assert_eq!(
            plan.notices,
            vec![ModNotice::Collision { prior_ban_at_ms: 50 }]
        );
        assert!(plan.ban.is_none());
        assert!(!plan.unban);
    }

    #[test]
    fn overridden_human_unban_is_reported_with_nearest_prior_ban() {
        let fx = fixture();
        let snap = snapshot(
            &fx,
            100,
            true,
            vec![(
                "id-beta",
                SanctionAttachment::Unban(unban_record("id-beta", HUMAN, 80)),
            )],
        );
        let priors = vec![
            ban_record("id-beta", HUMAN, 20, "old"),
            ban_record("id-beta", HUMAN, 60, "newer"),
        ];
        let plan = decide_with_priors(&fx, 1, &snap, &priors);
        assert_eq!(
            plan.notices,
            vec![ModNotice::UnbanOverridden {
                unban_at_ms: 80,
                prior_ban_at_ms: Some(60),
            }]
        );
        // the override notice replaces the courtesy one
        assert!(plan.ban.is_some());
    }

    #[test]
    fn system_unban_attachment_does_not_block_the_ban() {
        let fx = fixture();
        let snap = snapshot(
            &fx,
            100,
            true,
            vec![(
                "id-beta",
                SanctionAttachment::Unban(unban_record("id-beta", SYSTEM, 80)),
            )],
        );
        let plan = decide(&fx, 1, &snap);
        assert_eq!(plan.notices, vec![ModNotice::Courtesy]);
        assert!(plan.ban.is_some());
    }

    #[test]
    fn origin_is_ambiguous_with_two_human_sources() {
        let mut fx = fixture();
        fx.communities.push(community("gamma"));
        fx.subscriptions
            .insert("id-gamma".to_string(), vec![fx.fraud.clone()]);
        let snap = snapshot(
            &fx,
            100,
            true,
            vec![
                (
                    "id-alpha",
                    SanctionAttachment::Ban(ban_record("id-alpha", HUMAN, 90, "#fraud")),
                ),
                (
                    "id-gamma",
                    SanctionAttachment::Ban(ban_record("id-gamma", HUMAN, 95, "#fraud")),
                ),
            ],
        );
        let plan = decide(&fx, 1, &snap);
        assert_eq!(plan.ban.unwrap().origin, Origin::Ambiguous);
    }

    #[test]
    fn origin_is_unknown_without_any_human_source() {
        let fx = fixture();
        let snap = snapshot(&fx, 100, true, vec![]);
        let plan = decide(&fx, 1, &snap);
        assert_eq!(plan.ban.unwrap().origin, Origin::Unknown);
    }

    #[test]
    fn write_only_community_never_receives_a_ban() {
        let mut fx = fixture();
        fx.communities[1].write_only = true;
        let snap = snapshot(
            &fx,
            100,
            true,
            vec![(
                "id-alpha",
                SanctionAttachment::Ban(ban_record("id-alpha", HUMAN, 100, "#fraud")),
            )],
        );
        // expect-unban branch with no attachment for beta: nothing at all
        assert!(decide(&fx, 1, &snap).is_empty());
    }

    #[test]
    fn unsubscribed_community_is_not_banned() {
        let mut fx = fixture();
        fx.subscriptions.insert("id-beta".to_string(), Vec::new());
        let snap = snapshot(
            &fx,
            100,
            true,
            vec![(
                "id-alpha",
                SanctionAttachment::Ban(ban_record("id-alpha", HUMAN, 100, "#fraud")),
            )],
        );
        assert!(decide(&fx, 1, &snap).is_empty());
    }

    #[test]
    fn expect_unban_with_unban_shown_is_a_noop() {
        let fx = fixture();
        let snap = snapshot(
            &fx,
            200,
            false,
            vec![(
                "id-beta",
                SanctionAttachment::Unban(unban_record("id-beta", SYSTEM, 150)),
            )],
        );
        assert!(decide(&fx, 1, &snap).is_empty());
    }

    #[test]
    fn expect_unban_never_unbans_speculatively() {
        let fx = fixture();
        let snap = snapshot(&fx, 200, false, vec![]);
        assert!(decide(&fx, 1, &snap).is_empty());
    }

    #[test]
    fn system_ban_is_lifted_with_notice() {
        let fx = fixture();
        let snap = snapshot(
            &fx,
            200,
            false,
            vec![(
                "id-beta",
                SanctionAttachment::Ban(ban_record("id-beta", SYSTEM, 100, "policy")),
            )],
        );
        let plan = decide(&fx, 1, &snap);
        assert!(plan.unban);
        assert_eq!(plan.notices, vec![ModNotice::Lifted]);
        assert!(plan.ban.is_none());
    }

    #[test]
    fn system_ban_is_lifted_silently_for_silent_communities() {
        let mut fx = fixture();
        fx.communities[1].silent = true;
        let snap = snapshot(
            &fx,
            200,
            false,
            vec![(
                "id-beta",
                SanctionAttachment::Ban(ban_record("id-beta", SYSTEM, 100, "policy")),
            )],
        );
        let plan = decide(&fx, 1, &snap);
        assert!(plan.unban);
        assert!(plan.notices.is_empty());
    }

    #[test]
    fn matching_human_ban_is_overridden_with_notice_even_when_silent() {
        let mut fx = fixture();
        fx.communities[1].silent = true;
        let snap = snapshot(
            &fx,
            200,
            false,
            vec![(
                "id-beta",
                SanctionAttachment::Ban(ban_record("id-beta", HUMAN, 100, "clearly #fraud")),
            )],
        );
        let plan = decide(&fx, 1, &snap);
        assert!(plan.unban);
        assert_eq!(plan.notices, vec![ModNotice::BanOverridden { ban_at_ms: 100 }]);
    }

    #[test]
    fn unmatched_human_ban_is_kept_with_an_explanation() {
        let fx = fixture();
        let snap = snapshot(
            &fx,
            200,
            false,
            vec![(
                "id-beta",
                SanctionAttachment::Ban(ban_record("id-beta", HUMAN, 100, "being rude")),
            )],
        );
        let plan = decide(&fx, 1, &snap);
        assert!(!plan.unban);
        assert_eq!(
            plan.notices,
            vec![ModNotice::OverrideRefused { ban_at_ms: 100 }]
        );
    }

    #[test]
    fn human_ban_newer_than_the_action_is_untouched_in_expect_unban() {
        let fx = fixture();
        let snap = snapshot(
            &fx,
            200,
            false,
            vec![(
                "id-beta",
                SanctionAttachment::Ban(ban_record("id-beta", HUMAN, 250, "#fraud")),
            )],
        );
        assert!(decide(&fx, 1, &snap).is_empty());
    }
}
