//! End-to-end pipeline runs: scripted platform logs through scanner,
//! recorder, merge feed and scheduler, asserting on the writes that come out
//! the other side.

use std::sync::Arc;
use std::time::Duration;

use ronda_domain::clock::{ManualClock, NoopPacer};
use ronda_domain::deleted::DeletedAccountCache;
use ronda_domain::directory::{Community, DirectoryService};
use ronda_domain::gateway::PlatformGateway;
use ronda_domain::history::Recorder;
use ronda_domain::memory::{FakePlatform, MemoryStore, PlatformWrite, default_templates};
use ronda_domain::merge::{MergeFeed, MergeFeedConfig, SanctionMerger};
use ronda_domain::ports::actions::ActionRepository;
use ronda_domain::ports::history::HistoryRepository;
use ronda_domain::ports::platform::{LogEntry, LogEntryKind, PlatformClient};
use ronda_domain::ports::propagation::PropagationRepository;
use ronda_domain::propagation::PropagationPolicy;
use ronda_domain::retry::RetryPolicy;
use ronda_domain::scanner::{Scanner, ScannerConfig};
use ronda_domain::scheduler::{PlanApplier, PropagationScheduler, SchedulerConfig};
use ronda_domain::templates::MessageTemplates;

struct Pipeline {
    store: Arc<MemoryStore>,
    platform: Arc<FakePlatform>,
    clock: Arc<ManualClock>,
    directory: DirectoryService,
    scanner: Scanner,
    merge_feed: MergeFeed,
    scheduler: PropagationScheduler,
}

async fn pipeline() -> Pipeline {
    let store = Arc::new(MemoryStore::default());
    let platform = Arc::new(FakePlatform::default());
    let clock = Arc::new(ManualClock::at(1_000_000_000));
    let directory = DirectoryService::new(store.clone(), clock.clone());
    let system = directory.ensure_person("ronda_bot").await.unwrap();

    let gateway = Arc::new(PlatformGateway::new(
        platform.clone(),
        RetryPolicy::default(),
        Arc::new(NoopPacer::default()),
        Duration::from_millis(1_100),
    ));
    let deleted = Arc::new(DeletedAccountCache::new(
        gateway.clone(),
        clock.clone(),
        Duration::from_secs(1_800),
        Duration::from_secs(3_600),
    ));
    let templates = Arc::new(MessageTemplates::load(default_templates()).unwrap());
    let recorder = Recorder::new(store.clone(), directory.clone());
    let scanner = Scanner::new(
        store.clone(),
        recorder,
        gateway.clone(),
        clock.clone(),
        ScannerConfig::default(),
    );
    let merger = SanctionMerger::new(
        store.clone(),
        store.clone(),
        store.clone(),
        system.person_id.clone(),
    );
    let merge_feed = MergeFeed::new(
        merger,
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        MergeFeedConfig::default(),
    );
    let scheduler = PropagationScheduler::new(
        PropagationPolicy::new(system.person_id),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        PlanApplier::new(gateway, deleted, templates),
        clock.clone(),
        SchedulerConfig::default(),
    );

    Pipeline {
        store,
        platform,
        clock,
        directory,
        scanner,
        merge_feed,
        scheduler,
    }
}

impl Pipeline {
    /// One cycle, as the worker drives it: tracked-set refresh, scans, merge
    /// drain, scheduler tick. Returns the tracked roster.
    async fn run_cycle(&self) -> Vec<Community> {
        let names = self.platform.moderated_communities().await.unwrap();
        let tracked = self.directory.sync_tracked(&names).await.unwrap();
        for community in &tracked {
            self.scanner.scan_tick(community).await.unwrap();
        }
        self.merge_feed.drain().await.unwrap();
        self.scheduler.run_tick().await.unwrap();
        tracked
    }

    async fn subscribe(&self, community: &str, tag: &str) {
        let community = self.directory.ensure_community(community).await.unwrap();
        let tag = self.directory.define_tag(tag).await.unwrap();
        self.directory
            .subscribe(&community.community_id, &tag.tag_id)
            .await
            .unwrap();
    }

    async fn bans_issued_to(&self, community: &str) -> Vec<String> {
        self.platform
            .writes()
            .await
            .into_iter()
            .filter_map(|write| match write {
                PlatformWrite::Ban {
                    community: c,
                    handle,
                    ..
                } if c == community => Some(handle),
                _ => None,
            })
            .collect()
    }
}

fn ban_entry(
    community: &str,
    external_id: &str,
    target: &str,
    moderator: &str,
    reason: &str,
    occurred_at_s: i64,
) -> LogEntry {
    LogEntry {
        external_id: external_id.to_string(),
        community: community.to_string(),
        moderator: moderator.to_string(),
        occurred_at_s,
        kind: LogEntryKind::Ban {
            target: target.to_string(),
            reason: reason.to_string(),
            details: String::new(),
            permanent: true,
        },
    }
}

fn unban_entry(
    community: &str,
    external_id: &str,
    target: &str,
    moderator: &str,
    occurred_at_s: i64,
) -> LogEntry {
    LogEntry {
        external_id: external_id.to_string(),
        community: community.to_string(),
        moderator: moderator.to_string(),
        occurred_at_s,
        kind: LogEntryKind::Unban {
            target: target.to_string(),
        },
    }
}

#[tokio::test]
async fn scenario_a_tagged_ban_propagates_with_origin() {
    let p = pipeline().await;
    p.platform
        .set_moderated(vec!["exchange".to_string(), "yard".to_string()])
        .await;
    p.subscribe("exchange", "fraud").await;
    p.subscribe("yard", "fraud").await;
    p.platform
        .add_log_entry(ban_entry(
            "exchange",
            "x1",
            "scam_guy",
            "mod_one",
            "scammer #fraud",
            100,
        ))
        .await;

    // first cycle back-fills, second catches up and propagates
    p.run_cycle().await;
    p.run_cycle().await;

    let person = p
        .directory
        .find_person("scam_guy")
        .await
        .unwrap()
        .expect("person created");
    let snapshot = p
        .store
        .latest_for_person(&person.person_id)
        .await
        .unwrap()
        .expect("canonical action");
    assert!(snapshot.action.is_ban);
    assert_eq!(snapshot.tags.len(), 1);
    assert_eq!(snapshot.tags[0].tag, "fraud");

    let writes = p.platform.writes().await;
    assert!(writes.iter().any(|write| matches!(
        write,
        PlatformWrite::Ban { community, handle, note }
            if community == "yard"
                && handle == "scam_guy"
                && note.contains("fraud")
                && note.contains("exchange")
    )));
    // the origin community never receives a propagated ban for its own action
    assert!(p.bans_issued_to("exchange").await.is_empty());
}

#[tokio::test]
async fn scenario_b_late_unban_does_not_stop_the_pending_ban() {
    let p = pipeline().await;
    p.platform
        .set_moderated(vec!["exchange".to_string(), "yard".to_string()])
        .await;
    p.subscribe("exchange", "fraud").await;
    p.subscribe("yard", "fraud").await;
    p.platform
        .add_log_entry(ban_entry(
            "exchange",
            "x1",
            "scam_guy",
            "mod_one",
            "scammer #fraud",
            100,
        ))
        .await;
    p.platform
        .add_log_entry(unban_entry("exchange", "x2", "scam_guy", "mod_one", 150))
        .await;

    p.run_cycle().await;
    p.run_cycle().await;

    // the unban postdates the action, so yard is still banned
    assert_eq!(p.bans_issued_to("yard").await, vec!["scam_guy".to_string()]);
}

#[tokio::test]
async fn scenario_b_unban_behind_the_watermark_yields_no_ban() {
    let p = pipeline().await;
    p.platform
        .set_moderated(vec!["exchange".to_string(), "yard".to_string()])
        .await;
    p.subscribe("exchange", "fraud").await;
    p.subscribe("yard", "fraud").await;
    p.platform
        .add_log_entry(ban_entry(
            "exchange",
            "x1",
            "scam_guy",
            "mod_one",
            "scammer #fraud",
            100,
        ))
        .await;
    p.platform
        .add_log_entry(unban_entry("exchange", "x2", "scam_guy", "mod_one", 150))
        .await;

    // ingest and merge without propagating, then drop the dirty mark: both
    // events now sit behind the freshly created pair watermark
    let names = vec!["exchange".to_string(), "yard".to_string()];
    let tracked = p.directory.sync_tracked(&names).await.unwrap();
    for community in &tracked {
        p.scanner.scan_tick(community).await.unwrap();
        p.scanner.scan_tick(community).await.unwrap();
    }
    p.merge_feed.drain().await.unwrap();
    let person = p.directory.find_person("scam_guy").await.unwrap().unwrap();
    p.store.clear_dirty(&person.person_id).await.unwrap();

    p.scheduler.run_tick().await.unwrap();
    assert!(p.bans_issued_to("yard").await.is_empty());
}

#[tokio::test]
async fn scenario_c_older_human_ban_collides_without_being_touched() {
    let p = pipeline().await;
    p.platform
        .set_moderated(vec!["exchange".to_string(), "zone".to_string()])
        .await;
    p.subscribe("exchange", "fraud").await;
    p.subscribe("zone", "fraud").await;
    // zone banned the user for an unrelated reason before the policy ban
    p.platform
        .add_log_entry(ban_entry(
            "zone",
            "z1",
            "scam_guy",
            "zone_mod",
            "being a jerk",
            50,
        ))
        .await;
    p.platform
        .add_log_entry(ban_entry(
            "exchange",
            "x1",
            "scam_guy",
            "mod_one",
            "scammer #fraud",
            100,
        ))
        .await;

    p.run_cycle().await;
    p.run_cycle().await;

    let writes = p.platform.writes().await;
    assert!(p.bans_issued_to("zone").await.is_empty());
    assert!(writes.iter().any(|write| matches!(
        write,
        PlatformWrite::ModNotice { community, body, .. }
            if community == "zone" && body.contains("scam_guy")
    )));
}

#[tokio::test]
async fn scenario_d_new_community_sees_no_retroactive_flood() {
    let p = pipeline().await;
    p.platform
        .set_moderated(vec!["exchange".to_string(), "yard".to_string()])
        .await;
    p.subscribe("exchange", "fraud").await;
    p.subscribe("yard", "fraud").await;
    p.platform
        .add_log_entry(ban_entry(
            "exchange",
            "x1",
            "old_guy",
            "mod_one",
            "scammer #fraud",
            100,
        ))
        .await;
    p.run_cycle().await;
    p.run_cycle().await;
    assert_eq!(p.bans_issued_to("yard").await, vec!["old_guy".to_string()]);

    // a third community opts in mid-stream
    p.platform
        .set_moderated(vec![
            "exchange".to_string(),
            "garden".to_string(),
            "yard".to_string(),
        ])
        .await;
    p.subscribe("garden", "fraud").await;
    p.clock.advance_ms(60_000);
    p.run_cycle().await;
    p.run_cycle().await;
    // the backlog is not replayed into the newcomer
    assert!(p.bans_issued_to("garden").await.is_empty());

    // but a fresh action reaches it
    p.platform
        .add_log_entry(ban_entry(
            "exchange",
            "x2",
            "new_guy",
            "mod_one",
            "another scammer #fraud",
            2_000_000,
        ))
        .await;
    p.run_cycle().await;
    assert_eq!(p.bans_issued_to("garden").await, vec!["new_guy".to_string()]);
}

#[tokio::test]
async fn rescan_is_idempotent_and_merge_is_stable() {
    let p = pipeline().await;
    p.platform
        .set_moderated(vec!["exchange".to_string(), "yard".to_string()])
        .await;
    p.subscribe("exchange", "fraud").await;
    p.subscribe("yard", "fraud").await;
    p.platform
        .add_log_entry(ban_entry(
            "exchange",
            "x1",
            "scam_guy",
            "mod_one",
            "scammer #fraud",
            100,
        ))
        .await;

    p.run_cycle().await;
    p.run_cycle().await;

    let person = p.directory.find_person("scam_guy").await.unwrap().unwrap();
    let before = p
        .store
        .latest_for_person(&person.person_id)
        .await
        .unwrap()
        .unwrap();

    // wipe the scan cursor: the whole log is re-fetched and re-fed
    use ronda_domain::ports::scan::ScanRepository;
    use ronda_domain::scanner::ScanProgress;
    let exchange = p.directory.ensure_community("exchange").await.unwrap();
    p.store
        .save_progress(&ScanProgress::new(exchange.community_id.clone()))
        .await
        .unwrap();
    p.run_cycle().await;
    p.run_cycle().await;

    // one event, one ban, identical canonical state
    let event = p
        .store
        .event_by_external_id("x1")
        .await
        .unwrap()
        .expect("event still unique");
    assert!(p.store.ban_for_event(&event.event_id).await.unwrap().is_some());
    let after = p
        .store
        .latest_for_person(&person.person_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(before, after);
    assert_eq!(p.store.latest_flag_count(&person.person_id).await, 1);
}

#[tokio::test]
async fn scheduler_reaches_a_fixpoint_without_new_events() {
    let p = pipeline().await;
    p.platform
        .set_moderated(vec!["exchange".to_string(), "yard".to_string()])
        .await;
    p.subscribe("exchange", "fraud").await;
    p.subscribe("yard", "fraud").await;
    p.platform
        .add_log_entry(ban_entry(
            "exchange",
            "x1",
            "scam_guy",
            "mod_one",
            "scammer #fraud",
            100,
        ))
        .await;

    p.run_cycle().await;
    p.run_cycle().await;
    let writes_after_propagation = p.platform.writes().await.len();
    assert!(writes_after_propagation > 0);

    for _ in 0..5 {
        p.run_cycle().await;
    }
    assert_eq!(p.platform.writes().await.len(), writes_after_propagation);
}
