//! Wires the domain services over the configured backend and drives one
//! cycle at a time. The memory backend pairs the in-memory store with the
//! scriptable platform fake; real transports plug in behind the same ports.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Serialize;
use tracing::{debug, info};

use ronda_domain::DomainResult;
use ronda_domain::clock::{Clock, Pacer, SystemClock, SystemPacer};
use ronda_domain::deleted::DeletedAccountCache;
use ronda_domain::directory::DirectoryService;
use ronda_domain::gateway::PlatformGateway;
use ronda_domain::history::Recorder;
use ronda_domain::legacy::{LegacyListService, LegacySummary};
use ronda_domain::memory::{FakePlatform, MemoryStore, StaticLegacySource, default_templates};
use ronda_domain::merge::{MergeFeed, MergeFeedConfig, MergeSummary, SanctionMerger};
use ronda_domain::propagation::PropagationPolicy;
use ronda_domain::requests::{RequestSummary, UnbanRequestService};
use ronda_domain::retry::RetryPolicy;
use ronda_domain::scanner::{ScanSummary, Scanner, ScannerConfig};
use ronda_domain::scheduler::{
    PlanApplier, PropagationScheduler, SchedulerConfig, SchedulerSummary,
};
use ronda_domain::templates::MessageTemplates;

use crate::config::AppConfig;

#[derive(Clone, Debug, Default, Serialize)]
pub struct CycleReport {
    pub tracked_communities: usize,
    pub scans: Vec<(String, ScanSummary)>,
    pub merge: MergeSummary,
    pub scheduler: SchedulerSummary,
    pub requests: RequestSummary,
    pub legacy: Option<LegacySummary>,
}

pub struct CycleRunner {
    gateway: Arc<PlatformGateway>,
    directory: DirectoryService,
    scanner: Scanner,
    merge_feed: MergeFeed,
    scheduler: PropagationScheduler,
    requests: UnbanRequestService,
    legacy: Option<LegacyListService>,
    request_batch: usize,
}

impl CycleRunner {
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        if config.data_backend != "memory" {
            bail!("unsupported data backend: {}", config.data_backend);
        }

        let store = Arc::new(MemoryStore::default());
        let platform = Arc::new(FakePlatform::default());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let pacer: Arc<dyn Pacer> = Arc::new(SystemPacer);

        // a missing template must stop the worker before the first cycle
        let templates = Arc::new(
            MessageTemplates::load(default_templates())
                .context("message template set incomplete")?,
        );

        let retry = RetryPolicy {
            max_attempts: config.retry_max_attempts,
            base_backoff_ms: config.retry_backoff_base_ms,
            max_backoff_ms: config.retry_backoff_max_ms,
        };
        let gateway = Arc::new(PlatformGateway::new(
            platform,
            retry,
            pacer,
            Duration::from_millis(config.pace_ms),
        ));
        let deleted = Arc::new(DeletedAccountCache::new(
            gateway.clone(),
            clock.clone(),
            Duration::from_secs(config.deleted_cache_ttl_minutes * 60),
            Duration::from_secs(config.deleted_cache_prune_minutes * 60),
        ));

        let directory = DirectoryService::new(store.clone(), clock.clone());
        let system = directory
            .ensure_person(&config.bot_username)
            .await
            .context("registering the system account")?;
        let recorder = Recorder::new(store.clone(), directory.clone());
        let scanner = Scanner::new(
            store.clone(),
            recorder,
            gateway.clone(),
            clock.clone(),
            ScannerConfig {
                page_size: config.scanner_page_size,
                forward_pages_per_tick: config.scanner_forward_pages,
                reverse_pages_per_tick: config.scanner_reverse_pages,
            },
        );
        let merger = SanctionMerger::new(
            store.clone(),
            store.clone(),
            store.clone(),
            system.person_id.clone(),
        );
        let merge_feed = MergeFeed::new(
            merger.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            MergeFeedConfig {
                batch_base: config.merge_batch_base,
                batch_increment: config.merge_batch_increment,
                max_records_per_tick: config.merge_max_records,
            },
        );
        let applier = PlanApplier::new(gateway.clone(), deleted.clone(), templates.clone());
        let scheduler = PropagationScheduler::new(
            PropagationPolicy::new(system.person_id),
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            applier,
            clock.clone(),
            SchedulerConfig {
                batch_base: config.scheduler_batch_base,
                batch_increment: config.scheduler_batch_increment,
                max_inspected_per_pair: config.scheduler_max_inspected,
                max_writes_per_pair: config.scheduler_max_writes,
                dirty_sweep_limit: config.dirty_sweep_limit,
            },
        );
        let requests = UnbanRequestService::new(
            store.clone(),
            directory.clone(),
            merger.clone(),
            store.clone(),
            gateway.clone(),
            deleted,
            templates,
            clock.clone(),
        );
        let legacy = if config.legacy_list.trim().is_empty() {
            None
        } else {
            Some(LegacyListService::new(
                Arc::new(StaticLegacySource::new(config.legacy_list.clone())),
                directory.clone(),
                store.clone(),
                store.clone(),
                clock,
            ))
        };

        Ok(Self {
            gateway,
            directory,
            scanner,
            merge_feed,
            scheduler,
            requests,
            legacy,
            request_batch: config.unban_request_batch,
        })
    }

    /// One full cycle, in order: re-authenticate, refresh the tracked set,
    /// process manual unban requests, replay the legacy list, scan every
    /// community, drain the merge cursor, run the scheduler.
    pub async fn run_once(&self) -> DomainResult<CycleReport> {
        self.gateway.ensure_session().await?;

        let names = self.gateway.moderated_communities().await?;
        let tracked = self.directory.sync_tracked(&names).await?;

        let requests = self.requests.process_pending(self.request_batch).await?;

        let legacy = match &self.legacy {
            Some(service) => Some(service.replay().await?),
            None => None,
        };

        let mut scans = Vec::with_capacity(tracked.len());
        for community in &tracked {
            let summary = self.scanner.scan_tick(community).await?;
            scans.push((community.name.clone(), summary));
        }

        let merge = self.merge_feed.drain().await?;
        let scheduler = self.scheduler.run_tick().await?;

        info!(
            tracked = tracked.len(),
            merged = merge.records_merged,
            writes = scheduler.platform_writes,
            "cycle complete"
        );
        let report = CycleReport {
            tracked_communities: tracked.len(),
            scans,
            merge,
            scheduler,
            requests,
            legacy,
        };
        if let Ok(json) = serde_json::to_string(&report) {
            debug!(report = %json, "cycle report");
        }
        Ok(report)
    }
}
