use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::DomainResult;
use crate::clock::Clock;
use crate::directory::Community;
use crate::gateway::PlatformGateway;
use crate::history::Recorder;
use crate::ports::scan::ScanRepository;

/// Per-community pagination state. Starts in forward (back-fill) mode and
/// flips to reverse (steady-state) mode exactly once, when the back-fill
/// runs out of older pages.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanProgress {
    pub community_id: String,
    pub search_forward: bool,
    /// Oldest boundary seen; moves backward while back-filling.
    pub latest_event_cursor: Option<String>,
    /// Newest boundary; only advances once back-fill is done.
    pub newest_event_cursor: Option<String>,
    /// Stamped when a reverse tick drains the log completely; cleared when a
    /// tick ends early. The scheduler treats an unset value as "history not
    /// trustworthy yet".
    pub last_full_history_ms: Option<i64>,
}

impl ScanProgress {
    pub fn new(community_id: impl Into<String>) -> Self {
        Self {
            community_id: community_id.into(),
            search_forward: true,
            latest_event_cursor: None,
            newest_event_cursor: None,
            last_full_history_ms: None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ScannerConfig {
    pub page_size: usize,
    pub forward_pages_per_tick: usize,
    pub reverse_pages_per_tick: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            forward_pages_per_tick: 3,
            reverse_pages_per_tick: 15,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
pub struct ScanSummary {
    pub pages_fetched: usize,
    pub events_recorded: usize,
    pub backfill_complete: bool,
    pub caught_up: bool,
}

pub struct Scanner {
    repository: Arc<dyn ScanRepository>,
    recorder: Recorder,
    gateway: Arc<PlatformGateway>,
    clock: Arc<dyn Clock>,
    config: ScannerConfig,
}

impl Scanner {
    pub fn new(
        repository: Arc<dyn ScanRepository>,
        recorder: Recorder,
        gateway: Arc<PlatformGateway>,
        clock: Arc<dyn Clock>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            repository,
            recorder,
            gateway,
            clock,
            config,
        }
    }

    pub async fn scan_tick(&self, community: &Community) -> DomainResult<ScanSummary> {
        let progress = match self.repository.progress_for(&community.community_id).await? {
            Some(progress) => progress,
            None => {
                let progress = ScanProgress::new(community.community_id.clone());
                self.repository.save_progress(&progress).await?;
                progress
            }
        };
        if progress.search_forward {
            self.backfill_tick(community, progress).await
        } else {
            self.reverse_tick(community, progress).await
        }
    }

    /// Back-fill: walk pages of ever-older events. Pages arrive newest
    /// first, so the oldest id on a page is its last entry.
    async fn backfill_tick(
        &self,
        community: &Community,
        mut progress: ScanProgress,
    ) -> DomainResult<ScanSummary> {
        let mut summary = ScanSummary::default();
        for _ in 0..self.config.forward_pages_per_tick {
            let page = self
                .gateway
                .log_page_before(
                    &community.name,
                    progress.latest_event_cursor.as_deref(),
                    self.config.page_size,
                )
                .await?;
            summary.pages_fetched += 1;

            if page.entries.is_empty() {
                progress.search_forward = false;
                summary.backfill_complete = true;
                self.repository.save_progress(&progress).await?;
                debug!(community = %community.name, "back-fill complete");
                return Ok(summary);
            }

            // The very first page starts at the global newest entry; its
            // first id is the baseline the reverse scan will grow from.
            if progress.newest_event_cursor.is_none() {
                progress.newest_event_cursor =
                    page.entries.first().map(|entry| entry.external_id.clone());
            }

            for entry in &page.entries {
                if self.recorder.record(community, entry).await?.is_some() {
                    summary.events_recorded += 1;
                }
            }

            progress.latest_event_cursor =
                page.entries.last().map(|entry| entry.external_id.clone());
            self.repository.save_progress(&progress).await?;
        }
        Ok(summary)
    }

    /// Steady state: pages of ever-newer events, oldest first within a page.
    async fn reverse_tick(
        &self,
        community: &Community,
        mut progress: ScanProgress,
    ) -> DomainResult<ScanSummary> {
        let mut summary = ScanSummary::default();
        for _ in 0..self.config.reverse_pages_per_tick {
            let page = self
                .gateway
                .log_page_after(
                    &community.name,
                    progress.newest_event_cursor.as_deref(),
                    self.config.page_size,
                )
                .await?;
            summary.pages_fetched += 1;

            for entry in &page.entries {
                if self.recorder.record(community, entry).await?.is_some() {
                    summary.events_recorded += 1;
                }
            }
            if let Some(newest) = page.entries.last() {
                progress.newest_event_cursor = Some(newest.external_id.clone());
            }

            if page.entries.len() < self.config.page_size && !page.has_more {
                progress.last_full_history_ms = Some(self.clock.now_ms());
                summary.caught_up = true;
                self.repository.save_progress(&progress).await?;
                return Ok(summary);
            }
            self.repository.save_progress(&progress).await?;
        }

        // Tick ended with backlog remaining: the history can no longer be
        // treated as complete until a later tick catches up again.
        progress.last_full_history_ms = None;
        self.repository.save_progress(&progress).await?;
        Ok(summary)
    }
}
