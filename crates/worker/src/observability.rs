use std::sync::OnceLock;

use anyhow::Result;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use ronda_infra::runtime::CycleReport;

const CYCLES_TOTAL: &str = "ronda_worker_cycles_total";
const EVENTS_RECORDED_TOTAL: &str = "ronda_worker_events_recorded_total";
const RECORDS_MERGED_TOTAL: &str = "ronda_worker_records_merged_total";
const PLANS_APPLIED_TOTAL: &str = "ronda_worker_plans_applied_total";
const PLATFORM_WRITES_TOTAL: &str = "ronda_worker_platform_writes_total";
const UNBAN_REQUESTS_TOTAL: &str = "ronda_worker_unban_requests_handled_total";
const TRACKED_COMMUNITIES_GAUGE: &str = "ronda_worker_tracked_communities";
const PAIRS_SKIPPED_GAUGE: &str = "ronda_worker_pairs_skipped";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

pub fn register_cycle(report: &CycleReport) {
    counter!(CYCLES_TOTAL).increment(1);

    let recorded: usize = report
        .scans
        .iter()
        .map(|(_, summary)| summary.events_recorded)
        .sum();
    counter!(EVENTS_RECORDED_TOTAL).increment(recorded as u64);
    counter!(RECORDS_MERGED_TOTAL).increment(report.merge.records_merged as u64);
    counter!(PLANS_APPLIED_TOTAL).increment(report.scheduler.plans_applied as u64);
    counter!(PLATFORM_WRITES_TOTAL).increment(report.scheduler.platform_writes as u64);
    counter!(UNBAN_REQUESTS_TOTAL).increment(report.requests.handled as u64);

    gauge!(TRACKED_COMMUNITIES_GAUGE).set(report.tracked_communities as f64);
    gauge!(PAIRS_SKIPPED_GAUGE).set(report.scheduler.pairs_skipped as f64);
}
