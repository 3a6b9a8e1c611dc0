use std::time::Duration;

use ronda_infra::config::AppConfig;
use ronda_infra::logging::init_tracing;
use ronda_infra::runtime::CycleRunner;
use tracing::{error, info};

mod observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config)?;
    observability::init_metrics()?;

    let runner = CycleRunner::from_config(&config).await?;
    info!(backend = %config.data_backend, "worker starting");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("worker shutdown");
                break;
            }
            _ = cycle(&runner, &config) => {}
        }
    }

    Ok(())
}

/// One cycle plus its pause. A failed cycle is logged and retried after the
/// longer restart pause; invariant violations never get silently patched.
async fn cycle(runner: &CycleRunner, config: &AppConfig) {
    match runner.run_once().await {
        Ok(report) => {
            observability::register_cycle(&report);
            tokio::time::sleep(Duration::from_millis(config.cycle_pause_ms)).await;
        }
        Err(err) => {
            error!(error = %err, "cycle aborted, restarting after pause");
            tokio::time::sleep(Duration::from_millis(config.restart_pause_ms)).await;
        }
    }
}
