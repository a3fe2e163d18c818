use anyhow::{Context, Result};
use tokio::sync::broadcast;

use cycler::config::Config;
use cycler::error::CyclerErrorTrait;
use cycler::metrics::{self, server::MetricsServer};
use cycler::scheduler::{Scheduler, SchedulerEvent};
use cycler::storage::format_remaining;
use cycler::task::HttpCheckinExecutor;

pub async fn run(config: &Config, once: bool) -> Result<()> {
    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed, continuing without metrics");
    }

    if let Some(addr) = config.metrics.bind_address {
        let server = MetricsServer::bind(addr)
            .await
            .context("Failed to start metrics server")?;
        tokio::spawn(async move {
            if let Err(e) = server.serve().await {
                tracing::error!(error = %e, "Metrics server stopped");
            }
        });
    }

    let mut scheduler = match build_scheduler(config) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            tracing::error!(
                category = %e.category(),
                recoverable = e.is_recoverable(),
                error = %e,
                "Scheduler failed to start"
            );
            return Err(anyhow::Error::new(e).context("Failed to start scheduler"));
        }
    };

    tokio::spawn(log_events(scheduler.subscribe()));

    println!("Cycler scheduler");
    println!("================");
    println!("  Identities: {}", scheduler.identities().len());
    println!("  Proxy slots: {}", scheduler.pool().len());
    println!("  Cycle: {}s", config.scheduler.cycle_secs);

    if once {
        let report = scheduler.tick().await;
        println!();
        println!(
            "Tick complete: {} dispatched, {} succeeded, {} failed, {} cooling, {} suspended",
            report.dispatched, report.succeeded, report.failed, report.cooling, report.suspended
        );
        return Ok(());
    }

    tokio::select! {
        _ = scheduler.run() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutdown signal received, stopping scheduler");
        }
    }

    Ok(())
}

fn build_scheduler(config: &Config) -> cycler::error::Result<Scheduler<HttpCheckinExecutor>> {
    let executor = HttpCheckinExecutor::new(config.task.clone())?;
    Scheduler::from_config(config, executor)
}

/// Surface countdowns and proxy swaps at the right log levels
async fn log_events(mut events: broadcast::Receiver<SchedulerEvent>) {
    loop {
        match events.recv().await {
            Ok(SchedulerEvent::Cooling { key, remaining }) => {
                tracing::trace!(identity = %key, next_run = %format_remaining(remaining), "Cooling down");
            }
            Ok(SchedulerEvent::ProxyReplaced {
                key,
                slot,
                persisted: false,
                ..
            }) => {
                tracing::warn!(
                    identity = %key,
                    slot,
                    "Proxy replacement only kept in memory; a restart reverts it"
                );
            }
            Ok(SchedulerEvent::TickCompleted(report)) if report.dispatched > 0 => {
                tracing::info!(
                    tick = report.tick,
                    succeeded = report.succeeded,
                    failed = report.failed,
                    "Dispatch round finished"
                );
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Event logger lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
