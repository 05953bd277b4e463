use std::time::Duration;

use tally_core::sync::DrainReport;
use tally_core::Engine;
use tokio::sync::broadcast::error::RecvError;

use crate::error::CliError;

pub async fn run_sync(
    engine: &Engine,
    timeout_secs: Option<u64>,
    as_json: bool,
) -> Result<DrainReport, CliError> {
    let deadline = timeout_secs.map_or_else(|| engine.config().drain_timeout(), Duration::from_secs);
    let report = engine
        .queue()
        .drain(deadline, |progress| {
            tracing::info!(
                "Transmitted {} ({} failed) after {:.1}s",
                progress.transmitted,
                progress.failed,
                progress.elapsed.as_secs_f64()
            );
        })
        .await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", format_drain_summary(&report));
    }
    Ok(report)
}

pub fn format_drain_summary(report: &DrainReport) -> String {
    let mut summary = format!(
        "Transmitted {}, failed {}, exhausted {}, conflicts {}; {} remaining",
        report.transmitted, report.failed, report.exhausted, report.conflicts, report.remaining
    );
    if report.timed_out {
        summary.push_str(" (deadline reached)");
    }
    summary
}

/// Drain in the background and print queue events as JSON lines until Ctrl-C
pub async fn run_sync_watch(engine: &Engine) -> Result<(), CliError> {
    let mut events = engine.queue().subscribe();
    let drain = engine.spawn_background_drain();
    eprintln!(
        "Draining every {}s; press Ctrl-C to stop",
        engine.config().sync_interval_secs
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                break;
            }
            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Skipped {skipped} queue event(s)");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    drain.shutdown().await;
    Ok(())
}
