use chrono::NaiveDate;
use serde::Serialize;
use tally_core::Engine;

use crate::commands::common::format_timestamp;
use crate::error::CliError;

const CONFLICT_SCAN_LIMIT: usize = 1_000;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub terminal_id: String,
    pub coordinator: bool,
    pub queue_pending: u64,
    pub queue_in_flight: u64,
    pub queue_failed: u64,
    pub open_conflicts: usize,
    pub last_close_date: Option<NaiveDate>,
    pub last_close_at_iso: Option<String>,
    /// Committed closes whose local cleanup has not finished
    pub unfinished_closes: Vec<NaiveDate>,
}

pub async fn collect_status(engine: &Engine) -> Result<StatusReport, CliError> {
    let stats = engine.queue().stats().await?;
    let open_conflicts = engine
        .resolver()
        .conflicts(true, CONFLICT_SCAN_LIMIT)
        .await?
        .len();
    let unfinished_closes = engine
        .db()
        .pending_closes()
        .await?
        .into_iter()
        .map(|commit| commit.business_date)
        .collect();

    Ok(StatusReport {
        terminal_id: engine.config().terminal_id.clone(),
        coordinator: engine.config().is_coordinator(),
        queue_pending: stats.pending,
        queue_in_flight: stats.in_flight,
        queue_failed: stats.failed,
        open_conflicts,
        last_close_date: engine.db().last_business_date().await?,
        last_close_at_iso: engine.db().last_close_at().await?.map(format_timestamp),
        unfinished_closes,
    })
}

pub fn format_status_lines(status: &StatusReport) -> Vec<String> {
    let role = if status.coordinator {
        "coordinator"
    } else {
        "terminal"
    };
    let mut lines = vec![
        format!("Terminal {} ({role})", status.terminal_id),
        format!(
            "Queue: {} pending, {} in flight, {} failed",
            status.queue_pending, status.queue_in_flight, status.queue_failed
        ),
        format!("Open conflicts: {}", status.open_conflicts),
    ];
    match (&status.last_close_date, &status.last_close_at_iso) {
        (Some(date), Some(at)) => lines.push(format!("Last close: {date} at {at}")),
        (Some(date), None) => lines.push(format!("Last close: {date}")),
        _ => lines.push("Last close: never".to_string()),
    }
    if !status.unfinished_closes.is_empty() {
        let dates = status
            .unfinished_closes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!(
            "Unfinished closes: {dates} (run `tally close resume`)"
        ));
    }
    lines
}

pub async fn run_status(engine: &Engine, as_json: bool) -> Result<(), CliError> {
    let status = collect_status(engine).await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        for line in format_status_lines(&status) {
            println!("{line}");
        }
    }
    Ok(())
}
