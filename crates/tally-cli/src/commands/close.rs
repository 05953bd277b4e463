use chrono::NaiveDate;
use tally_core::close::{
    CloseObserver, CloseOptions, CloseOutcome, CloseState, CloseSummary, PreconditionReport,
};
use tally_core::models::DayCloseSnapshot;
use tally_core::Engine;

use crate::commands::common::format_snapshot_lines;
use crate::error::CliError;

/// Prints the Z-report and phase changes of a close to the terminal
pub struct ConsoleCloseObserver {
    quiet: bool,
}

impl ConsoleCloseObserver {
    pub const fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl CloseObserver for ConsoleCloseObserver {
    fn on_state(&self, state: CloseState) {
        if !self.quiet && state != CloseState::Idle {
            eprintln!("-> {state}");
        }
    }

    fn on_snapshot(&self, snapshot: &DayCloseSnapshot) {
        if self.quiet {
            return;
        }
        for line in format_snapshot_lines(snapshot) {
            println!("{line}");
        }
    }

    fn on_closed(&self, summary: &CloseSummary) {
        if !self.quiet {
            println!("{}", format_close_summary(summary));
        }
    }
}

pub fn format_close_summary(summary: &CloseSummary) -> String {
    let tables = summary
        .deletions
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(table, count)| format!("{table}={count}"))
        .collect::<Vec<_>>();
    let removed = if tables.is_empty() {
        "nothing to remove".to_string()
    } else {
        format!("removed {}", tables.join(" "))
    };
    format!(
        "Closed {} as {}: {removed}",
        summary.business_date, summary.close_id
    )
}

pub async fn run_close_check(
    engine: &Engine,
    date: NaiveDate,
    as_json: bool,
) -> Result<PreconditionReport, CliError> {
    let report = engine.finalizer().can_close(date).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.can_close() {
        println!("{date} can be closed");
    } else {
        println!("{date} cannot be closed: {}", report.message());
    }
    Ok(report)
}

pub async fn run_close(
    engine: &Engine,
    date: NaiveDate,
    skip_integrity: bool,
    as_json: bool,
) -> Result<CloseSummary, CliError> {
    let outcome = engine
        .finalizer()
        .close(date, CloseOptions { skip_integrity })
        .await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }

    match outcome {
        CloseOutcome::Completed(summary) => Ok(summary),
        CloseOutcome::Blocked(blocked) => Err(CliError::CloseBlocked {
            state: blocked.blocked_at.to_string(),
            reason: blocked.reason.to_string(),
        }),
    }
}

pub async fn run_close_resume(engine: &Engine) -> Result<Vec<CloseSummary>, CliError> {
    let resumed = engine.finalizer().resume_pending().await?;
    if resumed.is_empty() {
        println!("No interrupted closes to finish.");
    }
    Ok(resumed)
}
