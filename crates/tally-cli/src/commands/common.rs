use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tally_core::close::CloseObserver;
use tally_core::config::TerminalConfig;
use tally_core::models::{
    format_minor, ConflictRecord, DayCloseSnapshot, IntegrityCheck, QueueEntry, Resolution,
};
use tally_core::Engine;

use crate::cli::StrategyArg;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct QueueEntryItem {
    pub id: i64,
    pub table_name: String,
    pub record_id: String,
    pub operation: String,
    pub status: String,
    pub attempts: u32,
    pub error_message: Option<String>,
    pub next_retry_at_iso: String,
    pub created_at_iso: String,
}

pub fn resolve_config_path(cli_config_path: Option<PathBuf>) -> PathBuf {
    cli_config_path
        .or_else(|| env::var_os("TALLY_CONFIG").map(PathBuf::from))
        .unwrap_or_else(default_config_path)
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tally")
        .join("terminal.json")
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("TALLY_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tally")
        .join("tally.db")
}

/// File configuration with `TALLY_*` overrides, or the environment alone
/// when the file does not exist
pub fn load_config(path: &Path) -> Result<TerminalConfig, CliError> {
    load_config_with(path, |key| env::var(key).ok())
}

pub fn load_config_with(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<TerminalConfig, CliError> {
    if path.exists() {
        let payload = std::fs::read_to_string(path)?;
        let mut config: TerminalConfig = serde_json::from_str(&payload).map_err(|error| {
            tally_core::Error::Configuration(format!(
                "invalid config {}: {error}",
                path.display()
            ))
        })?;
        config.apply_overrides(lookup)?;
        config.validate()?;
        return Ok(config);
    }

    let mut config = TerminalConfig::new("", "");
    config.apply_overrides(lookup)?;
    if config.terminal_id.is_empty() || config.backend_url.is_empty() {
        return Err(CliError::NotConfigured(path.display().to_string()));
    }
    config.validate()?;
    Ok(config)
}

pub async fn open_engine(
    config_path: &Path,
    db_path: &Path,
    observer: Option<Arc<dyn CloseObserver>>,
) -> Result<Engine, CliError> {
    let config = load_config(config_path)?;
    tracing::debug!("Opening terminal {} at {}", config.terminal_id, db_path.display());
    let engine = Engine::open(config, db_path).await?;
    Ok(match observer {
        Some(observer) => engine.with_close_observer(observer),
        None => engine,
    })
}

pub fn parse_resolution(
    strategy: StrategyArg,
    payload: Option<&str>,
) -> Result<Resolution, CliError> {
    match (strategy, payload) {
        (StrategyArg::ManualMerge, Some(payload)) => serde_json::from_str(payload)
            .map(Resolution::ManualMerge)
            .map_err(|error| CliError::InvalidPayload(error.to_string())),
        (StrategyArg::ManualMerge, None) => Err(CliError::MissingMergePayload),
        (_, Some(_)) => Err(CliError::UnexpectedPayload),
        (StrategyArg::LocalWins, None) => Ok(Resolution::LocalWins),
        (StrategyArg::RemoteWins, None) => Ok(Resolution::RemoteWins),
        (StrategyArg::ForceUpdate, None) => Ok(Resolution::ForceUpdate),
    }
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn queue_entry_to_item(entry: &QueueEntry) -> QueueEntryItem {
    QueueEntryItem {
        id: entry.id,
        table_name: entry.table_name.clone(),
        record_id: entry.record_id.clone(),
        operation: entry.operation.to_string(),
        status: entry.status.to_string(),
        attempts: entry.attempts,
        error_message: entry.error_message.clone(),
        next_retry_at_iso: format_timestamp(entry.next_retry_at),
        created_at_iso: format_timestamp(entry.created_at),
    }
}

pub fn format_queue_lines(entries: &[QueueEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let target = format!("{}/{}", entry.table_name, entry.record_id);
            let line = format!(
                "{:>6}  {:<9}  {:<6}  {target:<50}  attempts={}",
                entry.id,
                entry.status.as_str(),
                entry.operation.as_str(),
                entry.attempts
            );
            match &entry.error_message {
                Some(message) => format!(
                    "{line}  retry at {}  error: {message}",
                    format_timestamp(entry.next_retry_at)
                ),
                None => line,
            }
        })
        .collect()
}

pub fn format_conflict_lines(conflicts: &[ConflictRecord]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            let state = match (conflict.resolved, conflict.resolution_strategy) {
                (true, Some(strategy)) => format!("resolved ({strategy})"),
                (true, None) => "resolved".to_string(),
                (false, _) => "open".to_string(),
            };
            format!(
                "{:>5}  {}  {}/{}  local v{} remote v{}  {}  {state}",
                conflict.id,
                format_timestamp(conflict.created_at),
                conflict.entity_type,
                conflict.entity_id,
                conflict.local_version,
                conflict.remote_version,
                conflict.conflict_type,
            )
        })
        .collect()
}

pub fn format_integrity_lines(check: &IntegrityCheck) -> Vec<String> {
    let mut lines = vec![format!(
        "Integrity for {}: {}",
        check.business_date,
        if check.valid { "consistent" } else { "MISMATCH" }
    )];
    lines.extend(check.reports.iter().map(|report| {
        let marker = if report.is_consistent(check.tolerance_minor) {
            "ok "
        } else {
            "!! "
        };
        format!("{marker} {report}")
    }));
    lines
}

/// Z-report lines for a day-close snapshot
pub fn format_snapshot_lines(snapshot: &DayCloseSnapshot) -> Vec<String> {
    let totals = &snapshot.totals;
    let mut lines = vec![
        format!(
            "Z-REPORT {}  terminal {}",
            snapshot.business_date, snapshot.terminal_id
        ),
        format!("Generated {}", format_timestamp(snapshot.generated_at)),
        format!(
            "Orders {}  completed {}  cancelled {}  refunded {}",
            totals.order_count,
            totals.completed_orders,
            totals.cancelled_orders,
            totals.refunded_orders
        ),
        format!("Gross sales     {:>12}", format_minor(totals.gross_sales_minor)),
        format!("Refunds         {:>12}", format_minor(totals.refunds_minor)),
        format!("Expenses        {:>12}", format_minor(totals.expenses_minor)),
        format!("Driver payouts  {:>12}", format_minor(totals.driver_earnings_minor)),
        format!("Net             {:>12}", format_minor(totals.net_minor())),
    ];

    for (method, amount) in &totals.payments {
        lines.push(format!("  {method:<14}{:>12}", format_minor(*amount)));
    }
    for (staff_id, performance) in &totals.staff {
        lines.push(format!(
            "  staff {staff_id:<20} {:>4} orders {:>12}",
            performance.order_count,
            format_minor(performance.sales_minor)
        ));
    }
    if snapshot.terminals.len() > 1 {
        for (terminal_id, terminal) in &snapshot.terminals {
            lines.push(format!(
                "  terminal {terminal_id:<12} {:>12}",
                format_minor(terminal.gross_sales_minor)
            ));
        }
    }
    if !snapshot.missing_terminals.is_empty() {
        let missing = snapshot
            .missing_terminals
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("Missing terminals: {missing}"));
    }
    lines
}
