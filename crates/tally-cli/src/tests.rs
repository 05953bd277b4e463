use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use tally_core::backend::InMemoryBackend;
use tally_core::config::TerminalConfig;
use tally_core::models::{OrderStatus, Resolution};
use tally_core::services::DatabaseService;
use tally_core::sync::DrainReport;
use tally_core::Engine;

use crate::cli::{CompletionShell, StrategyArg};
use crate::commands::close::{format_close_summary, run_close, run_close_check};
use crate::commands::common::{format_timestamp, load_config_with, parse_resolution};
use crate::commands::completions::run_completions;
use crate::commands::config::render_config;
use crate::commands::status::{collect_status, format_status_lines};
use crate::commands::sync::{format_drain_summary, run_sync};
use crate::error::CliError;

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
}

async fn engine() -> (Engine, Arc<InMemoryBackend>) {
    let backend = Arc::new(InMemoryBackend::new("T1"));
    let engine = Engine::new(
        TerminalConfig::new("T1", "https://pos.example.com"),
        DatabaseService::open_in_memory().await.unwrap(),
        backend.clone(),
    );
    (engine, backend)
}

fn no_env(_: &str) -> Option<String> {
    None
}

#[test]
fn parse_resolution_maps_strategies() {
    assert_eq!(
        parse_resolution(StrategyArg::LocalWins, None).unwrap(),
        Resolution::LocalWins
    );
    assert_eq!(
        parse_resolution(StrategyArg::RemoteWins, None).unwrap(),
        Resolution::RemoteWins
    );
    assert_eq!(
        parse_resolution(StrategyArg::ForceUpdate, None).unwrap(),
        Resolution::ForceUpdate
    );
    assert_eq!(
        parse_resolution(StrategyArg::ManualMerge, Some(r#"{"name":"Ada"}"#)).unwrap(),
        Resolution::ManualMerge(serde_json::json!({ "name": "Ada" }))
    );
}

#[test]
fn parse_resolution_checks_the_payload() {
    assert!(matches!(
        parse_resolution(StrategyArg::ManualMerge, None),
        Err(CliError::MissingMergePayload)
    ));
    assert!(matches!(
        parse_resolution(StrategyArg::ManualMerge, Some("{not json")),
        Err(CliError::InvalidPayload(_))
    ));
    assert!(matches!(
        parse_resolution(StrategyArg::LocalWins, Some("{}")),
        Err(CliError::UnexpectedPayload)
    ));
}

#[test]
fn load_config_reads_file_and_applies_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("terminal.json");
    std::fs::write(
        &path,
        r#"{"terminal_id":"T1","backend_url":"https://pos.example.com","drain_timeout_secs":30}"#,
    )
    .unwrap();

    let config = load_config_with(&path, |key| {
        (key == "TALLY_SUBORDINATES").then(|| "T2,T3".to_string())
    })
    .unwrap();
    assert_eq!(config.terminal_id, "T1");
    assert_eq!(config.drain_timeout_secs, 30);
    assert_eq!(config.subordinate_terminals, vec!["T2", "T3"]);
    assert!(config.is_coordinator());
}

#[test]
fn load_config_rejects_a_broken_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("terminal.json");
    std::fs::write(&path, r#"{"terminal_id":"T1""#).unwrap();

    let error = load_config_with(&path, no_env).unwrap_err();
    assert!(error.to_string().contains("invalid config"), "{error}");
}

#[test]
fn missing_config_file_falls_back_to_environment() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");

    assert!(matches!(
        load_config_with(&path, no_env),
        Err(CliError::NotConfigured(_))
    ));

    let config = load_config_with(&path, |key| match key {
        "TALLY_TERMINAL_ID" => Some("T7".to_string()),
        "TALLY_BACKEND_URL" => Some("http://localhost:8080".to_string()),
        _ => None,
    })
    .unwrap();
    assert_eq!(config.terminal_id, "T7");
    assert_eq!(config.backend_url, "http://localhost:8080");
}

#[test]
fn render_config_masks_the_token() {
    let mut config = TerminalConfig::new("T1", "https://pos.example.com");
    config.api_token = Some("secret-token".to_string());

    let rendered = render_config(&config).unwrap();
    assert!(rendered.contains("[REDACTED]"));
    assert!(!rendered.contains("secret-token"));

    let without_token = render_config(&TerminalConfig::new("T1", "https://pos.example.com")).unwrap();
    assert!(!without_token.contains("[REDACTED]"));
}

#[test]
fn format_timestamp_is_utc() {
    assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
    assert_eq!(format_timestamp(1_748_779_200_000), "2025-06-01 12:00:00 UTC");
}

#[test]
fn drain_summary_mentions_the_deadline() {
    let mut report = DrainReport {
        transmitted: 3,
        failed: 1,
        remaining: 1,
        ..DrainReport::default()
    };
    assert_eq!(
        format_drain_summary(&report),
        "Transmitted 3, failed 1, exhausted 0, conflicts 0; 1 remaining"
    );

    report.timed_out = true;
    assert!(format_drain_summary(&report).ends_with("(deadline reached)"));
}

#[test]
fn close_summary_lists_only_cleared_tables() {
    let summary = tally_core::close::CloseSummary {
        close_id: "close-T1-2025-06-01".to_string(),
        business_date: day(),
        deletions: BTreeMap::from([
            ("orders".to_string(), 4),
            ("payments".to_string(), 2),
            ("expenses".to_string(), 0),
        ]),
    };
    assert_eq!(
        format_close_summary(&summary),
        "Closed 2025-06-01 as close-T1-2025-06-01: removed orders=4 payments=2"
    );

    let empty = tally_core::close::CloseSummary {
        deletions: BTreeMap::new(),
        ..summary
    };
    assert!(format_close_summary(&empty).ends_with("nothing to remove"));
}

#[test]
fn completions_are_written_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tally.bash");

    run_completions(CompletionShell::Bash, Some(&path)).unwrap();

    let script = std::fs::read_to_string(&path).unwrap();
    assert!(script.contains("tally"));
}

#[tokio::test(flavor = "multi_thread")]
async fn fresh_terminal_status_has_never_closed() {
    let (engine, _) = engine().await;

    let status = collect_status(&engine).await.unwrap();
    assert_eq!(status.terminal_id, "T1");
    assert!(!status.coordinator);
    assert_eq!(status.queue_pending, 0);
    assert_eq!(status.open_conflicts, 0);

    let lines = format_status_lines(&status);
    assert_eq!(lines[0], "Terminal T1 (terminal)");
    assert!(lines.contains(&"Last close: never".to_string()));
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_command_drains_recorded_orders() {
    let (engine, backend) = engine().await;
    engine.ledger().record_order(day(), 1_250, "staff-1").await.unwrap();
    assert_eq!(collect_status(&engine).await.unwrap().queue_pending, 1);

    let report = run_sync(&engine, Some(5), true).await.unwrap();
    assert_eq!(report.transmitted, 1);
    assert_eq!(report.remaining, 0);
    assert_eq!(backend.record_count("orders"), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn blocked_close_is_reported_as_an_error() {
    let (engine, _) = engine().await;
    engine.ledger().record_order(day(), 900, "staff-1").await.unwrap();

    let report = run_close_check(&engine, day(), true).await.unwrap();
    assert_eq!(report.blockers, vec!["1 open order".to_string()]);

    let error = run_close(&engine, day(), false, true).await.unwrap_err();
    match error {
        CliError::CloseBlocked { state, reason } => {
            assert_eq!(state, "checking_preconditions");
            assert_eq!(reason, "1 open order");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn close_command_clears_the_day() {
    let (engine, backend) = engine().await;
    let order = engine.ledger().record_order(day(), 2_000, "staff-1").await.unwrap();
    engine
        .ledger()
        .update_order_status(&order.id, OrderStatus::Completed)
        .await
        .unwrap();
    engine
        .queue()
        .drain(Duration::from_secs(5), |_| {})
        .await
        .unwrap();

    let summary = run_close(&engine, day(), false, true).await.unwrap();
    assert_eq!(summary.deletions.get("orders"), Some(&1));
    assert_eq!(backend.submitted().len(), 1);

    let status = collect_status(&engine).await.unwrap();
    assert_eq!(status.last_close_date, Some(day()));
    assert!(status.unfinished_closes.is_empty());
}
