use tally_core::models::VersionedEntity;
use tally_core::sync::ResolutionOutcome;
use tally_core::Engine;

use crate::cli::StrategyArg;
use crate::commands::common::{format_conflict_lines, parse_resolution};
use crate::error::CliError;

pub async fn run_conflicts_list(
    engine: &Engine,
    limit: usize,
    include_resolved: bool,
    as_json: bool,
) -> Result<(), CliError> {
    let conflicts = engine.resolver().conflicts(!include_resolved, limit).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&conflicts)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No conflicts recorded.");
        return Ok(());
    }

    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_conflicts_resolve(
    engine: &Engine,
    id: i64,
    strategy: StrategyArg,
    payload: Option<&str>,
    resolved_by: &str,
) -> Result<VersionedEntity, CliError> {
    let resolution = parse_resolution(strategy, payload)?;
    match engine
        .resolver()
        .resolve_conflict(id, resolution, resolved_by.trim())
        .await?
    {
        ResolutionOutcome::Resolved { conflict, entity } => {
            println!(
                "Resolved conflict {} on {}/{}: now at version {}",
                conflict.id, entity.entity_type, entity.id, entity.version
            );
            Ok(entity)
        }
        ResolutionOutcome::Reconflicted(again) => Err(CliError::Reconflicted {
            original: id,
            replacement: again.id,
        }),
    }
}
