use chrono::NaiveDate;
use tally_core::models::IntegrityCheck;
use tally_core::Engine;

use crate::commands::common::format_integrity_lines;
use crate::error::CliError;

pub async fn run_integrity(
    engine: &Engine,
    date: NaiveDate,
    as_json: bool,
) -> Result<IntegrityCheck, CliError> {
    let check = engine.integrity().check(date).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&check)?);
    } else {
        for line in format_integrity_lines(&check) {
            println!("{line}");
        }
    }
    Ok(check)
}
