use tally_core::util::pluralize;
use tally_core::Engine;

use crate::commands::common::{format_queue_lines, queue_entry_to_item, QueueEntryItem};
use crate::error::CliError;

pub async fn run_queue_list(engine: &Engine, limit: usize, as_json: bool) -> Result<(), CliError> {
    let entries = engine.queue().entries(limit).await?;

    if as_json {
        let json_items = entries
            .iter()
            .map(queue_entry_to_item)
            .collect::<Vec<QueueEntryItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    for line in format_queue_lines(&entries) {
        println!("{line}");
    }
    let total = engine.queue().len().await?;
    if total > entries.len() as u64 {
        println!("... {} more", total - entries.len() as u64);
    }
    Ok(())
}

pub async fn run_queue_retry(engine: &Engine) -> Result<u64, CliError> {
    let count = engine.queue().retry_all_failed().await?;
    println!(
        "{} queued for retry",
        pluralize(count, "failed entry", "failed entries")
    );
    Ok(count)
}
