use std::path::Path;

use tally_core::config::TerminalConfig;

use crate::commands::common::load_config;
use crate::error::CliError;

/// Effective configuration as JSON, with the API token masked
pub fn render_config(config: &TerminalConfig) -> Result<String, CliError> {
    let mut value = serde_json::to_value(config)?;
    if let Some(token) = value.get_mut("api_token") {
        if !token.is_null() {
            *token = serde_json::Value::String("[REDACTED]".to_string());
        }
    }
    Ok(serde_json::to_string_pretty(&value)?)
}

pub fn run_config_show(config_path: &Path) -> Result<(), CliError> {
    let config = load_config(config_path)?;
    println!("# {}", config_path.display());
    println!("{}", render_config(&config)?);
    Ok(())
}
