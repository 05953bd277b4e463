//! Terminal configuration.
//!
//! A terminal is configured from a JSON file; `TALLY_*` environment variables
//! override individual values. Secrets (the API token) are redacted from
//! `Debug` output.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 20;
const DEFAULT_DRAIN_BATCH_SIZE: usize = 50;
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Retry schedule shared by every queue entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub multiplier: u32,
    pub ceiling_ms: u64,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 2_000,
            multiplier: 2,
            ceiling_ms: 300_000,
            max_attempts: 8,
        }
    }
}

/// Settings of one POS terminal
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TerminalConfig {
    pub terminal_id: String,
    pub backend_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    /// Terminals whose snapshots this terminal aggregates at day close
    #[serde(default)]
    pub subordinate_terminals: Vec<String>,
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
    #[serde(default = "default_drain_batch_size")]
    pub drain_batch_size: usize,
    /// Background drain interval; also the window for simultaneous updates
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Run the financial integrity check during day close
    #[serde(default = "default_true")]
    pub integrity_check: bool,
    /// Allowed absolute total difference in minor units
    #[serde(default)]
    pub integrity_tolerance_minor: i64,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

const fn default_drain_timeout_secs() -> u64 {
    DEFAULT_DRAIN_TIMEOUT_SECS
}

const fn default_drain_batch_size() -> usize {
    DEFAULT_DRAIN_BATCH_SIZE
}

const fn default_sync_interval_secs() -> u64 {
    DEFAULT_SYNC_INTERVAL_SECS
}

const fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

const fn default_true() -> bool {
    true
}

impl std::fmt::Debug for TerminalConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TerminalConfig")
            .field("terminal_id", &self.terminal_id)
            .field("backend_url", &self.backend_url)
            .field(
                "api_token",
                &self.api_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("subordinate_terminals", &self.subordinate_terminals)
            .field("drain_timeout_secs", &self.drain_timeout_secs)
            .field("drain_batch_size", &self.drain_batch_size)
            .field("sync_interval_secs", &self.sync_interval_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("integrity_check", &self.integrity_check)
            .field("integrity_tolerance_minor", &self.integrity_tolerance_minor)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl TerminalConfig {
    /// A configuration with defaults for everything but identity and backend
    pub fn new(terminal_id: impl Into<String>, backend_url: impl Into<String>) -> Self {
        Self {
            terminal_id: terminal_id.into(),
            backend_url: backend_url.into(),
            api_token: None,
            subordinate_terminals: Vec::new(),
            drain_timeout_secs: DEFAULT_DRAIN_TIMEOUT_SECS,
            drain_batch_size: DEFAULT_DRAIN_BATCH_SIZE,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            integrity_check: true,
            integrity_tolerance_minor: 0,
            backoff: BackoffConfig::default(),
        }
    }

    /// Parse and validate a JSON configuration
    pub fn from_json_str(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)
            .map_err(|error| Error::Configuration(format!("invalid config JSON: {error}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file and apply `TALLY_*` overrides from the environment
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let payload = std::fs::read_to_string(path).map_err(|error| {
            Error::Configuration(format!("cannot read {}: {error}", path.display()))
        })?;
        let mut config: Self = serde_json::from_str(&payload)
            .map_err(|error| Error::Configuration(format!("invalid config JSON: {error}")))?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TALLY_*` overrides read through `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| normalize_text_option(lookup(key));

        if let Some(value) = get("TALLY_TERMINAL_ID") {
            self.terminal_id = value;
        }
        if let Some(value) = get("TALLY_BACKEND_URL") {
            self.backend_url = value;
        }
        if let Some(value) = get("TALLY_API_TOKEN") {
            self.api_token = Some(value);
        }
        if let Some(value) = get("TALLY_SUBORDINATES") {
            self.subordinate_terminals = value
                .split(',')
                .filter_map(|id| normalize_text_option(Some(id.to_string())))
                .collect();
        }
        if let Some(value) = get("TALLY_DRAIN_TIMEOUT_SECS") {
            self.drain_timeout_secs = parse_number("TALLY_DRAIN_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = get("TALLY_SYNC_INTERVAL_SECS") {
            self.sync_interval_secs = parse_number("TALLY_SYNC_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = get("TALLY_INTEGRITY_CHECK") {
            self.integrity_check = matches!(
                value.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        if let Some(value) = get("TALLY_INTEGRITY_TOLERANCE_MINOR") {
            self.integrity_tolerance_minor =
                parse_number("TALLY_INTEGRITY_TOLERANCE_MINOR", &value)?;
        }
        Ok(())
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.terminal_id.trim().is_empty() {
            return Err(Error::Configuration(
                "terminal_id must not be empty".to_string(),
            ));
        }
        if !is_http_url(self.backend_url.trim()) {
            return Err(Error::Configuration(
                "backend_url must include http:// or https://".to_string(),
            ));
        }
        if self.subordinate_terminals.contains(&self.terminal_id) {
            return Err(Error::Configuration(format!(
                "terminal {} cannot be its own subordinate",
                self.terminal_id
            )));
        }
        if self.drain_batch_size == 0 {
            return Err(Error::Configuration(
                "drain_batch_size must be at least 1".to_string(),
            ));
        }
        if self.integrity_tolerance_minor < 0 {
            return Err(Error::Configuration(
                "integrity_tolerance_minor must not be negative".to_string(),
            ));
        }
        if self.backoff.max_attempts == 0 || self.backoff.multiplier == 0 {
            return Err(Error::Configuration(
                "backoff max_attempts and multiplier must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether this terminal aggregates other terminals at day close
    pub fn is_coordinator(&self) -> bool {
        !self.subordinate_terminals.is_empty()
    }

    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub const fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Configuration(format!("{key} must be a number, got '{value}'")))
}
