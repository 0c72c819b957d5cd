//! Process configuration.
//!
//! Loaded once at startup and passed explicitly into the gate, the ledger and
//! the report transports. Nothing here changes while the process runs.
//!
//! ```json
//! {
//!   "allow_list": ["12345", "67890", "54321", "98765"],
//!   "identifier_length": 5,
//!   "ledger_path": "/var/lib/latexgate/usage_ledger.jsonl",
//!   "report": {
//!     "delivery": "webhook",
//!     "webhook_url": "https://reports.example.edu/usage",
//!     "timeout_secs": 30,
//!     "interval_secs": 86400
//!   }
//! }
//! ```
//!
//! Environment overrides, applied after the file:
//!
//! - `LATEXGATE_ALLOW_LIST`: comma-separated identifiers
//! - `LATEXGATE_LEDGER`: ledger file path
//! - `LATEXGATE_WEBHOOK_TOKEN`: bearer token for webhook delivery
//! - `LATEXGATE_EMAIL_PASSWORD`: SMTP password for email delivery

use crate::error::{LatexGateError, Result, ResultExt as _};
use crate::gate::{AllowList, DEFAULT_IDENTIFIER_LENGTH, IdentifierGate};
use crate::ledger::LEDGER_FILE_NAME;
use crate::report::delivery::{
    DEFAULT_DELIVERY_TIMEOUT, DEFAULT_SMTP_HOST, DEFAULT_SMTP_PORT, EmailDelivery, OutboxDelivery,
    WebhookDelivery,
};
use crate::report::schedule::DEFAULT_REPORT_INTERVAL;
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_ALLOW_LIST: &str = "LATEXGATE_ALLOW_LIST";
pub const ENV_LEDGER: &str = "LATEXGATE_LEDGER";
pub const ENV_WEBHOOK_TOKEN: &str = "LATEXGATE_WEBHOOK_TOKEN";
pub const ENV_EMAIL_PASSWORD: &str = "LATEXGATE_EMAIL_PASSWORD";

/// Placeholder written instead of a real token when config is saved.
pub const REDACTED_PLACEHOLDER: &str = "__REDACTED__";

/// Application directories under the platform data directory.
#[derive(Debug, Clone)]
pub struct StandardPaths {
    pub base_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub outbox_dir: PathBuf,
}

/// Platform defaults, e.g. `~/.local/share/latexgate` on Linux.
pub fn standard_paths() -> StandardPaths {
    let base_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("latexgate");
    StandardPaths {
        logs_dir: base_dir.join("logs"),
        outbox_dir: base_dir.join("outbox"),
        base_dir,
    }
}

/// Default config file location, e.g. `~/.config/latexgate/config.json`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("latexgate")
        .join("config.json")
}

/// Which transport the report cycle uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryKind {
    Outbox,
    Webhook,
    Email,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub delivery: DeliveryKind,
    pub outbox_dir: PathBuf,
    pub webhook_url: Option<String>,
    #[serde(
        serialize_with = "serialize_token",
        deserialize_with = "deserialize_token"
    )]
    pub webhook_token: Option<SecretString>,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub email_sender: Option<String>,
    pub email_receiver: Option<String>,
    #[serde(
        serialize_with = "serialize_token",
        deserialize_with = "deserialize_token"
    )]
    pub email_password: Option<SecretString>,
    pub timeout_secs: u64,
    pub interval_secs: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            delivery: DeliveryKind::Outbox,
            outbox_dir: standard_paths().outbox_dir,
            webhook_url: None,
            webhook_token: None,
            smtp_host: DEFAULT_SMTP_HOST.to_owned(),
            smtp_port: DEFAULT_SMTP_PORT,
            email_sender: None,
            email_receiver: None,
            email_password: None,
            timeout_secs: DEFAULT_DELIVERY_TIMEOUT.as_secs(),
            interval_secs: DEFAULT_REPORT_INTERVAL.as_secs(),
        }
    }
}

impl ReportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub allow_list: Vec<String>,
    pub identifier_length: usize,
    pub ledger_path: PathBuf,
    pub log_dir: PathBuf,
    pub report: ReportConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let paths = standard_paths();
        Self {
            allow_list: Vec::new(),
            identifier_length: DEFAULT_IDENTIFIER_LENGTH,
            ledger_path: paths.base_dir.join(LEDGER_FILE_NAME),
            log_dir: paths.logs_dir,
            report: ReportConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `path`, then apply environment overrides.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from `path` without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| LatexGateError::Config(format!("{}: {e}", path.display())))?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(list) = lookup(ENV_ALLOW_LIST) {
            self.allow_list = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect();
        }
        if let Some(ledger) = lookup(ENV_LEDGER).filter(|s| !s.is_empty()) {
            self.ledger_path = PathBuf::from(ledger);
        }
        if let Some(token) = lookup(ENV_WEBHOOK_TOKEN).filter(|s| !s.is_empty()) {
            self.report.webhook_token = Some(SecretString::new(token.into()));
        }
        if let Some(password) = lookup(ENV_EMAIL_PASSWORD).filter(|s| !s.is_empty()) {
            self.report.email_password = Some(SecretString::new(password.into()));
        }
    }

    /// Save configuration as pretty JSON. Secrets are written redacted.
    ///
    /// # Errors
    ///
    /// Returns error if the directory or file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    /// Build the allow-list gate.
    ///
    /// # Errors
    ///
    /// Returns [`LatexGateError::Config`] if the allow-list is empty or
    /// contains invalid or duplicate identifiers.
    pub fn gate(&self) -> Result<IdentifierGate> {
        if self.allow_list.is_empty() {
            return Err(LatexGateError::Config(format!(
                "allow_list is empty; set it in the config file or {ENV_ALLOW_LIST}"
            )));
        }
        let allow_list = AllowList::new(&self.allow_list, self.identifier_length)?;
        Ok(IdentifierGate::new(allow_list))
    }

    /// Check everything that can be checked without touching the network.
    ///
    /// # Errors
    ///
    /// Returns [`LatexGateError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.validate_gate()?;
        self.validate_report()
    }

    /// Check the settings sign-in needs: a usable allow-list.
    ///
    /// # Errors
    ///
    /// Returns [`LatexGateError::Config`] if the allow-list is empty or invalid.
    pub fn validate_gate(&self) -> Result<()> {
        if self.identifier_length == 0 {
            return Err(LatexGateError::Config(
                "identifier_length must be positive".to_owned(),
            ));
        }
        self.gate().map(|_| ())
    }

    /// Check the settings the report cycle needs for the chosen transport.
    ///
    /// # Errors
    ///
    /// Returns [`LatexGateError::Config`] if a required setting is missing or
    /// out of range.
    pub fn validate_report(&self) -> Result<()> {
        let report = &self.report;
        if report.timeout_secs == 0 {
            return Err(LatexGateError::Config(
                "report.timeout_secs must be positive".to_owned(),
            ));
        }
        match report.delivery {
            DeliveryKind::Outbox => Ok(()),
            DeliveryKind::Webhook => {
                if report.webhook_url.as_deref().is_none_or(str::is_empty) {
                    return Err(LatexGateError::Config(
                        "report.webhook_url is required for webhook delivery".to_owned(),
                    ));
                }
                Ok(())
            }
            DeliveryKind::Email => {
                let missing = [
                    ("report.email_sender", report.email_sender.is_none()),
                    ("report.email_receiver", report.email_receiver.is_none()),
                    ("report.email_password", report.email_password.is_none()),
                    ("report.smtp_host", report.smtp_host.is_empty()),
                ]
                .into_iter()
                .find_map(|(name, absent)| absent.then_some(name));
                match missing {
                    Some(name) => Err(LatexGateError::Config(format!(
                        "{name} is required for email delivery"
                    ))),
                    None => Ok(()),
                }
            }
        }
    }

    pub fn outbox_delivery(&self) -> OutboxDelivery {
        OutboxDelivery::new(&self.report.outbox_dir)
    }

    /// Build the webhook transport. Call outside any async runtime.
    ///
    /// # Errors
    ///
    /// Returns [`LatexGateError::Config`] if no URL is configured.
    pub fn webhook_delivery(&self) -> Result<WebhookDelivery> {
        let url = self.report.webhook_url.clone().ok_or_else(|| {
            LatexGateError::Config("report.webhook_url is not set".to_owned())
        })?;
        WebhookDelivery::new(
            url,
            self.report.webhook_token.clone(),
            self.report.timeout(),
        )
    }

    /// Build the email transport from the `report` section.
    ///
    /// # Errors
    ///
    /// Returns [`LatexGateError::Config`] if sender, receiver or password is
    /// missing or an address is invalid.
    pub fn email_delivery(&self) -> Result<EmailDelivery> {
        let report = &self.report;
        let sender = required(report.email_sender.as_deref(), "report.email_sender")?;
        let receiver = required(report.email_receiver.as_deref(), "report.email_receiver")?;
        let password = report.email_password.as_ref().ok_or_else(|| {
            LatexGateError::Config(format!(
                "report.email_password is not set; use {ENV_EMAIL_PASSWORD}"
            ))
        })?;
        EmailDelivery::new(
            &report.smtp_host,
            report.smtp_port,
            sender,
            receiver,
            password,
            report.timeout(),
        )
    }
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str> {
    value.ok_or_else(|| LatexGateError::Config(format!("{name} is not set")))
}

fn serialize_token<S>(token: &Option<SecretString>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match token {
        Some(secret) if !secret.expose_secret().is_empty() => {
            serializer.serialize_some(REDACTED_PLACEHOLDER)
        }
        _ => serializer.serialize_none(),
    }
}

fn deserialize_token<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .filter(|s| !s.is_empty() && s != REDACTED_PLACEHOLDER)
        .map(|s| SecretString::new(s.into())))
}
