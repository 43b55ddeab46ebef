use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::{debug, info};

use crate::util::ensure_private_directory;

pub const DEFAULT_LOG_DIR: &str = "/var/log/security-updater";
pub const DEFAULT_REPORT_DIR: &str = "/var/lib/security-updater/reports";
pub const DEFAULT_ENVIRONMENT: &str = "production";
pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";
pub const DEFAULT_UPDATE_TIMEOUT_SECS: u64 = 1800;

const KNOWN_KEYS: &[&str] = &[
    "LOG_DIR",
    "REPORT_DIR",
    "SERVER_NAME",
    "ENVIRONMENT",
    "TELEGRAM_BOT_TOKEN",
    "TELEGRAM_CHAT_ID",
    "TELEGRAM_API_URL",
    "UPDATE_TIMEOUT_SECS",
    "EXTRA_ERROR_PATTERN",
    "IGNORE_ERROR_PATTERN",
];

#[derive(Clone)]
pub struct Settings {
    pub server_name: String,
    pub environment: String,
    pub log_dir: PathBuf,
    pub report_dir: PathBuf,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub telegram_api_url: String,
    pub update_timeout: Duration,
    pub extra_error_pattern: Option<Regex>,
    pub ignore_error_pattern: Option<Regex>,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("server_name", &self.server_name)
            .field("environment", &self.environment)
            .field("log_dir", &self.log_dir)
            .field("report_dir", &self.report_dir)
            .field(
                "telegram_bot_token",
                &self.telegram_bot_token.as_ref().map(|_| "<redacted>"),
            )
            .field("telegram_chat_id", &self.telegram_chat_id)
            .field("telegram_api_url", &self.telegram_api_url)
            .field("update_timeout", &self.update_timeout)
            .field("extra_error_pattern", &self.extra_error_pattern)
            .field("ignore_error_pattern", &self.ignore_error_pattern)
            .finish()
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let settings = Self::read(path)?;
        settings.prepare_directories()?;
        Ok(settings)
    }

    pub fn read(path: &Path) -> Result<Self> {
        if !path.is_file() {
            bail!("configuration file not found: {}", path.display());
        }

        let values = read_env_file(path)?;
        let settings = Self::from_sources(&values, |key| std::env::var(key).ok())?;

        info!(
            config = %path.display(),
            server = %settings.server_name,
            environment = %settings.environment,
            log_dir = %settings.log_dir.display(),
            report_dir = %settings.report_dir.display(),
            relay_configured = settings.relay_configured(),
            "loaded configuration"
        );

        Ok(settings)
    }

    pub fn from_sources<F>(file: &HashMap<String, String>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| -> Option<String> {
            file.get(key)
                .cloned()
                .or_else(|| env(key))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let update_timeout = match lookup("UPDATE_TIMEOUT_SECS") {
            Some(raw) => {
                let secs = raw
                    .parse::<u64>()
                    .with_context(|| format!("UPDATE_TIMEOUT_SECS is not a number: {raw}"))?;
                if secs == 0 {
                    bail!("UPDATE_TIMEOUT_SECS must be greater than zero");
                }
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(DEFAULT_UPDATE_TIMEOUT_SECS),
        };

        Ok(Self {
            server_name: lookup("SERVER_NAME").unwrap_or_else(default_server_name),
            environment: lookup("ENVIRONMENT").unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string()),
            log_dir: lookup("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR)),
            report_dir: lookup("REPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_REPORT_DIR)),
            telegram_bot_token: lookup("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: lookup("TELEGRAM_CHAT_ID"),
            telegram_api_url: lookup("TELEGRAM_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_TELEGRAM_API_URL.to_string()),
            update_timeout,
            extra_error_pattern: compile_optional("EXTRA_ERROR_PATTERN", lookup("EXTRA_ERROR_PATTERN"))?,
            ignore_error_pattern: compile_optional(
                "IGNORE_ERROR_PATTERN",
                lookup("IGNORE_ERROR_PATTERN"),
            )?,
        })
    }

    pub fn prepare_directories(&self) -> Result<()> {
        ensure_private_directory(&self.log_dir)
            .with_context(|| format!("log directory unusable: {}", self.log_dir.display()))?;
        ensure_private_directory(&self.report_dir).with_context(|| {
            format!("report directory unusable: {}", self.report_dir.display())
        })?;
        Ok(())
    }

    pub fn relay_configured(&self) -> bool {
        self.telegram_bot_token.is_some() && self.telegram_chat_id.is_some()
    }
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to open configuration file: {}", path.display()))?;

    let mut values = HashMap::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = assignment(line) else {
            bail!(
                "failed to parse configuration file {} at line {}: expected KEY=value",
                path.display(),
                index + 1
            );
        };
        if !KNOWN_KEYS.contains(&key) {
            debug!(key = %key, "ignoring unrecognized configuration key");
            continue;
        }
        values.insert(key.to_string(), value.to_string());
    }

    Ok(values)
}

// Values are literal: one pair of matching quotes is removed, backslashes and
// `$` are kept.
fn assignment(line: &str) -> Option<(&str, &str)> {
    let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }

    let value = value.trim();
    let unquoted = ['\'', '"']
        .iter()
        .find_map(|quote| value.strip_prefix(*quote)?.strip_suffix(*quote))
        .unwrap_or(value);
    Some((key, unquoted))
}

fn compile_optional(key: &str, pattern: Option<String>) -> Result<Option<Regex>> {
    pattern
        .map(|raw| Regex::new(&raw).with_context(|| format!("{key} is not a valid regex: {raw}")))
        .transpose()
}

fn default_server_name() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "unknown-host".to_string())
}
