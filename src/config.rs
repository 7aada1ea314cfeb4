//! Run configuration sourced from the environment.

use crate::error::BackupError;
use std::fmt;
use std::time::Duration;

/// Path appended to the base URL to reach the backup endpoint.
pub const BACKUP_ENDPOINT_PATH: &str = "/api/manage/sysConfig/backup?action=backup";

/// Default retention ceiling.
pub const DEFAULT_MAX_BACKUPS: usize = 100;

/// Default timeout for the document fetch.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default repository API base.
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// Configuration for one backup run.
///
/// Read once at startup and never mutated afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct BackupConfig {
    /// Base URL of the management service, normalized (scheme present, no trailing `/`).
    pub remote_base_url: String,
    /// Basic-auth username.
    pub username: String,
    /// Basic-auth password.
    pub password: String,
    /// Retention ceiling (default: 100).
    pub max_backups: usize,
    /// Whether unchanged documents are skipped (default: true).
    pub enable_change_detection: bool,
    /// Timeout for the document fetch (default: 30s).
    pub request_timeout: Duration,
    /// `owner/repo` of the repository holding the backup directory.
    pub repo_identity: String,
    /// Token used to query the repository visibility.
    pub api_token: String,
    /// Base URL of the repository API (default: `https://api.github.com`).
    pub api_base_url: String,
    /// Deployment marker; the unsafe guard bypass is refused in production.
    pub environment: String,
}

impl fmt::Debug for BackupConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupConfig")
            .field("remote_base_url", &self.remote_base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("max_backups", &self.max_backups)
            .field("enable_change_detection", &self.enable_change_detection)
            .field("request_timeout", &self.request_timeout)
            .field("repo_identity", &self.repo_identity)
            .field("api_token", &"<redacted>")
            .field("api_base_url", &self.api_base_url)
            .field("environment", &self.environment)
            .finish()
    }
}

impl BackupConfig {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, BackupError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration from an arbitrary key/value source.
    ///
    /// Blank values count as missing. All problems are reported as
    /// [`BackupError::Config`] before any network activity happens.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, BackupError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut missing = Vec::new();
        let mut required = |key: &'static str| {
            get(key).unwrap_or_else(|| {
                missing.push(key);
                String::new()
            })
        };

        let base_url = required("BACKUP_URL");
        let username = required("BACKUP_USERNAME");
        let password = required("BACKUP_PASSWORD");
        let repo_identity = required("GITHUB_REPOSITORY");
        let api_token = required("GITHUB_TOKEN");

        if !missing.is_empty() {
            return Err(BackupError::Config(format!(
                "Missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        let max_backups = match get("MAX_BACKUPS") {
            None => DEFAULT_MAX_BACKUPS,
            Some(raw) => parse_max_backups(&raw)?,
        };

        let enable_change_detection = match get("ENABLE_CHANGE_DETECTION") {
            None => true,
            Some(raw) => parse_flag(&raw).ok_or_else(|| {
                BackupError::Config(format!(
                    "ENABLE_CHANGE_DETECTION must be true/false/1/0/yes/no/on/off, got '{}'",
                    raw
                ))
            })?,
        };

        let request_timeout = match get("REQUEST_TIMEOUT") {
            None => DEFAULT_REQUEST_TIMEOUT,
            Some(raw) => parse_timeout(&raw)?,
        };

        if !repo_identity.contains('/') {
            return Err(BackupError::Config(format!(
                "GITHUB_REPOSITORY must have the form owner/repo, got '{}'",
                repo_identity
            )));
        }

        let config = Self {
            remote_base_url: normalize_base_url(&base_url),
            username,
            password,
            max_backups,
            enable_change_detection,
            request_timeout,
            repo_identity,
            api_token,
            api_base_url: get("GITHUB_API_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string()),
            environment: get("SNAPGUARD_ENV").unwrap_or_else(|| "production".to_string()),
        };

        Ok(config)
    }

    /// Full URL of the backup endpoint.
    pub fn backup_url(&self) -> String {
        format!("{}{}", self.remote_base_url, BACKUP_ENDPOINT_PATH)
    }

    /// Whether the deployment marker names a non-production environment.
    pub fn is_non_production(&self) -> bool {
        matches!(
            self.environment.to_ascii_lowercase().as_str(),
            "development" | "dev" | "local" | "test"
        )
    }
}

/// Adds `https://` when no scheme is given and drops trailing slashes.
///
/// Host, port and an explicit scheme are preserved verbatim.
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

fn parse_max_backups(raw: &str) -> Result<usize, BackupError> {
    match raw.parse::<usize>() {
        Ok(0) => Err(BackupError::Config(
            "MAX_BACKUPS must be a positive integer, got 0".to_string(),
        )),
        Ok(n) => Ok(n),
        Err(_) => Err(BackupError::Config(format!(
            "MAX_BACKUPS must be a positive integer, got '{}'",
            raw
        ))),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Accepts bare seconds (`45`) or a humantime duration (`45s`, `2m`).
fn parse_timeout(raw: &str) -> Result<Duration, BackupError> {
    let timeout = match raw.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => humantime::parse_duration(raw).map_err(|e| {
            BackupError::Config(format!("REQUEST_TIMEOUT '{}' is not a duration: {}", raw, e))
        })?,
    };
    if timeout.is_zero() {
        return Err(BackupError::Config(
            "REQUEST_TIMEOUT must be greater than zero".to_string(),
        ));
    }
    Ok(timeout)
}
