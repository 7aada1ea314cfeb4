//! Pre-flight check that the backup repository is not publicly readable.
//!
//! Backups may contain credentials and personal data, so the check fails
//! closed: a public repository blocks the run, and so does any failure to
//! determine the visibility. The verification marker is provenance only and
//! never short-circuits the live check.

use crate::config::BackupConfig;
use crate::error::BackupError;
use crate::fetch::preview;
use crate::store::SnapshotStore;
use crate::types::VerificationMarker;
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Timeout for the repository metadata call.
pub const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of truth for the repository's visibility.
#[async_trait]
pub trait VisibilityProbe: Send + Sync {
    /// Identity of the repository being checked, for messages and the marker.
    fn repository(&self) -> &str;

    /// Returns whether the repository is private.
    async fn repository_is_private(&self) -> Result<bool, BackupError>;
}

/// Queries the GitHub REST API for the repository's `private` flag.
#[derive(Clone)]
pub struct GithubProbe {
    client: reqwest::Client,
    api_base_url: String,
    repository: String,
    token: String,
}

impl GithubProbe {
    /// Builds a probe for the repository named in `config`.
    pub fn new(config: &BackupConfig) -> Result<Self, BackupError> {
        let client = reqwest::Client::builder()
            .timeout(VISIBILITY_TIMEOUT)
            .user_agent(concat!("snapguard/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_base_url: config.api_base_url.clone(),
            repository: config.repo_identity.clone(),
            token: config.api_token.clone(),
        })
    }

    fn repository_url(&self) -> String {
        format!("{}/repos/{}", self.api_base_url, self.repository)
    }
}

#[async_trait]
impl VisibilityProbe for GithubProbe {
    fn repository(&self) -> &str {
        &self.repository
    }

    async fn repository_is_private(&self) -> Result<bool, BackupError> {
        let url = self.repository_url();

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("token {}", self.token))
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .map_err(|e| {
                BackupError::Transport(format!("Repository API request to {} failed: {}", url, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 404 {
                return Err(BackupError::Transport(format!(
                    "Repository '{}' not found or the token has no access to it (HTTP 404)",
                    self.repository
                )));
            }
            let body = response.text().await.unwrap_or_default();
            return Err(BackupError::Transport(format!(
                "Repository API returned HTTP {}: {}",
                status,
                preview(&body)
            )));
        }

        let metadata: serde_json::Value = response.json().await.map_err(|e| {
            BackupError::Parse(format!("Repository API returned malformed JSON: {}", e))
        })?;

        metadata
            .get("private")
            .and_then(serde_json::Value::as_bool)
            .ok_or_else(|| {
                BackupError::Parse(
                    "Repository API response has no boolean 'private' field".to_string(),
                )
            })
    }
}

/// Result of one visibility check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    /// The repository is private.
    Allowed,
    /// The repository is public.
    Blocked,
    /// The visibility could not be determined.
    Indeterminate(String),
}

/// Gatekeeper run before anything is fetched or written.
pub struct VisibilityGuard<'a, P> {
    probe: &'a P,
    store: &'a SnapshotStore,
}

impl<'a, P: VisibilityProbe> VisibilityGuard<'a, P> {
    /// Guard using `probe`, recording the marker in `store`.
    pub fn new(probe: &'a P, store: &'a SnapshotStore) -> Self {
        Self { probe, store }
    }

    /// Queries the live visibility.
    ///
    /// On the first `Allowed` result of the store's lifetime the verification
    /// marker is written; failing to write it is only a warning.
    pub async fn check(&self) -> GuardOutcome {
        info!("🔒 Checking repository visibility...");

        let outcome = match self.probe.repository_is_private().await {
            Ok(true) => GuardOutcome::Allowed,
            Ok(false) => GuardOutcome::Blocked,
            Err(e) => GuardOutcome::Indeterminate(e.to_string()),
        };

        if outcome == GuardOutcome::Allowed {
            info!("✅ Repository {} is private", self.probe.repository());
            let marker = VerificationMarker::private(self.probe.repository(), Utc::now());
            match self.store.write_marker(&marker).await {
                Ok(true) => info!("🎉 First visibility check passed, verification marker created"),
                Ok(false) => {}
                Err(e) => warn!("⚠️  Could not write verification marker: {}", e),
            }
        }

        outcome
    }

    /// Runs [`check`](Self::check) and turns anything but `Allowed` into
    /// [`BackupError::SecurityBlocked`].
    pub async fn enforce(&self) -> Result<(), BackupError> {
        let repository = self.probe.repository();
        match self.check().await {
            GuardOutcome::Allowed => Ok(()),
            GuardOutcome::Blocked => {
                error!("🚨 Repository {} is PUBLIC", repository);
                Err(BackupError::SecurityBlocked(format!(
                    "Repository {} is public. Backups may contain credentials and personal \
                     data and will not be written to a publicly readable location. Change the \
                     visibility at https://github.com/{}/settings",
                    repository, repository
                )))
            }
            GuardOutcome::Indeterminate(reason) => {
                error!("❌ Could not verify visibility of {}: {}", repository, reason);
                Err(BackupError::SecurityBlocked(format!(
                    "Could not verify that repository {} is private ({}). The backup is \
                     aborted until the visibility can be confirmed.",
                    repository, reason
                )))
            }
        }
    }
}
