//! Main orchestration logic for a backup run.

use crate::config::BackupConfig;
use crate::detect::ChangeDetector;
use crate::error::BackupError;
use crate::fetch::RemoteSource;
use crate::guard::{VisibilityGuard, VisibilityProbe};
use crate::store::SnapshotStore;
use crate::types::{RunOutcome, RunReport, SaveDecision};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// Whether the visibility check runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardMode {
    /// Query the repository visibility before every run.
    Enforce,
    /// Skip the check. Only for local testing; never honored in production.
    UnsafeSkip,
}

/// One backup run: guard, fetch, detect, store, trim, report.
pub struct BackupOrchestrator<'a, P, S> {
    config: &'a BackupConfig,
    probe: &'a P,
    source: &'a S,
    store: &'a SnapshotStore,
    guard_mode: GuardMode,
}

impl<'a, P: VisibilityProbe, S: RemoteSource> BackupOrchestrator<'a, P, S> {
    /// Orchestrator with the visibility check enforced.
    pub fn new(
        config: &'a BackupConfig,
        probe: &'a P,
        source: &'a S,
        store: &'a SnapshotStore,
    ) -> Self {
        Self {
            config,
            probe,
            source,
            store,
            guard_mode: GuardMode::Enforce,
        }
    }

    /// Requests a guard mode.
    ///
    /// `UnsafeSkip` is rejected with [`BackupError::Config`] unless the
    /// configuration carries a non-production environment marker.
    pub fn with_guard_mode(mut self, mode: GuardMode) -> Result<Self, BackupError> {
        if mode == GuardMode::UnsafeSkip && !self.config.is_non_production() {
            return Err(BackupError::Config(format!(
                "--unsafe-skip-visibility-check is refused in environment '{}'; set \
                 SNAPGUARD_ENV=development to use it for local testing",
                self.config.environment
            )));
        }
        self.guard_mode = mode;
        Ok(self)
    }

    /// Runs the pipeline, naming a new snapshot after the current time.
    pub async fn run(&self) -> Result<RunReport, BackupError> {
        self.run_at(Utc::now).await
    }

    /// Runs the pipeline; `now` is sampled when the snapshot is written.
    ///
    /// This is the main entry point. It performs the following steps:
    ///
    /// 1. Confirms the repository is private (fails closed)
    /// 2. Fetches the document, with no retry
    /// 3. Decides whether it differs from the latest snapshot
    /// 4. Writes the snapshot and trims old ones, or skips
    ///
    /// Any error aborts the remaining steps.
    pub async fn run_at<F>(&self, now: F) -> Result<RunReport, BackupError>
    where
        F: FnOnce() -> DateTime<Utc>,
    {
        match self.guard_mode {
            GuardMode::Enforce => {
                VisibilityGuard::new(self.probe, self.store).enforce().await?;
                info!("✅ Security check passed, continuing with backup");
            }
            GuardMode::UnsafeSkip => {
                warn!("🚨 UNSAFE: repository visibility check skipped by --unsafe-skip-visibility-check");
                warn!("🚨 Backups may be written to a publicly readable location");
            }
        }

        let document = self.source.fetch().await?;
        info!(
            "Fetched {} bytes ({})",
            document.body.len(),
            document.content_type.as_deref().unwrap_or("no content-type")
        );

        let decision = ChangeDetector::new(self.store, self.config.enable_change_detection)
            .should_save(&document.body)
            .await;

        let (outcome, digest) = match decision {
            SaveDecision::Skip { digest } => {
                info!("No change, nothing written");
                (RunOutcome::Skipped, Some(digest))
            }
            SaveDecision::Save { reason, digest } => {
                let snapshot = self.store.write(&document.body, now()).await?;

                let trim = self.store.trim(self.config.max_backups).await;

                (
                    RunOutcome::Saved {
                        snapshot,
                        reason,
                        trimmed: trim.removed,
                        trim_failures: trim.failures,
                    },
                    digest,
                )
            }
        };

        let retained = match self.store.list().await {
            Ok(ids) => Some(ids.len()),
            Err(e) => {
                warn!("⚠️  Could not count backups: {}", e);
                None
            }
        };

        Ok(RunReport {
            outcome,
            digest,
            document_bytes: document.body.len(),
            retained,
        })
    }
}
