//! Snapguard - scheduled JSON backups with change detection and a privacy guard
//!
//! This library downloads a JSON document from a management endpoint and keeps
//! a bounded history of timestamped snapshots of it, refusing to run when the
//! repository that holds the snapshots is publicly readable.
//!
//! # Features
//!
//! - **Visibility Guard**: Fails closed unless the backup repository is confirmed private
//! - **Change Detection**: Skips documents whose MD5 matches the latest snapshot
//! - **Atomic Snapshots**: Temp-file-and-rename writes, latest pointer repointed last
//! - **Retention**: Keeps the most recent `MAX_BACKUPS` snapshots
//!
//! # Example
//!
//! ```no_run
//! use snapguard::{BackupConfig, BackupOrchestrator, GithubProbe, HttpSource, SnapshotStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BackupConfig::from_env()?;
//! let probe = GithubProbe::new(&config)?;
//! let source = HttpSource::new(&config)?;
//! let store = SnapshotStore::new("backups");
//!
//! let report = BackupOrchestrator::new(&config, &probe, &source, &store)
//!     .run()
//!     .await?;
//! println!("skipped: {}", report.skipped());
//! # Ok(())
//! # }
//! ```

mod config;
mod detect;
mod error;
mod fetch;
mod fingerprint;
mod guard;
mod orchestrator;
mod store;
mod types;

pub use config::{normalize_base_url, BackupConfig, BACKUP_ENDPOINT_PATH, DEFAULT_MAX_BACKUPS};
pub use detect::ChangeDetector;
pub use error::{BackupError, FingerprintError};
pub use fetch::{HttpSource, RemoteSource};
pub use fingerprint::{fingerprint, fingerprint_file};
pub use guard::{GithubProbe, GuardOutcome, VisibilityGuard, VisibilityProbe};
pub use orchestrator::{BackupOrchestrator, GuardMode};
pub use store::{SnapshotStore, TrimReport};
pub use types::{
    Digest, RemoteDocument, RunOutcome, RunReport, SaveDecision, SaveReason, SnapshotId,
    VerificationMarker, LATEST_FILE, MARKER_FILE,
};
