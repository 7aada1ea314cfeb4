//! Decides whether a freshly fetched document needs a new snapshot.

use crate::fingerprint::fingerprint;
use crate::store::SnapshotStore;
use crate::types::{SaveDecision, SaveReason};
use tracing::{info, warn};

/// Compares new documents against the store's latest pointer.
pub struct ChangeDetector<'a> {
    store: &'a SnapshotStore,
    enabled: bool,
}

impl<'a> ChangeDetector<'a> {
    /// Detector over `store`; when `enabled` is false every document is saved.
    pub fn new(store: &'a SnapshotStore, enabled: bool) -> Self {
        Self { store, enabled }
    }

    /// Returns `Skip` only when the new bytes provably equal the baseline.
    ///
    /// A failed digest forces `Save`: an extra snapshot is cheap, a silently
    /// lost change is not.
    pub async fn should_save(&self, content: &[u8]) -> SaveDecision {
        if !self.enabled {
            info!("Change detection disabled, saving backup");
            return SaveDecision::Save {
                reason: SaveReason::DetectionDisabled,
                digest: fingerprint(content).await.ok(),
            };
        }

        let new_digest = match fingerprint(content).await {
            Ok(digest) => digest,
            Err(e) => {
                warn!("⚠️  Could not hash new data ({}), forcing backup", e);
                return SaveDecision::Save {
                    reason: SaveReason::FingerprintUnavailable,
                    digest: None,
                };
            }
        };

        let Some(baseline) = self.store.read_latest().await else {
            info!("No previous backup data, saving first backup");
            return SaveDecision::Save {
                reason: SaveReason::NoBaseline,
                digest: Some(new_digest),
            };
        };

        let baseline_digest = match fingerprint(&baseline).await {
            Ok(digest) => digest,
            Err(e) => {
                warn!("⚠️  Could not hash latest backup ({}), forcing backup", e);
                return SaveDecision::Save {
                    reason: SaveReason::FingerprintUnavailable,
                    digest: Some(new_digest),
                };
            }
        };

        if new_digest == baseline_digest {
            info!("Data unchanged (md5 {}), skipping backup", new_digest);
            SaveDecision::Skip { digest: new_digest }
        } else {
            info!(
                "Data changed (md5 {} -> {}), saving new backup",
                baseline_digest, new_digest
            );
            SaveDecision::Save {
                reason: SaveReason::Changed,
                digest: Some(new_digest),
            }
        }
    }
}
