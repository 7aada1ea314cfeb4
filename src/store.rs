//! Snapshot directory: timestamped files, the latest pointer and retention.
//!
//! Layout of the store directory:
//!
//! - `backup_YYYYMMDD_HHMMSS.json` - one immutable file per accepted document
//! - `latest_backup.json` - byte-identical copy of the newest snapshot
//! - `.privacy_verified` - one-time visibility verification marker
//!
//! The latest pointer is only replaced after the new snapshot is durably on
//! disk, and both are written through a temp file plus rename.

use crate::error::BackupError;
use crate::types::{SnapshotId, VerificationMarker, LATEST_FILE, MARKER_FILE};
use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

/// Result of a retention pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrimReport {
    /// Snapshots deleted, oldest first.
    pub removed: Vec<SnapshotId>,
    /// Deletions that failed and were skipped.
    pub failures: usize,
}

/// Versioned storage for snapshots of a single source.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Store rooted at `dir`. Nothing is created until the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the latest pointer.
    pub fn latest_path(&self) -> PathBuf {
        self.dir.join(LATEST_FILE)
    }

    /// Path of the verification marker.
    pub fn marker_path(&self) -> PathBuf {
        self.dir.join(MARKER_FILE)
    }

    /// Path of a snapshot file.
    pub fn snapshot_path(&self, id: &SnapshotId) -> PathBuf {
        self.dir.join(id.file_name())
    }

    /// Lists snapshot identities, oldest first.
    ///
    /// A missing directory is an empty store. Entries whose names don't
    /// follow the snapshot pattern are ignored; any entry that does (file,
    /// directory or symlink) is listed, since it occupies that name.
    pub async fn list(&self) -> Result<Vec<SnapshotId>, BackupError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BackupError::IoError(e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(id) = name.to_str().and_then(SnapshotId::parse) {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }

    /// Reads the latest pointer.
    ///
    /// Returns `None` when there is no pointer, or when it cannot be read or
    /// is not valid JSON. A damaged pointer only means "no baseline"; the
    /// next save replaces it.
    pub async fn read_latest(&self) -> Option<Vec<u8>> {
        let path = self.latest_path();
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No latest backup found at {}, this is the first backup", path.display());
                return None;
            }
            Err(e) => {
                warn!("⚠️  Failed to read {}: {}, treating as no baseline", path.display(), e);
                return None;
            }
        };

        if let Err(e) = serde_json::from_slice::<serde::de::IgnoredAny>(&content) {
            warn!(
                "⚠️  {} is not valid JSON ({}), treating as no baseline",
                path.display(),
                e
            );
            return None;
        }

        Some(content)
    }

    /// Writes a new snapshot and repoints the latest pointer at it.
    ///
    /// The snapshot is named from `timestamp`. If that name is taken, or the
    /// newest existing snapshot sorts after it, the identity is bumped past
    /// the newest one so the new file is always the newest entry.
    ///
    /// # Returns
    ///
    /// The new snapshot's identity. On error neither a new snapshot nor a
    /// changed latest pointer is left behind.
    pub async fn write(
        &self,
        content: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Result<SnapshotId, BackupError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            BackupError::StoreWrite(format!(
                "Failed to create backup directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        self.sweep_temp_files().await;

        let existing = self.list().await.map_err(|e| {
            BackupError::StoreWrite(format!(
                "Failed to list backup directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;
        let id = next_id(existing.last(), timestamp).ok_or_else(|| {
            BackupError::StoreWrite(format!(
                "No snapshot name left after {} in {}",
                existing.last().map(|id| id.file_name()).unwrap_or_default(),
                self.dir.display()
            ))
        })?;
        let snapshot_path = self.snapshot_path(&id);

        write_new(&snapshot_path, content).await.map_err(|e| {
            BackupError::StoreWrite(format!(
                "Failed to write backup file {}: {}",
                snapshot_path.display(),
                e
            ))
        })?;
        info!("Backup file saved: {}", snapshot_path.display());

        let latest_path = self.latest_path();
        if let Err(e) = write_atomic(&latest_path, content).await {
            if let Err(rm) = tokio::fs::remove_file(&snapshot_path).await {
                warn!(
                    "Failed to roll back {} after pointer update failure: {}",
                    snapshot_path.display(),
                    rm
                );
            }
            return Err(BackupError::StoreWrite(format!(
                "Failed to update latest backup {}: {}",
                latest_path.display(),
                e
            )));
        }
        info!("Latest backup updated: {}", latest_path.display());

        Ok(id)
    }

    /// Deletes the oldest snapshots until at most `max_backups` remain.
    ///
    /// The newest snapshot is never deleted, even for `max_backups == 0`.
    /// Failed deletions are logged and counted, not raised. A directory that
    /// cannot be listed counts as one failure and nothing is deleted.
    pub async fn trim(&self, max_backups: usize) -> TrimReport {
        let ids = match self.list().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(
                    "⚠️  Cleanup of old backups skipped, cannot list {}: {}",
                    self.dir.display(),
                    e
                );
                return TrimReport {
                    removed: Vec::new(),
                    failures: 1,
                };
            }
        };
        let keep = max_backups.max(1);

        if ids.len() <= keep {
            info!(
                "{} backup file(s) present, no cleanup needed (limit {})",
                ids.len(),
                keep
            );
            return TrimReport::default();
        }

        let excess = ids.len() - keep;
        let mut report = TrimReport::default();

        for id in &ids[..excess] {
            let path = self.snapshot_path(id);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!("Deleted old backup {}", id);
                    report.removed.push(*id);
                }
                Err(e) => {
                    warn!("⚠️  Failed to delete old backup {}: {}", path.display(), e);
                    report.failures += 1;
                }
            }
        }

        info!(
            "Deleted {} old backup file(s), keeping the latest {}",
            report.removed.len(),
            keep
        );
        report
    }

    /// Writes the verification marker unless one already exists.
    ///
    /// # Returns
    ///
    /// `Ok(true)` if the marker was created by this call.
    pub async fn write_marker(&self, marker: &VerificationMarker) -> Result<bool, BackupError> {
        let path = self.marker_path();
        if tokio::fs::try_exists(&path).await? {
            return Ok(false);
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_vec_pretty(marker)?;
        write_atomic(&path, &json).await?;
        Ok(true)
    }

    /// Reads the verification marker, if present and well-formed.
    pub async fn read_marker(&self) -> Option<VerificationMarker> {
        let content = tokio::fs::read(self.marker_path()).await.ok()?;
        serde_json::from_slice(&content).ok()
    }

    /// Removes temp files a crashed run left next to the files they were for.
    async fn sweep_temp_files(&self) {
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(target) = name
                .to_str()
                .and_then(|n| n.strip_prefix('.'))
                .and_then(|n| n.strip_suffix(".tmp"))
            else {
                continue;
            };
            if target != LATEST_FILE
                && target != MARKER_FILE
                && SnapshotId::parse(target).is_none()
            {
                continue;
            }

            let path = entry.path();
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("Removed stale temp file {}", path.display()),
                Err(e) => debug!("Failed to remove stale temp file {}: {}", path.display(), e),
            }
        }
    }
}

/// Picks the identity for a capture at `timestamp` that sorts after `newest`.
///
/// When the sequence of `newest` is exhausted the name moves to the next
/// second. `None` only if that second is out of range too.
fn next_id(newest: Option<&SnapshotId>, timestamp: DateTime<Utc>) -> Option<SnapshotId> {
    let candidate = SnapshotId::new(timestamp, 0);
    match newest {
        Some(newest) if *newest >= candidate => {
            if newest.timestamp != candidate.timestamp {
                warn!(
                    "⚠️  Clock is behind the newest backup {}, naming the new backup after it",
                    newest
                );
            }
            match newest.sequence.checked_add(1) {
                Some(sequence) => Some(SnapshotId {
                    timestamp: newest.timestamp,
                    sequence,
                }),
                None => newest
                    .timestamp
                    .checked_add_signed(chrono::Duration::seconds(1))
                    .map(|timestamp| SnapshotId {
                        timestamp,
                        sequence: 0,
                    }),
            }
        }
        _ => Some(candidate),
    }
}

/// Like [`write_atomic`], but fails with `AlreadyExists` instead of replacing
/// an existing entry (file, directory or symlink) at `path`.
async fn write_new(path: &Path, content: &[u8]) -> io::Result<()> {
    if tokio::fs::symlink_metadata(path).await.is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", path.display()),
        ));
    }
    write_atomic(path, content).await
}

/// Writes `content` to `path` through a synced temp file and a rename.
async fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::other(format!("Invalid file name: {}", path.display())))?;
    let temp_path = path.with_file_name(format!(".{}.tmp", file_name));

    let result = async {
        let mut file = BufWriter::new(tokio::fs::File::create(&temp_path).await?);
        file.write_all(content).await?;
        file.flush().await?;
        file.get_ref().sync_all().await?;
        tokio::fs::rename(&temp_path, path).await
    }
    .await;

    if result.is_err() {
        if let Err(rm) = tokio::fs::remove_file(&temp_path).await {
            debug!("Failed to remove temp file {}: {}", temp_path.display(), rm);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn create_test_store() -> (SnapshotStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path().join("backups"));
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_empty_store() {
        let (store, _temp) = create_test_store();
        assert!(store.list().await.unwrap().is_empty());
        assert!(store.read_latest().await.is_none());
        assert!(!store.dir().exists());
    }

    #[tokio::test]
    async fn test_write_creates_snapshot_and_latest() {
        let (store, _temp) = create_test_store();
        let body = br#"{"settings":{"a":1}}"#;

        let id = store.write(body, at(0)).await.unwrap();
        assert_eq!(id.file_name(), "backup_20250101_000000.json");

        let ids = store.list().await.unwrap();
        assert_eq!(ids, vec![id]);
        assert_eq!(std::fs::read(store.snapshot_path(&id)).unwrap(), body);
        assert_eq!(store.read_latest().await.unwrap(), body);
    }

    #[tokio::test]
    async fn test_latest_matches_newest_snapshot() {
        let (store, _temp) = create_test_store();
        store.write(b"[1]", at(0)).await.unwrap();
        store.write(b"[2]", at(60)).await.unwrap();
        store.write(b"[3]", at(120)).await.unwrap();

        let ids = store.list().await.unwrap();
        let newest = std::fs::read(store.snapshot_path(ids.last().unwrap())).unwrap();
        assert_eq!(store.read_latest().await.unwrap(), newest);
        assert_eq!(newest, b"[3]");
    }

    #[tokio::test]
    async fn test_same_second_writes_get_sequence_suffix() {
        let (store, _temp) = create_test_store();
        let first = store.write(b"{}", at(5)).await.unwrap();
        let second = store.write(b"{}", at(5)).await.unwrap();

        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_eq!(second.file_name(), "backup_20250101_000005_1.json");
        assert_eq!(store.list().await.unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_clock_going_backwards_still_writes_newest() {
        let (store, _temp) = create_test_store();
        let first = store.write(b"[1]", at(100)).await.unwrap();
        let second = store.write(b"[2]", at(10)).await.unwrap();

        assert!(second > first);
        assert_eq!(store.list().await.unwrap().last(), Some(&second));
        assert_eq!(store.read_latest().await.unwrap(), b"[2]");
    }

    #[tokio::test]
    async fn test_list_ignores_unrelated_files_and_sorts_by_name_time() {
        let (store, _temp) = create_test_store();
        std::fs::create_dir_all(store.dir()).unwrap();
        for name in [
            "backup_20240302_000000.json",
            "backup_20240101_000000.json",
            "latest_backup.json",
            ".privacy_verified",
            "notes.txt",
            ".backup_20240101_000000.json.tmp",
        ] {
            std::fs::write(store.dir().join(name), "{}").unwrap();
        }

        let names: Vec<String> = store
            .list()
            .await
            .unwrap()
            .iter()
            .map(|id| id.file_name())
            .collect();
        assert_eq!(
            names,
            vec!["backup_20240101_000000.json", "backup_20240302_000000.json"]
        );
    }

    #[tokio::test]
    async fn test_corrupt_latest_is_treated_as_absent() {
        let (store, _temp) = create_test_store();
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.latest_path(), b"{not json").unwrap();
        assert!(store.read_latest().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_snapshot_write_leaves_latest_untouched() {
        let (store, _temp) = create_test_store();
        store.write(b"[1]", at(0)).await.unwrap();

        // A directory squatting on the temp file's name makes the write fail.
        std::fs::create_dir_all(store.dir().join(".backup_20250101_000100.json.tmp/inner")).unwrap();

        let err = store.write(b"[2]", at(60)).await.unwrap_err();
        assert!(matches!(err, BackupError::StoreWrite(_)));
        assert_eq!(store.read_latest().await.unwrap(), b"[1]");
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_pointer_update_rolls_back_snapshot() {
        let (store, _temp) = create_test_store();
        std::fs::create_dir_all(store.latest_path().join("inner")).unwrap();

        let err = store.write(b"[1]", at(0)).await.unwrap_err();
        assert!(matches!(err, BackupError::StoreWrite(_)));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_trim_keeps_most_recent() {
        let (store, _temp) = create_test_store();
        let mut written = Vec::new();
        for i in 0..7 {
            written.push(store.write(format!("[{}]", i).as_bytes(), at(i * 60)).await.unwrap());
        }

        let report = store.trim(3).await;
        assert_eq!(report.removed, written[..4].to_vec());
        assert_eq!(report.failures, 0);
        assert_eq!(store.list().await.unwrap(), written[4..].to_vec());
        assert_eq!(store.read_latest().await.unwrap(), b"[6]");
    }

    #[tokio::test]
    async fn test_trim_under_limit_is_noop() {
        let (store, _temp) = create_test_store();
        store.write(b"[1]", at(0)).await.unwrap();
        store.write(b"[2]", at(1)).await.unwrap();

        let report = store.trim(100).await;
        assert!(report.removed.is_empty());
        assert_eq!(store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_trim_never_removes_newest() {
        let (store, _temp) = create_test_store();
        store.write(b"[1]", at(0)).await.unwrap();
        let newest = store.write(b"[2]", at(1)).await.unwrap();

        store.trim(0).await;
        assert_eq!(store.list().await.unwrap(), vec![newest]);
    }

    #[tokio::test]
    async fn test_marker_written_once() {
        let (store, _temp) = create_test_store();
        let first = VerificationMarker::private("acme/backups", at(0));
        let second = VerificationMarker::private("acme/backups", at(3600));

        assert!(store.write_marker(&first).await.unwrap());
        assert!(!store.write_marker(&second).await.unwrap());
        assert_eq!(store.read_marker().await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_trim_counts_failed_deletion_and_continues() {
        let (store, _temp) = create_test_store();
        // A directory under an old snapshot name cannot be removed with remove_file.
        let stuck = store.dir().join("backup_20000101_000000.json");
        std::fs::create_dir_all(stuck.join("inner")).unwrap();
        let older = store.write(b"[1]", at(0)).await.unwrap();
        let newest = store.write(b"[2]", at(60)).await.unwrap();

        let report = store.trim(1).await;
        assert_eq!(report.failures, 1);
        assert_eq!(report.removed, vec![older]);
        assert!(stuck.is_dir());
        assert_eq!(store.list().await.unwrap().last(), Some(&newest));
        assert_eq!(store.read_latest().await.unwrap(), b"[2]");
    }

    #[tokio::test]
    async fn test_trim_of_unlistable_directory_is_one_failure() {
        let (store, _temp) = create_test_store();
        std::fs::write(store.dir(), b"not a directory").unwrap();

        let report = store.trim(1).await;
        assert_eq!(report.failures, 1);
        assert!(report.removed.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_sequence_moves_to_next_second() {
        let (store, _temp) = create_test_store();
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.dir().join("backup_20250101_000000_4294967295.json"), "[0]").unwrap();

        let id = store.write(b"[1]", at(0)).await.unwrap();
        assert_eq!(id.file_name(), "backup_20250101_000001.json");
        assert_eq!(store.list().await.unwrap().last(), Some(&id));
        assert_eq!(store.read_latest().await.unwrap(), b"[1]");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_write_never_replaces_symlink_at_snapshot_name() {
        let (store, temp) = create_test_store();
        std::fs::create_dir_all(store.dir()).unwrap();
        let outside = temp.path().join("outside.json");
        std::fs::write(&outside, "keep").unwrap();
        let link = store.dir().join("backup_20250101_000100.json");
        std::os::unix::fs::symlink(&outside, &link).unwrap();

        let id = store.write(b"[1]", at(60)).await.unwrap();
        assert_eq!(id.file_name(), "backup_20250101_000100_1.json");
        assert_eq!(std::fs::read(&outside).unwrap(), b"keep");
        assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
    }

    #[tokio::test]
    async fn test_write_new_refuses_existing_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("backup_20250101_000000.json");
        std::fs::write(&path, "old").unwrap();

        let err = write_new(&path, b"new").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(&path).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_write_sweeps_stale_temp_files() {
        let (store, _temp) = create_test_store();
        std::fs::create_dir_all(store.dir()).unwrap();
        let stale = store.dir().join(".backup_20240101_000000.json.tmp");
        let foreign = store.dir().join(".editor.tmp");
        std::fs::write(&stale, "partial").unwrap();
        std::fs::write(&foreign, "x").unwrap();

        store.write(b"[1]", at(0)).await.unwrap();
        assert!(!stale.exists());
        assert!(foreign.exists());
    }
}
