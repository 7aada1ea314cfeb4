//! Data structures shared across the backup pipeline.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// File name prefix of every snapshot file.
pub const SNAPSHOT_PREFIX: &str = "backup_";

/// File name of the latest pointer.
pub const LATEST_FILE: &str = "latest_backup.json";

/// File name of the visibility verification marker.
pub const MARKER_FILE: &str = ".privacy_verified";

/// Hex-encoded MD5 digest of a document's exact bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(pub String);

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one snapshot file.
///
/// Ordering follows the capture time embedded in the name, then the
/// collision sequence, so sorting never depends on file mtimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotId {
    /// Capture time in UTC, second resolution.
    pub timestamp: NaiveDateTime,
    /// 0 for the first snapshot of a second, 1.. for collisions.
    pub sequence: u32,
}

impl SnapshotId {
    /// Identity for a capture at `timestamp` (sub-second part dropped).
    pub fn new(timestamp: DateTime<Utc>, sequence: u32) -> Self {
        let naive = timestamp.naive_utc();
        let timestamp = naive.with_nanosecond(0).unwrap_or(naive);
        Self {
            timestamp,
            sequence,
        }
    }

    /// `backup_YYYYMMDD_HHMMSS.json`, or `backup_YYYYMMDD_HHMMSS_N.json` on collision.
    pub fn file_name(&self) -> String {
        let stamp = self.timestamp.format("%Y%m%d_%H%M%S");
        if self.sequence == 0 {
            format!("{}{}.json", SNAPSHOT_PREFIX, stamp)
        } else {
            format!("{}{}_{}.json", SNAPSHOT_PREFIX, stamp, self.sequence)
        }
    }

    /// Parses a snapshot file name; anything else yields `None`.
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name
            .strip_prefix(SNAPSHOT_PREFIX)?
            .strip_suffix(".json")?;

        let mut parts = stem.split('_');
        let date_part = parts.next()?;
        let time_part = parts.next()?;
        let sequence = match parts.next() {
            Some(seq) if !seq.is_empty() && seq.bytes().all(|b| b.is_ascii_digit()) => {
                seq.parse().ok()?
            }
            Some(_) => return None,
            None => 0,
        };
        if parts.next().is_some() {
            return None;
        }

        if date_part.len() != 8 || time_part.len() != 6 {
            return None;
        }
        if !date_part
            .bytes()
            .chain(time_part.bytes())
            .all(|b| b.is_ascii_digit())
        {
            return None;
        }

        let year: i32 = date_part[0..4].parse().ok()?;
        let month: u32 = date_part[4..6].parse().ok()?;
        let day: u32 = date_part[6..8].parse().ok()?;
        let hour: u32 = time_part[0..2].parse().ok()?;
        let minute: u32 = time_part[2..4].parse().ok()?;
        let second: u32 = time_part[4..6].parse().ok()?;

        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let time = NaiveTime::from_hms_opt(hour, minute, second)?;

        Some(Self {
            timestamp: NaiveDateTime::new(date, time),
            sequence,
        })
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

impl Serialize for SnapshotId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.file_name())
    }
}

/// The JSON document returned by the backup endpoint, kept as raw bytes.
#[derive(Debug, Clone)]
pub struct RemoteDocument {
    /// Exact response body.
    pub body: Vec<u8>,
    /// `content-type` header, if the server sent one.
    pub content_type: Option<String>,
}

/// Why the change detector decided to save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveReason {
    /// Change detection is switched off.
    DetectionDisabled,
    /// No usable latest pointer exists yet.
    NoBaseline,
    /// A digest could not be computed, so equality cannot be proven.
    FingerprintUnavailable,
    /// The digests differ.
    Changed,
}

/// Outcome of change detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveDecision {
    /// Write a new snapshot.
    Save {
        /// Why.
        reason: SaveReason,
        /// Digest of the new document, when it was computed.
        digest: Option<Digest>,
    },
    /// Identical to the latest pointer; write nothing.
    Skip {
        /// Digest shared by the new document and the baseline.
        digest: Digest,
    },
}

impl SaveDecision {
    /// Whether this decision writes a snapshot.
    pub fn is_save(&self) -> bool {
        matches!(self, SaveDecision::Save { .. })
    }
}

/// One-time provenance record written after the first successful visibility check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationMarker {
    /// When the repository was confirmed private.
    pub verified_at: DateTime<Utc>,
    /// `owner/repo` that was checked.
    pub repository: String,
    /// Always `"private"`.
    pub status: String,
}

impl VerificationMarker {
    /// Marker for a repository confirmed private at `verified_at`.
    pub fn private(repository: &str, verified_at: DateTime<Utc>) -> Self {
        Self {
            verified_at,
            repository: repository.to_string(),
            status: "private".to_string(),
        }
    }
}

/// What a completed run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// A new snapshot was written.
    Saved {
        /// Identity of the new snapshot.
        snapshot: SnapshotId,
        /// Why it was saved.
        reason: SaveReason,
        /// Snapshots removed by retention trimming.
        trimmed: Vec<SnapshotId>,
        /// Snapshots that retention wanted to remove but could not.
        trim_failures: usize,
    },
    /// The document matched the latest pointer.
    Skipped,
}

/// Final status of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Saved or skipped, with details.
    #[serde(flatten)]
    pub outcome: RunOutcome,
    /// Digest of the fetched document, if computed.
    pub digest: Option<Digest>,
    /// Size of the fetched document in bytes.
    pub document_bytes: usize,
    /// Snapshots on disk after the run, if they could be counted.
    pub retained: Option<usize>,
}

impl RunReport {
    /// Whether the run ended without writing anything.
    pub fn skipped(&self) -> bool {
        matches!(self.outcome, RunOutcome::Skipped)
    }
}
