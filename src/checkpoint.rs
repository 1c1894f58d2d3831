use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::SyncError;
use crate::types::ReleaseRecord;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Latest release date already mirrored; rows at or before it are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark(NaiveDate);

impl Watermark {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).ok().map(Self)
    }

    /// True when a row dated `release_date` was already covered by this
    /// watermark. Plain string comparison: both sides are `YYYY-MM-DD`.
    pub fn covers(&self, release_date: &str) -> bool {
        release_date <= self.to_string().as_str()
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format(DATE_FORMAT))
    }
}

/// Max known release date across `records`. Sentinel or otherwise
/// unparseable dates are ignored; `None` if nothing usable remains.
pub fn next_watermark(records: &[ReleaseRecord]) -> Option<Watermark> {
    records
        .iter()
        .filter_map(|r| Watermark::parse(&r.release_date))
        .max()
}

#[derive(Serialize, Deserialize)]
struct CheckpointFile {
    last_scan_date: String,
}

/// JSON checkpoint holding the single global watermark.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
    bootstrap: Watermark,
}

impl CheckpointStore {
    pub fn new(path: impl AsRef<Path>, bootstrap: NaiveDate) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            bootstrap: Watermark(bootstrap),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bootstrap(&self) -> Watermark {
        self.bootstrap
    }

    pub fn load(&self) -> Result<Watermark, SyncError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "checkpoint.absent");
                return Ok(self.bootstrap);
            }
            Err(e) => return Err(e.into()),
        };

        let file: CheckpointFile = serde_json::from_str(&contents).map_err(|e| {
            SyncError::CorruptCheckpoint(format!("{}: {e}", self.path.display()))
        })?;

        Watermark::parse(&file.last_scan_date).ok_or_else(|| {
            SyncError::CorruptCheckpoint(format!(
                "{}: last_scan_date {:?} is not YYYY-MM-DD",
                self.path.display(),
                file.last_scan_date
            ))
        })
    }

    /// Replaces the checkpoint through a sibling temp file and a rename, so a
    /// concurrent `load` sees either the old or the new watermark.
    pub fn save(&self, watermark: &Watermark) -> Result<(), SyncError> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let mut temp = tempfile::NamedTempFile::new_in(&parent)?;
        let body = CheckpointFile {
            last_scan_date: watermark.to_string(),
        };
        serde_json::to_writer(temp.as_file_mut(), &body)?;
        temp.as_file_mut().flush()?;
        temp.as_file().sync_all()?;

        temp.persist(&self.path)
            .map_err(|e| SyncError::Io(e.error))?;

        info!(path = %self.path.display(), watermark = %watermark, "checkpoint.saved");
        Ok(())
    }
}

/// Advisory lock held for the length of a run. The kernel drops the `flock`
/// when the file closes, so a killed run never leaves the checkpoint locked.
#[derive(Debug)]
pub struct CheckpointLock {
    file: File,
}

impl CheckpointLock {
    pub fn acquire(checkpoint: &Path) -> Result<Self, SyncError> {
        let mut name = checkpoint.as_os_str().to_os_string();
        name.push(".lock");
        let path = PathBuf::from(name);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if let Err(e) = FileExt::try_lock_exclusive(&file) {
            if e.kind() == fs2::lock_contended_error().kind() {
                return Err(SyncError::CheckpointLocked(path.display().to_string()));
            }
            return Err(e.into());
        }

        // Holder pid, for whoever inspects a contended lock.
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        debug!(path = %path.display(), "checkpoint.locked");
        Ok(Self { file })
    }
}

impl Drop for CheckpointLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn record(release_date: &str) -> ReleaseRecord {
        ReleaseRecord {
            title: "t".to_string(),
            artist: "a".to_string(),
            source_track_url: "N/A".to_string(),
            artist_url: "N/A".to_string(),
            release_date: release_date.to_string(),
        }
    }

    #[test]
    fn absent_file_yields_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("last_scan.json"), date("2025-03-07"));
        assert_eq!(store.load().unwrap().to_string(), "2025-03-07");
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("last_scan.json"), date("2025-03-07"));
        store.save(&Watermark::new(date("2025-03-10"))).unwrap();
        assert_eq!(store.load().unwrap(), Watermark::new(date("2025-03-10")));

        let raw = fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw, r#"{"last_scan_date":"2025-03-10"}"#);
    }

    #[test]
    fn save_creates_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("state/last_scan.json"), date("2025-03-07"));
        store.save(&Watermark::new(date("2025-04-01"))).unwrap();
        assert_eq!(store.load().unwrap().to_string(), "2025-04-01");
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_scan.json");
        fs::write(&path, r#"{"last_scan_date":"2025-05-01","source":"beatport"}"#).unwrap();
        let store = CheckpointStore::new(&path, date("2025-03-07"));
        assert_eq!(store.load().unwrap().to_string(), "2025-05-01");
    }

    #[test]
    fn corrupt_contents_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_scan.json");
        let store = CheckpointStore::new(&path, date("2025-03-07"));

        fs::write(&path, "{not json").unwrap();
        assert!(matches!(store.load(), Err(SyncError::CorruptCheckpoint(_))));

        fs::write(&path, r#"{"last_scan_date":"March 7"}"#).unwrap();
        assert!(matches!(store.load(), Err(SyncError::CorruptCheckpoint(_))));

        fs::write(&path, r#"{"other":"2025-03-07"}"#).unwrap();
        assert!(matches!(store.load(), Err(SyncError::CorruptCheckpoint(_))));
    }

    #[test]
    fn covers_is_inclusive() {
        let w = Watermark::new(date("2025-03-07"));
        assert!(w.covers("2025-03-07"));
        assert!(w.covers("2025-03-05"));
        assert!(!w.covers("2025-03-08"));
    }

    #[test]
    fn next_watermark_takes_max_known_date() {
        let records = vec![
            record("2025-03-09"),
            record("Unknown Date"),
            record("2025-03-10"),
        ];
        assert_eq!(next_watermark(&records).unwrap().to_string(), "2025-03-10");
    }

    #[test]
    fn next_watermark_none_when_all_unknown() {
        let records = vec![record("Unknown Date"), record("Unknown Date")];
        assert!(next_watermark(&records).is_none());
        assert!(next_watermark(&[]).is_none());
    }

    #[test]
    fn lock_excludes_second_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_scan.json");

        let first = CheckpointLock::acquire(&path).unwrap();
        assert!(matches!(
            CheckpointLock::acquire(&path),
            Err(SyncError::CheckpointLocked(_))
        ));
        drop(first);
        assert!(CheckpointLock::acquire(&path).is_ok());
    }

    #[test]
    fn leftover_lock_file_from_dead_run_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_scan.json");
        let lock_path = dir.path().join("last_scan.json.lock");
        fs::write(&lock_path, "4194303\n").unwrap();

        let lock = CheckpointLock::acquire(&path).unwrap();
        assert_eq!(
            fs::read_to_string(&lock_path).unwrap().trim(),
            std::process::id().to_string()
        );
        drop(lock);
    }
}
