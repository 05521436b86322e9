//! Checkpoint artifacts.
//!
//! After every agency the full accumulated open and past lists are rewritten.
//! Each file is written next to its destination and renamed over it, so a
//! reader never sees a truncated artifact. Both opportunity files are staged
//! before either is renamed, so a failed write leaves the previous pair intact.

use crate::config::HarvestConfig;
use crate::discovery::Organization;
use crate::error::{HarvestError, HarvestResult};
use crate::harvest::AgencyOpportunitySet;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Writes the agency list and the two opportunity snapshots.
#[derive(Debug, Clone)]
pub struct CheckpointWriter {
    agencies_path: PathBuf,
    open_path: PathBuf,
    past_path: PathBuf,
}

impl CheckpointWriter {
    pub fn new(
        agencies_path: impl Into<PathBuf>,
        open_path: impl Into<PathBuf>,
        past_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            agencies_path: agencies_path.into(),
            open_path: open_path.into(),
            past_path: past_path.into(),
        }
    }

    pub fn from_config(config: &HarvestConfig) -> Self {
        Self::new(config.agencies_path(), config.open_path(), config.past_path())
    }

    pub fn open_path(&self) -> &Path {
        &self.open_path
    }

    pub fn past_path(&self) -> &Path {
        &self.past_path
    }

    pub fn agencies_path(&self) -> &Path {
        &self.agencies_path
    }

    /// Overwrite both opportunity artifacts with the full accumulated lists.
    pub fn write(
        &self,
        open: &[AgencyOpportunitySet],
        past: &[AgencyOpportunitySet],
    ) -> HarvestResult<()> {
        let open_tmp = stage_json(&self.open_path, open)?;
        let past_tmp = match stage_json(&self.past_path, past) {
            Ok(tmp) => tmp,
            Err(e) => {
                let _ = fs::remove_file(&open_tmp);
                return Err(e);
            }
        };

        if let Err(e) = commit(&open_tmp, &self.open_path) {
            let _ = fs::remove_file(&past_tmp);
            return Err(e);
        }
        commit(&past_tmp, &self.past_path)?;
        debug!(
            "checkpoint: {} open sets, {} past sets",
            open.len(),
            past.len()
        );
        Ok(())
    }

    /// Write the discovered agency list.
    pub fn write_agencies(&self, agencies: &[Organization]) -> HarvestResult<()> {
        write_json(&self.agencies_path, agencies)
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> HarvestResult<()> {
    let tmp = stage_json(path, value)?;
    commit(&tmp, path)
}

/// Serialize `value` into the temp file beside `path`. Returns the temp path.
fn stage_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> HarvestResult<PathBuf> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');

    let io_err = |source| HarvestError::Checkpoint {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let tmp = temp_path(path);
    let written = fs::File::create(&tmp).and_then(|mut file| {
        file.write_all(&bytes)?;
        file.sync_all()
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(e));
    }
    Ok(tmp)
}

/// Move a staged temp file over its destination.
fn commit(tmp: &Path, path: &Path) -> HarvestResult<()> {
    fs::rename(tmp, path).map_err(|source| {
        let _ = fs::remove_file(tmp);
        HarvestError::Checkpoint {
            path: path.to_path_buf(),
            source,
        }
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::{FeedKind, OpportunityStatus, RawOpportunity};
    use serde_json::Value;

    fn writer(dir: &Path) -> CheckpointWriter {
        CheckpointWriter::new(
            dir.join("agencies.json"),
            dir.join("raw/open.json"),
            dir.join("raw/past.json"),
        )
    }

    fn org() -> Organization {
        Organization {
            agency_name: "Gamma Authority".into(),
            agency_url: "https://gamma.example.test".into(),
        }
    }

    fn open_set() -> AgencyOpportunitySet {
        let mut set = AgencyOpportunitySet::empty(FeedKind::Open, &org());
        set.opportunities.push(RawOpportunity {
            status: OpportunityStatus::Open,
            reference_id: "G-1".into(),
            project_name: "Water Meters".into(),
            close_date: "2030-01-01 12:00:00".into(),
            days_remaining: Some(12),
        });
        set
    }

    #[test]
    fn test_write_creates_directories_and_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(dir.path());

        w.write(&[open_set()], &[AgencyOpportunitySet::empty(FeedKind::Past, &org())])
            .unwrap();

        let open: Value =
            serde_json::from_str(&fs::read_to_string(w.open_path()).unwrap()).unwrap();
        assert_eq!(open[0]["Agency Name"], "Gamma Authority");
        assert_eq!(
            open[0]["Agency Open Public Opportunities"][0]["Refference"],
            "G-1"
        );
        assert_eq!(
            open[0]["Agency Open Public Opportunities"][0]["Number of days Left"],
            12
        );

        let past: Value =
            serde_json::from_str(&fs::read_to_string(w.past_path()).unwrap()).unwrap();
        assert_eq!(
            past[0]["Agency Past Public Opportunity Url"],
            "https://gamma.example.test/portal/?tab=pastOpportunities"
        );
        assert!(!dir.path().join("raw/open.json.tmp").exists());
    }

    #[test]
    fn test_write_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(dir.path());
        let open = vec![open_set()];

        w.write(&open, &[]).unwrap();
        let first = fs::read(w.open_path()).unwrap();
        w.write(&open, &[]).unwrap();
        let second = fs::read(w.open_path()).unwrap();

        assert_eq!(first, second);
        assert_eq!(fs::read_to_string(w.past_path()).unwrap(), "[]\n");
    }

    #[test]
    fn test_snapshot_overwrites_previous() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(dir.path());

        w.write(&[open_set(), open_set()], &[]).unwrap();
        w.write(&[open_set()], &[]).unwrap();

        let open: Vec<Value> =
            serde_json::from_str(&fs::read_to_string(w.open_path()).unwrap()).unwrap();
        assert_eq!(open.len(), 1);
    }

    #[test]
    fn test_write_agencies() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(dir.path());

        w.write_agencies(&[org()]).unwrap();

        let agencies: Vec<Organization> =
            serde_json::from_str(&fs::read_to_string(w.agencies_path()).unwrap()).unwrap();
        assert_eq!(agencies, vec![org()]);
    }

    #[test]
    fn test_unwritable_destination_is_checkpoint_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "file, not a directory").unwrap();
        let w = CheckpointWriter::new(
            blocker.join("agencies.json"),
            blocker.join("open.json"),
            blocker.join("past.json"),
        );

        let err = w.write(&[], &[]).unwrap_err();
        assert!(matches!(err, HarvestError::Checkpoint { .. }));
    }

    #[test]
    fn test_failed_past_write_keeps_previous_open_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "file, not a directory").unwrap();
        let open_path = dir.path().join("open.json");
        let w = CheckpointWriter::new(
            dir.path().join("agencies.json"),
            open_path.clone(),
            blocker.join("past.json"),
        );
        w.write(&[], &[]).unwrap_err();
        assert!(!open_path.exists());

        fs::write(&open_path, "[]\n").unwrap();
        let err = w
            .write(&[open_set()], &[AgencyOpportunitySet::empty(FeedKind::Past, &org())])
            .unwrap_err();

        assert!(matches!(err, HarvestError::Checkpoint { .. }));
        assert_eq!(fs::read_to_string(&open_path).unwrap(), "[]\n");
        assert!(!dir.path().join("open.json.tmp").exists());
    }
}
