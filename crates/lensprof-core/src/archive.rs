//! Result archives.
//!
//! An archive is a flat table with one row per galaxy/image combination.
//! Galaxies without images contribute a single row with no image, so they
//! still count towards population statistics. Every row carries its trial
//! key and the full galaxy record.
//!
//! A `(trial_name, galaxy index)` pair appears at most once per archive;
//! merging enforces the same rule across archives.

use std::collections::{BTreeSet, HashMap};
use std::ops::Range;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{GalaxyRecord, LensError, LensedImage, Result, TrialKey, TrialResult};
use crate::storage::{read_json, write_json_atomic};

pub const ARCHIVE_SCHEMA_VERSION: u32 = 1;

/// File name of a trial archive inside its trial directory.
pub const ARCHIVE_FILE_NAME: &str = "archive.json";

/// One archive row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchiveRow {
    pub trial_name: String,
    pub seed: u64,
    pub galaxy: GalaxyRecord,

    /// Images found for this galaxy.
    pub image_count: usize,

    /// 1-based image number, absent on a zero-image row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_number: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<LensedImage>,
}

impl ArchiveRow {
    pub fn trial_key(&self) -> TrialKey {
        TrialKey::new(self.trial_name.clone(), self.seed)
    }
}

/// A galaxy and its result, regrouped from archive rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveEntry {
    pub trial: TrialKey,
    pub galaxy: GalaxyRecord,
    pub result: TrialResult,
}

type EntryKey = (String, u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArchiveFile {
    schema_version: u32,
    created_at: DateTime<Utc>,
    trials: BTreeSet<TrialKey>,
    rows: Vec<ArchiveRow>,
}

/// Durable aggregate of trial results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ArchiveFile")]
pub struct ResultArchive {
    schema_version: u32,
    created_at: DateTime<Utc>,
    trials: BTreeSet<TrialKey>,
    rows: Vec<ArchiveRow>,

    #[serde(skip)]
    index: HashMap<EntryKey, Range<usize>>,
}

impl Default for ResultArchive {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for ResultArchive {
    fn eq(&self, other: &Self) -> bool {
        self.trials == other.trials && self.rows == other.rows
    }
}

impl ResultArchive {
    pub fn new() -> Self {
        Self {
            schema_version: ARCHIVE_SCHEMA_VERSION,
            created_at: Utc::now(),
            trials: BTreeSet::new(),
            rows: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Empty archive covering one trial.
    pub fn for_trial(trial: TrialKey) -> Self {
        let mut archive = Self::new();
        archive.trials.insert(trial);
        archive
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn trials(&self) -> &BTreeSet<TrialKey> {
        &self.trials
    }

    pub fn rows(&self) -> &[ArchiveRow] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn trial_count(&self) -> usize {
        self.trials.len()
    }

    /// Number of archived galaxies.
    pub fn entry_count(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, trial_name: &str, galaxy_index: u64) -> bool {
        self.index
            .contains_key(&(trial_name.to_string(), galaxy_index))
    }

    /// Append one galaxy's result under `trial`.
    pub fn append(
        &mut self,
        trial: &TrialKey,
        galaxy: &GalaxyRecord,
        result: &TrialResult,
    ) -> Result<()> {
        if galaxy.index != result.galaxy_index {
            return Err(LensError::InvalidArgument(format!(
                "result for galaxy {} appended with galaxy {}",
                result.galaxy_index, galaxy.index
            )));
        }
        if !result.flags.valid {
            return Err(LensError::InvalidArgument(format!(
                "result for galaxy {} has non-finite values",
                galaxy.index
            )));
        }
        let key = (trial.trial_name.clone(), galaxy.index);
        if self.index.contains_key(&key) {
            return Err(LensError::TrialIdentityConflict {
                trial_name: trial.trial_name.clone(),
                galaxy_index: galaxy.index,
                detail: "galaxy already archived".to_string(),
            });
        }
        let rows = rows_for(trial, galaxy, result);
        self.insert_rows(key, rows);
        self.trials.insert(trial.clone());
        Ok(())
    }

    fn insert_rows(&mut self, key: EntryKey, rows: Vec<ArchiveRow>) {
        let start = self.rows.len();
        self.rows.extend(rows);
        self.index.insert(key, start..self.rows.len());
    }

    /// Regroup rows into one entry per archived galaxy, in row order.
    pub fn entries(&self) -> Vec<ArchiveEntry> {
        let mut ranges: Vec<&Range<usize>> = self.index.values().collect();
        ranges.sort_by_key(|r| r.start);
        ranges
            .into_iter()
            .map(|range| entry_from_rows(&self.rows[range.clone()]))
            .collect()
    }

    /// Merge archives into one. Rows keep their input order.
    ///
    /// A galaxy claimed by several archives under the same trial name is kept
    /// once when parameters and rows agree, and is a
    /// [`LensError::TrialIdentityConflict`] otherwise.
    pub fn merge<I>(archives: I) -> Result<ResultArchive>
    where
        I: IntoIterator<Item = ResultArchive>,
    {
        let mut merged = ResultArchive::new();
        let mut inputs = 0usize;

        for archive in archives {
            inputs += 1;
            merged.trials.extend(archive.trials.iter().cloned());

            let mut ranges: Vec<(&EntryKey, &Range<usize>)> = archive.index.iter().collect();
            ranges.sort_by_key(|(_, r)| r.start);

            for (key, range) in ranges {
                let incoming = &archive.rows[range.clone()];
                if let Some(existing) = merged.index.get(key) {
                    let existing = &merged.rows[existing.clone()];
                    check_duplicate(key, existing, incoming)?;
                    warn!(
                        trial = %key.0,
                        galaxy = key.1,
                        "identical galaxy in several archives, keeping one copy"
                    );
                    continue;
                }
                merged.insert_rows(key.clone(), incoming.to_vec());
            }
        }

        info!(
            inputs,
            trials = merged.trial_count(),
            rows = merged.row_count(),
            "merged archives"
        );
        Ok(merged)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    /// Load an archive, validating row structure.
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }
}

fn rows_for(trial: &TrialKey, galaxy: &GalaxyRecord, result: &TrialResult) -> Vec<ArchiveRow> {
    let row = |image_number: Option<usize>, image: Option<LensedImage>| ArchiveRow {
        trial_name: trial.trial_name.clone(),
        seed: trial.seed,
        galaxy: *galaxy,
        image_count: result.image_count(),
        image_number,
        image,
    };
    if result.images.is_empty() {
        return vec![row(None, None)];
    }
    result
        .images
        .iter()
        .enumerate()
        .map(|(i, img)| row(Some(i + 1), Some(*img)))
        .collect()
}

fn entry_from_rows(rows: &[ArchiveRow]) -> ArchiveEntry {
    let first = &rows[0];
    let images = rows.iter().filter_map(|r| r.image).collect();
    ArchiveEntry {
        trial: first.trial_key(),
        galaxy: first.galaxy,
        result: TrialResult::new(first.galaxy.index, images),
    }
}

fn check_duplicate(
    key: &EntryKey,
    existing: &[ArchiveRow],
    incoming: &[ArchiveRow],
) -> Result<()> {
    let conflict = |detail: String| LensError::TrialIdentityConflict {
        trial_name: key.0.clone(),
        galaxy_index: key.1,
        detail,
    };
    if !existing[0].galaxy.same_parameters(&incoming[0].galaxy) {
        return Err(conflict("galaxy parameters differ".to_string()));
    }
    if existing[0].seed != incoming[0].seed {
        return Err(conflict(format!(
            "seeds differ ({} vs {})",
            existing[0].seed, incoming[0].seed
        )));
    }
    if existing != incoming {
        return Err(conflict("simulator results differ".to_string()));
    }
    Ok(())
}

fn invalid(reason: String) -> LensError {
    LensError::Storage(format!("malformed archive: {reason}"))
}

/// Group consecutive rows by `(trial_name, galaxy index)` and check each group.
fn index_rows(rows: &[ArchiveRow]) -> Result<HashMap<EntryKey, Range<usize>>> {
    let mut index: HashMap<EntryKey, Range<usize>> = HashMap::new();
    let mut start = 0;
    while start < rows.len() {
        let head = &rows[start];
        let key = (head.trial_name.clone(), head.galaxy.index);
        let mut end = start + 1;
        while end < rows.len()
            && rows[end].trial_name == head.trial_name
            && rows[end].galaxy.index == head.galaxy.index
        {
            end += 1;
        }

        let group = &rows[start..end];
        if head.image_count == 0 {
            if group.len() != 1 || head.image.is_some() || head.image_number.is_some() {
                return Err(invalid(format!(
                    "zero-image galaxy {} of {} must be a single row without image",
                    key.1, key.0
                )));
            }
        } else {
            if group.len() != head.image_count {
                return Err(invalid(format!(
                    "galaxy {} of {} declares {} images but has {} rows",
                    key.1,
                    key.0,
                    head.image_count,
                    group.len()
                )));
            }
            for (i, row) in group.iter().enumerate() {
                if row.image_number != Some(i + 1) || row.image.is_none() {
                    return Err(invalid(format!(
                        "galaxy {} of {} has a missing or misnumbered image row",
                        key.1, key.0
                    )));
                }
                if row.image_count != head.image_count
                    || row.seed != head.seed
                    || row.galaxy != head.galaxy
                {
                    return Err(invalid(format!(
                        "galaxy {} of {} has inconsistent rows",
                        key.1, key.0
                    )));
                }
            }
        }

        if index.insert(key.clone(), start..end).is_some() {
            return Err(invalid(format!(
                "galaxy {} of {} appears more than once",
                key.1, key.0
            )));
        }
        start = end;
    }
    Ok(index)
}

impl TryFrom<ArchiveFile> for ResultArchive {
    type Error = LensError;

    fn try_from(file: ArchiveFile) -> Result<Self> {
        if file.schema_version != ARCHIVE_SCHEMA_VERSION {
            return Err(invalid(format!(
                "unsupported schema version {}",
                file.schema_version
            )));
        }
        let index = index_rows(&file.rows)?;
        for row in &file.rows {
            if !file.trials.contains(&row.trial_key()) {
                return Err(invalid(format!(
                    "row references unknown trial {}",
                    row.trial_key()
                )));
            }
        }
        Ok(Self {
            schema_version: file.schema_version,
            created_at: file.created_at,
            trials: file.trials,
            rows: file.rows,
            index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::galaxy::test_galaxy;

    fn image(time_delay: f64) -> LensedImage {
        LensedImage {
            x: 0.4,
            y: -0.3,
            magnification: 2.0,
            time_delay,
        }
    }

    fn archive_with(trial: &TrialKey, entries: &[(u64, usize)]) -> ResultArchive {
        let mut archive = ResultArchive::for_trial(trial.clone());
        for &(index, n_images) in entries {
            let images = (0..n_images).map(|k| image(k as f64 * 3.0)).collect();
            archive
                .append(trial, &test_galaxy(index), &TrialResult::new(index, images))
                .unwrap();
        }
        archive
    }

    #[test]
    fn test_zero_image_galaxy_single_row() {
        let trial = TrialKey::new("t", 1);
        let archive = archive_with(&trial, &[(0, 0), (1, 4)]);
        assert_eq!(archive.row_count(), 5);
        assert_eq!(archive.entry_count(), 2);
        assert_eq!(archive.rows()[0].image, None);
        assert_eq!(archive.rows()[0].image_count, 0);
        assert_eq!(archive.rows()[4].image_number, Some(4));
    }

    #[test]
    fn test_append_duplicate_rejected() {
        let trial = TrialKey::new("t", 1);
        let mut archive = archive_with(&trial, &[(3, 2)]);
        let err = archive
            .append(&trial, &test_galaxy(3), &TrialResult::new(3, vec![]))
            .unwrap_err();
        assert!(matches!(err, LensError::TrialIdentityConflict { galaxy_index: 3, .. }));
    }

    #[test]
    fn test_append_mismatched_index_rejected() {
        let trial = TrialKey::new("t", 1);
        let mut archive = ResultArchive::for_trial(trial.clone());
        let err = archive
            .append(&trial, &test_galaxy(1), &TrialResult::new(2, vec![]))
            .unwrap_err();
        assert!(matches!(err, LensError::InvalidArgument(_)));
    }

    #[test]
    fn test_entries_regroup_rows() {
        let trial = TrialKey::new("t", 1);
        let archive = archive_with(&trial, &[(5, 2), (2, 0), (9, 3)]);
        let entries = archive.entries();
        let shape: Vec<(u64, usize)> = entries
            .iter()
            .map(|e| (e.galaxy.index, e.result.image_count()))
            .collect();
        assert_eq!(shape, vec![(5, 2), (2, 0), (9, 3)]);
        assert!(entries[1].result.flags.zero_image);
    }

    #[test]
    fn test_disjoint_merge_sums_rows() {
        let a = archive_with(&TrialKey::new("a", 1), &[(0, 2), (1, 0)]);
        let b = archive_with(&TrialKey::new("b", 1), &[(0, 4)]);
        let expected = a.row_count() + b.row_count();

        let merged = ResultArchive::merge(vec![a, b]).unwrap();
        assert_eq!(merged.row_count(), expected);
        assert_eq!(merged.trial_count(), 2);
        assert_eq!(merged.entry_count(), 3);
    }

    #[test]
    fn test_merge_split_parts_of_same_trial() {
        let trial = TrialKey::new("t", 7);
        let a = archive_with(&trial, &[(0, 2), (1, 1)]);
        let b = archive_with(&trial, &[(2, 0), (3, 2)]);
        let merged = ResultArchive::merge(vec![a, b]).unwrap();
        assert_eq!(merged.trial_count(), 1);
        assert_eq!(merged.entry_count(), 4);
    }

    #[test]
    fn test_merge_identical_duplicate_kept_once() {
        let trial = TrialKey::new("t", 1);
        let a = archive_with(&trial, &[(0, 2)]);
        let b = a.clone();
        let merged = ResultArchive::merge(vec![a, b]).unwrap();
        assert_eq!(merged.row_count(), 2);
    }

    #[test]
    fn test_merge_conflicting_parameters() {
        let trial = TrialKey::new("t", 1);
        let a = archive_with(&trial, &[(0, 2)]);

        let mut other = test_galaxy(0);
        other.velocity_dispersion = 300.0;
        let mut b = ResultArchive::for_trial(trial.clone());
        b.append(&trial, &other, &TrialResult::new(0, vec![image(0.0), image(3.0)]))
            .unwrap();

        let err = ResultArchive::merge(vec![a, b]).unwrap_err();
        match err {
            LensError::TrialIdentityConflict {
                trial_name,
                galaxy_index,
                detail,
            } => {
                assert_eq!(trial_name, "t");
                assert_eq!(galaxy_index, 0);
                assert!(detail.contains("parameters"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_merge_conflicting_results() {
        let trial = TrialKey::new("t", 1);
        let a = archive_with(&trial, &[(0, 2)]);
        let b = archive_with(&trial, &[(0, 3)]);
        let err = ResultArchive::merge(vec![a, b]).unwrap_err();
        assert!(err.to_string().contains("results differ"));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.json");
        let archive = archive_with(&TrialKey::new("t", 1), &[(0, 0), (1, 3)]);

        archive.save(&path).unwrap();
        let back = ResultArchive::load(&path).unwrap();
        assert_eq!(back, archive);
        assert_eq!(back.entry_count(), 2);
        assert!(back.contains("t", 1));
    }

    #[test]
    fn test_load_rejects_truncated_image_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.json");
        let archive = archive_with(&TrialKey::new("t", 1), &[(0, 3)]);

        let mut value = serde_json::to_value(&archive).unwrap();
        value["rows"].as_array_mut().unwrap().pop();
        std::fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();

        let err = ResultArchive::load(&path).unwrap_err();
        assert!(err.to_string().contains("declares 3 images"));
    }

    #[test]
    fn test_append_rejects_non_finite_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.json");
        let trial = TrialKey::new("t", 1);
        let mut archive = archive_with(&trial, &[(0, 2)]);

        let mut bad = image(0.0);
        bad.magnification = f64::NAN;
        let result = TrialResult::new(1, vec![bad]);
        assert!(!result.flags.valid);

        let err = archive
            .append(&trial, &test_galaxy(1), &result)
            .unwrap_err();
        assert!(matches!(err, LensError::InvalidArgument(_)));
        assert!(!archive.contains("t", 1));

        // Refused rows never reach disk, so the archive stays loadable.
        archive.save(&path).unwrap();
        assert_eq!(ResultArchive::load(&path).unwrap(), archive);
    }
}
