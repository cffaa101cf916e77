//! Persisted galaxy lists.
//!
//! A galaxy list is sampled once and then consumed by any number of batch
//! runs, which decouples experiments from resampling. Lists can be split into
//! contiguous parts so that independent workers each run a disjoint subset;
//! galaxy indices are preserved so results merge back without collisions.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{galaxies_digest, GalaxyRecord, LensError, Result};
use crate::sampler;
use crate::storage::{read_json, write_json_atomic};

pub const GALAXY_LIST_SCHEMA_VERSION: u32 = 1;

/// Where a split part came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SplitOrigin {
    pub parent_digest: String,
    pub part: usize,
    pub parts: usize,
}

/// Ordered galaxy sequence plus the provenance needed to reproduce it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GalaxyList {
    pub schema_version: u32,

    /// Seed the population was sampled with.
    pub seed: u64,

    /// Population size requested at sampling time; split parts keep the
    /// parent's value.
    pub count: usize,

    /// SHA-256 over the galaxy fingerprints, in order.
    pub digest: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<SplitOrigin>,

    pub galaxies: Vec<GalaxyRecord>,
}

impl GalaxyList {
    /// Sample a new population.
    pub fn generate(count: usize, seed: u64) -> Result<Self> {
        let galaxies = sampler::sample(count, seed)?;
        Ok(Self::from_galaxies(seed, galaxies))
    }

    pub fn from_galaxies(seed: u64, galaxies: Vec<GalaxyRecord>) -> Self {
        Self {
            schema_version: GALAXY_LIST_SCHEMA_VERSION,
            seed,
            count: galaxies.len(),
            digest: galaxies_digest(&galaxies),
            split: None,
            galaxies,
        }
    }

    pub fn len(&self) -> usize {
        self.galaxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.galaxies.is_empty()
    }

    /// Split into `parts` contiguous lists of `len / parts` galaxies, the last
    /// part taking the remainder.
    pub fn split(&self, parts: usize) -> Result<Vec<GalaxyList>> {
        if parts == 0 {
            return Err(LensError::InvalidArgument(
                "number of parts must be positive".to_string(),
            ));
        }
        if parts > self.len() {
            return Err(LensError::InvalidArgument(format!(
                "cannot split {} galaxies into {} parts",
                self.len(),
                parts
            )));
        }

        let size = self.len() / parts;
        let mut out = Vec::with_capacity(parts);
        for part in 0..parts {
            let start = part * size;
            let end = if part + 1 == parts {
                self.len()
            } else {
                start + size
            };
            let galaxies = self.galaxies[start..end].to_vec();
            out.push(GalaxyList {
                schema_version: GALAXY_LIST_SCHEMA_VERSION,
                seed: self.seed,
                count: self.count,
                digest: galaxies_digest(&galaxies),
                split: Some(SplitOrigin {
                    parent_digest: self.digest.clone(),
                    part,
                    parts,
                }),
                galaxies,
            });
        }
        Ok(out)
    }

    fn verify(&self) -> Result<()> {
        if self.schema_version != GALAXY_LIST_SCHEMA_VERSION {
            return Err(LensError::Storage(format!(
                "unsupported galaxy list schema version {}",
                self.schema_version
            )));
        }
        if self.split.is_none() && self.count != self.len() {
            return Err(LensError::Storage(format!(
                "galaxy list declares {} galaxies but holds {}",
                self.count,
                self.len()
            )));
        }
        let actual = galaxies_digest(&self.galaxies);
        if actual != self.digest {
            return Err(LensError::Storage(format!(
                "galaxy list digest mismatch: expected {}, got {}",
                self.digest, actual
            )));
        }
        Ok(())
    }
}

/// File name of part `part` when splitting a list stored as `stem`.
pub fn split_file_name(stem: &str, part: usize) -> String {
    format!("{stem}---{part:03}.json")
}

/// Write a galaxy list as pretty JSON.
pub fn write_galaxy_list(path: &Path, list: &GalaxyList) -> Result<()> {
    write_json_atomic(path, list)?;
    info!(path = %path.display(), galaxies = list.len(), seed = list.seed, "wrote galaxy list");
    Ok(())
}

/// Read a galaxy list, verifying its schema version and digest.
pub fn read_galaxy_list(path: &Path) -> Result<GalaxyList> {
    let list: GalaxyList = read_json(path)?;
    list.verify()?;
    Ok(list)
}
