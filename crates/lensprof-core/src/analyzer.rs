//! Population statistics over result archives.
//!
//! [`summarize`] is pure: it reads an archive and derives counts, delay and
//! magnification statistics and the plot-ready series written by
//! [`crate::reporting`]. Zero-image galaxies count as trials but never
//! contribute to delay or magnification statistics.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median, Statistics};
use tracing::{debug, info};

use crate::archive::{ArchiveEntry, ResultArchive, ARCHIVE_FILE_NAME};
use crate::domain::{LensError, Result};

/// Observation windows (days) of the interference CDF.
pub const INTERFERENCE_DAYS: std::ops::RangeInclusive<u32> = 1..=30;

/// Upper bound (days) of delays entering the log-delay histogram.
pub const HISTOGRAM_MAX_DELAY: f64 = 45.0;
pub const HISTOGRAM_BINS: usize = 50;

/// Mean, median and spread of a sample.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SampleStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl SampleStats {
    /// `None` for an empty sample.
    pub fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let std_dev = if values.len() < 2 {
            0.0
        } else {
            values.std_dev()
        };
        Some(Self {
            count: values.len(),
            mean: values.mean(),
            median: Data::new(values.to_vec()).median(),
            std_dev,
            min: Statistics::min(values),
            max: Statistics::max(values),
        })
    }
}

/// One image pair of a system.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PairPoint {
    pub delay: f64,
    /// |μ| of the leading image over |μ| of the trailing image.
    pub magnification_ratio: f64,
}

/// One system with at least one image.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SystemPoint {
    pub image_count: usize,
    pub total_magnification: f64,
}

/// One image: delay relative to the first image and signed magnification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ImagePoint {
    pub time_delay: f64,
    pub magnification: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CdfPoint {
    pub days: u32,
    pub fraction: f64,
}

/// Histogram bin over ln(delay / day).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Series {
    pub pairs: Vec<PairPoint>,
    pub systems: Vec<SystemPoint>,
    pub images: Vec<ImagePoint>,
    pub interference_cdf: Vec<CdfPoint>,
    pub delay_histogram: Vec<HistogramBin>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryStats {
    /// Trial keys covered by the archive.
    pub trial_keys: usize,

    /// Archived galaxies, zero-image ones included.
    pub trials: usize,
    pub zero_image_trials: usize,
    pub multiply_imaged_trials: usize,
    pub images: usize,
    pub image_pairs: usize,

    /// Image count -> number of trials.
    pub multiplicity: BTreeMap<usize, usize>,

    /// Per-galaxy maximum delay spread (days), galaxies with images only.
    pub time_delay: SampleStats,

    /// Mean Σ|μ| over galaxies with images.
    pub mean_total_magnification: f64,

    pub series: Series,
}

/// Result of [`summarize`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Summary {
    /// No galaxy in the archive produced any image.
    Empty { trials: usize },
    Stats(Box<SummaryStats>),
}

impl Summary {
    pub fn stats(&self) -> Option<&SummaryStats> {
        match self {
            Summary::Empty { .. } => None,
            Summary::Stats(stats) => Some(stats),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Summary::Empty { .. })
    }
}

/// Summarize an archive.
pub fn summarize(archive: &ResultArchive) -> Summary {
    let entries = archive.entries();
    let imaged: Vec<&ArchiveEntry> = entries
        .iter()
        .filter(|e| !e.result.flags.zero_image)
        .collect();

    if imaged.is_empty() {
        debug!(trials = entries.len(), "archive has no imaged galaxies");
        return Summary::Empty {
            trials: entries.len(),
        };
    }

    let mut multiplicity = BTreeMap::new();
    for entry in &entries {
        *multiplicity.entry(entry.result.image_count()).or_insert(0) += 1;
    }

    let spreads: Vec<f64> = imaged
        .iter()
        .filter_map(|e| e.result.delay_spread())
        .collect();
    let totals: Vec<f64> = imaged
        .iter()
        .map(|e| e.result.total_magnification())
        .collect();

    let series = build_series(&imaged);

    let stats = SummaryStats {
        trial_keys: archive.trial_count(),
        trials: entries.len(),
        zero_image_trials: entries.len() - imaged.len(),
        multiply_imaged_trials: imaged
            .iter()
            .filter(|e| e.result.flags.multiply_imaged)
            .count(),
        images: series.images.len(),
        image_pairs: series.pairs.len(),
        multiplicity,
        time_delay: SampleStats::of(&spreads).unwrap_or(SampleStats {
            count: 0,
            mean: 0.0,
            median: 0.0,
            std_dev: 0.0,
            min: 0.0,
            max: 0.0,
        }),
        mean_total_magnification: totals.iter().mean(),
        series,
    };
    Summary::Stats(Box::new(stats))
}

fn build_series(imaged: &[&ArchiveEntry]) -> Series {
    let mut series = Series::default();
    let mut min_delays = Vec::new();

    for entry in imaged {
        let images = &entry.result.images;
        series.systems.push(SystemPoint {
            image_count: images.len(),
            total_magnification: entry.result.total_magnification(),
        });

        for (k, a) in images.iter().enumerate() {
            series.images.push(ImagePoint {
                time_delay: a.time_delay,
                magnification: a.magnification,
            });
            for b in &images[k + 1..] {
                let (leading, trailing) = if a.time_delay < b.time_delay {
                    (a, b)
                } else {
                    (b, a)
                };
                series.pairs.push(PairPoint {
                    delay: (a.time_delay - b.time_delay).abs(),
                    magnification_ratio: leading.magnification.abs()
                        / trailing.magnification.abs(),
                });
            }
        }

        if let Some(delay) = entry.result.min_pair_delay() {
            min_delays.push(delay);
        }
    }

    series.interference_cdf = interference_cdf(&min_delays);
    let delays: Vec<f64> = series.images.iter().map(|p| p.time_delay).collect();
    series.delay_histogram = log_delay_histogram(&delays);
    series
}

/// Fraction of multiply-imaged systems whose minimum pair delay is at most
/// `d` days, for each observation window `d`.
pub fn interference_cdf(min_delays: &[f64]) -> Vec<CdfPoint> {
    INTERFERENCE_DAYS
        .map(|days| {
            let fraction = if min_delays.is_empty() {
                0.0
            } else {
                let below = min_delays.iter().filter(|&&d| d <= days as f64).count();
                below as f64 / min_delays.len() as f64
            };
            CdfPoint { days, fraction }
        })
        .collect()
}

/// Histogram of ln(delay) for delays in (0, 45] days, with bins spanning the
/// observed range.
pub fn log_delay_histogram(delays: &[f64]) -> Vec<HistogramBin> {
    let logs: Vec<f64> = delays
        .iter()
        .filter(|&&d| d > 0.0 && d <= HISTOGRAM_MAX_DELAY)
        .map(|d| d.ln())
        .collect();
    if logs.is_empty() {
        return Vec::new();
    }

    let mut lo = Statistics::min(&logs);
    let mut hi = Statistics::max(&logs);
    if lo == hi {
        lo -= 0.5;
        hi += 0.5;
    }
    let width = (hi - lo) / HISTOGRAM_BINS as f64;

    let mut bins: Vec<HistogramBin> = (0..HISTOGRAM_BINS)
        .map(|i| HistogramBin {
            lower: lo + i as f64 * width,
            upper: lo + (i + 1) as f64 * width,
            count: 0,
        })
        .collect();
    for value in logs {
        let i = (((value - lo) / width) as usize).min(HISTOGRAM_BINS - 1);
        bins[i].count += 1;
    }
    bins
}

/// Expand files, directories and glob patterns into archive paths.
///
/// A directory contributes every `archive.json` below it, one level of trial
/// directories deep.
pub fn expand_archive_paths(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for pattern in patterns {
        let path = Path::new(pattern);
        if path.is_dir() {
            paths.extend(archives_under(path)?);
            continue;
        }
        if path.is_file() {
            paths.push(path.to_path_buf());
            continue;
        }

        let matches = glob::glob(pattern)
            .map_err(|e| LensError::Storage(format!("bad glob pattern {pattern:?}: {e}")))?;
        let mut found = 0usize;
        for entry in matches {
            let entry = entry.map_err(|e| LensError::Storage(format!("glob {pattern:?}: {e}")))?;
            if entry.is_dir() {
                paths.extend(archives_under(&entry)?);
            } else {
                paths.push(entry);
            }
            found += 1;
        }
        if found == 0 {
            return Err(LensError::Storage(format!(
                "no archives match {pattern:?}"
            )));
        }
    }
    paths.sort();
    paths.dedup();
    Ok(paths)
}

fn archives_under(dir: &Path) -> Result<Vec<PathBuf>> {
    let direct = dir.join(ARCHIVE_FILE_NAME);
    if direct.is_file() {
        return Ok(vec![direct]);
    }
    let pattern = dir.join("*").join(ARCHIVE_FILE_NAME);
    let pattern = pattern.to_string_lossy();
    let matches = glob::glob(&pattern)
        .map_err(|e| LensError::Storage(format!("bad glob pattern {pattern:?}: {e}")))?;
    let mut found = Vec::new();
    for entry in matches {
        found.push(entry.map_err(|e| LensError::Storage(format!("glob {pattern:?}: {e}")))?);
    }
    Ok(found)
}

/// Load and merge every archive matched by `patterns`.
pub fn load_archives(patterns: &[String]) -> Result<ResultArchive> {
    let paths = expand_archive_paths(patterns)?;
    if paths.is_empty() {
        return Err(LensError::Storage("no archives found".to_string()));
    }
    let archives = paths
        .iter()
        .map(|p| ResultArchive::load(p))
        .collect::<Result<Vec<_>>>()?;
    info!(files = paths.len(), "loaded archives");
    ResultArchive::merge(archives)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::galaxy::test_galaxy;
    use crate::domain::{LensedImage, TrialKey, TrialResult};

    fn image(time_delay: f64, magnification: f64) -> LensedImage {
        LensedImage {
            x: 0.0,
            y: 0.0,
            magnification,
            time_delay,
        }
    }

    fn archive(results: Vec<TrialResult>) -> ResultArchive {
        let trial = TrialKey::new("t", 1);
        let mut archive = ResultArchive::for_trial(trial.clone());
        for result in results {
            archive
                .append(&trial, &test_galaxy(result.galaxy_index), &result)
                .unwrap();
        }
        archive
    }

    #[test]
    fn test_empty_when_no_images() {
        let summary = summarize(&archive(vec![
            TrialResult::new(0, vec![]),
            TrialResult::new(1, vec![]),
        ]));
        assert_eq!(summary, Summary::Empty { trials: 2 });
        assert!(summarize(&ResultArchive::new()).is_empty());
    }

    #[test]
    fn test_delay_statistics_exclude_zero_image_galaxies() {
        let summary = summarize(&archive(vec![
            TrialResult::new(0, vec![image(0.0, 2.0), image(10.0, -1.0)]),
            TrialResult::new(1, vec![]),
            TrialResult::new(2, vec![image(0.0, 3.0), image(4.0, -2.0), image(30.0, 1.0)]),
        ]));
        let stats = summary.stats().expect("stats");

        assert_eq!(stats.trials, 3);
        assert_eq!(stats.zero_image_trials, 1);
        assert_eq!(stats.multiply_imaged_trials, 2);
        assert_eq!(stats.images, 5);
        assert_eq!(stats.image_pairs, 4);
        assert_eq!(stats.time_delay.count, 2);
        assert!((stats.time_delay.mean - 20.0).abs() < 1e-12);
        assert!((stats.time_delay.median - 20.0).abs() < 1e-12);
        assert!((stats.mean_total_magnification - 4.5).abs() < 1e-12);
        assert_eq!(stats.multiplicity.get(&0), Some(&1));
        assert_eq!(stats.multiplicity.get(&2), Some(&1));
        assert_eq!(stats.multiplicity.get(&3), Some(&1));
    }

    #[test]
    fn test_pair_ratio_leading_over_trailing() {
        let summary = summarize(&archive(vec![TrialResult::new(
            0,
            vec![image(5.0, 1.0), image(0.0, -4.0)],
        )]));
        let pairs = &summary.stats().unwrap().series.pairs;
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].delay, 5.0);
        assert_eq!(pairs[0].magnification_ratio, 4.0);
    }

    #[test]
    fn test_single_image_galaxy_has_zero_spread() {
        let summary = summarize(&archive(vec![TrialResult::new(0, vec![image(0.0, 1.2)])]));
        let stats = summary.stats().unwrap();
        assert_eq!(stats.time_delay.mean, 0.0);
        assert_eq!(stats.time_delay.std_dev, 0.0);
        assert!(stats.series.pairs.is_empty());
        assert!(stats.series.interference_cdf.iter().all(|p| p.fraction == 0.0));
    }

    #[test]
    fn test_interference_cdf() {
        let cdf = interference_cdf(&[0.5, 2.0, 10.0, 40.0]);
        assert_eq!(cdf.len(), 30);
        assert_eq!(cdf[0], CdfPoint { days: 1, fraction: 0.25 });
        assert_eq!(cdf[1].fraction, 0.5);
        assert_eq!(cdf[9].fraction, 0.75);
        assert_eq!(cdf[29].fraction, 0.75);
    }

    #[test]
    fn test_log_delay_histogram_filters_range() {
        let bins = log_delay_histogram(&[0.0, 1.0, 2.0, 45.0, 46.0, -3.0]);
        assert_eq!(bins.len(), HISTOGRAM_BINS);
        assert_eq!(bins.iter().map(|b| b.count).sum::<usize>(), 3);
        assert_eq!(bins[0].lower, 0.0);
        assert!((bins[HISTOGRAM_BINS - 1].upper - 45f64.ln()).abs() < 1e-12);
        assert!(log_delay_histogram(&[0.0, 50.0]).is_empty());
    }

    #[test]
    fn test_load_archives_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let a = archive(vec![TrialResult::new(0, vec![image(0.0, 1.0)])]);
        a.save(&dir.path().join("t---seed1").join("archive.json"))
            .unwrap();

        let merged = load_archives(&[dir.path().to_string_lossy().into_owned()]).unwrap();
        assert_eq!(merged.entry_count(), 1);
    }

    #[test]
    fn test_load_archives_no_match() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("*.json").to_string_lossy().into_owned();
        let err = load_archives(&[pattern]).unwrap_err();
        assert!(matches!(err, LensError::Storage(_)));
    }
}
