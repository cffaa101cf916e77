use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::analyzer::{Series, Summary, SummaryStats};
use crate::storage::{write_json_atomic, write_text_atomic};

pub const GLOBAL_STATS_FILE: &str = "global_stats.dat";
pub const IMAGE_PAIRS_FILE: &str = "image_pairs.dat";
pub const IMAGE_STATS_FILE: &str = "image_stats.dat";
pub const IMAGE_LIST_FILE: &str = "image_list.dat";
pub const INTERFERENCE_CDF_FILE: &str = "interference_cdf.csv";
pub const DELAY_HISTOGRAM_FILE: &str = "delay_histogram.csv";
pub const SUMMARY_JSON_FILE: &str = "summary.json";

/// Human-readable population totals, one `name: value` per line.
pub fn render_global_stats(summary: &Summary) -> String {
    let mut out = String::new();
    match summary {
        Summary::Empty { trials } => {
            let _ = writeln!(out, "Total Samples: {trials}");
            out.push_str("Total Number of Images: 0\n");
            out.push_str("Total Number of Image Pairs: 0\n");
        }
        Summary::Stats(s) => {
            let _ = writeln!(out, "Total Samples: {}", s.trials);
            let _ = writeln!(out, "Total Number of Images: {}", s.images);
            let _ = writeln!(out, "Total Number of Image Pairs: {}", s.image_pairs);
            let _ = writeln!(out, "Zero-Image Samples: {}", s.zero_image_trials);
            let _ = writeln!(out, "Multiply-Imaged Samples: {}", s.multiply_imaged_trials);
            let _ = writeln!(out, "Mean Time Delay (days): {}", s.time_delay.mean);
            let _ = writeln!(out, "Median Time Delay (days): {}", s.time_delay.median);
            let _ = writeln!(out, "Std Time Delay (days): {}", s.time_delay.std_dev);
            let _ = writeln!(
                out,
                "Mean Total Magnification: {}",
                s.mean_total_magnification
            );
        }
    }
    out
}

fn csv_lines<T>(items: &[T], line: impl Fn(&T) -> String) -> String {
    items.iter().map(|item| line(item) + "\n").collect()
}

/// Render markdown summary for terminal output.
pub fn render_summary_md(summary: &Summary) -> String {
    let mut out = String::new();
    out.push_str("# Lensing Summary\n\n");

    let s: &SummaryStats = match summary {
        Summary::Empty { trials } => {
            let _ = writeln!(
                out,
                "No lensed images in {trials} archived trial(s); nothing to summarize."
            );
            return out;
        }
        Summary::Stats(s) => s,
    };

    out.push_str("## Population\n");
    let _ = write!(
        out,
        "- trial keys: {}\n- trials: {}\n- zero-image: {}\n- multiply imaged: {}\n- images: {}\n- image pairs: {}\n\n",
        s.trial_keys,
        s.trials,
        s.zero_image_trials,
        s.multiply_imaged_trials,
        s.images,
        s.image_pairs
    );

    out.push_str("## Multiplicity\n");
    out.push_str("| images | trials |\n|---:|---:|\n");
    for (images, trials) in &s.multiplicity {
        let _ = writeln!(out, "| {images} | {trials} |");
    }
    out.push('\n');

    out.push_str("## Time Delay (days)\n");
    let _ = write!(
        out,
        "- galaxies: {}\n- mean: {:.3}\n- median: {:.3}\n- std: {:.3}\n- range: {:.3} .. {:.3}\n\n",
        s.time_delay.count,
        s.time_delay.mean,
        s.time_delay.median,
        s.time_delay.std_dev,
        s.time_delay.min,
        s.time_delay.max
    );

    out.push_str("## Magnification\n");
    let _ = writeln!(
        out,
        "- mean total |mu|: {:.3}",
        s.mean_total_magnification
    );
    out
}

/// Write every report artifact into `dir`, returning the written paths.
pub fn write_report(dir: &Path, summary: &Summary) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {:?}", dir))?;

    let empty = Series::default();
    let series = summary.stats().map(|s| &s.series).unwrap_or(&empty);

    let files: Vec<(&str, String)> = vec![
        (GLOBAL_STATS_FILE, render_global_stats(summary)),
        (
            IMAGE_PAIRS_FILE,
            csv_lines(&series.pairs, |p| format!("{},{}", p.delay, p.magnification_ratio)),
        ),
        (
            IMAGE_STATS_FILE,
            csv_lines(&series.systems, |p| {
                format!("{},{}", p.image_count, p.total_magnification)
            }),
        ),
        (
            IMAGE_LIST_FILE,
            csv_lines(&series.images, |p| format!("{},{}", p.time_delay, p.magnification)),
        ),
        (
            INTERFERENCE_CDF_FILE,
            "days,fraction\n".to_string()
                + &csv_lines(&series.interference_cdf, |p| {
                    format!("{},{}", p.days, p.fraction)
                }),
        ),
        (
            DELAY_HISTOGRAM_FILE,
            "ln_delay_lower,ln_delay_upper,count\n".to_string()
                + &csv_lines(&series.delay_histogram, |b| {
                    format!("{},{},{}", b.lower, b.upper, b.count)
                }),
        ),
    ];

    let mut written = Vec::with_capacity(files.len() + 1);
    for (name, content) in files {
        let path = dir.join(name);
        write_text_atomic(&path, &content).with_context(|| format!("write {:?}", path))?;
        written.push(path);
    }

    let path = dir.join(SUMMARY_JSON_FILE);
    write_json_atomic(&path, summary).with_context(|| format!("write {:?}", path))?;
    written.push(path);

    tracing::info!(dir = %dir.display(), files = written.len(), "wrote report");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::summarize;
    use crate::archive::ResultArchive;
    use crate::domain::galaxy::test_galaxy;
    use crate::domain::{LensedImage, TrialKey, TrialResult};

    fn sample_summary() -> Summary {
        let trial = TrialKey::new("t", 1);
        let mut archive = ResultArchive::for_trial(trial.clone());
        let img = |td: f64, mu: f64| LensedImage {
            x: 0.0,
            y: 0.0,
            magnification: mu,
            time_delay: td,
        };
        archive
            .append(
                &trial,
                &test_galaxy(0),
                &TrialResult::new(0, vec![img(0.0, 2.0), img(8.0, -1.0)]),
            )
            .unwrap();
        archive
            .append(&trial, &test_galaxy(1), &TrialResult::new(1, vec![]))
            .unwrap();
        summarize(&archive)
    }

    #[test]
    fn report_writes_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_report(dir.path(), &sample_summary()).unwrap();
        assert_eq!(written.len(), 7);

        let pairs = std::fs::read_to_string(dir.path().join(IMAGE_PAIRS_FILE)).unwrap();
        assert_eq!(pairs, "8,2\n");

        let stats = std::fs::read_to_string(dir.path().join(IMAGE_STATS_FILE)).unwrap();
        assert_eq!(stats, "2,3\n");

        let global = std::fs::read_to_string(dir.path().join(GLOBAL_STATS_FILE)).unwrap();
        assert!(global.starts_with("Total Samples: 2\n"));
        assert!(global.contains("Total Number of Image Pairs: 1\n"));

        let cdf = std::fs::read_to_string(dir.path().join(INTERFERENCE_CDF_FILE)).unwrap();
        assert_eq!(cdf.lines().count(), 31);
        assert!(cdf.contains("\n8,1\n"));

        let json = std::fs::read_to_string(dir.path().join(SUMMARY_JSON_FILE)).unwrap();
        let back: Summary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample_summary());
    }

    #[test]
    fn empty_summary_report() {
        let dir = tempfile::tempdir().unwrap();
        let summary = Summary::Empty { trials: 3 };
        write_report(dir.path(), &summary).unwrap();

        let pairs = std::fs::read_to_string(dir.path().join(IMAGE_PAIRS_FILE)).unwrap();
        assert!(pairs.is_empty());
        let global = std::fs::read_to_string(dir.path().join(GLOBAL_STATS_FILE)).unwrap();
        assert!(global.contains("Total Samples: 3"));
    }

    #[test]
    fn markdown_summary_sections() {
        let md = render_summary_md(&sample_summary());
        assert!(md.contains("# Lensing Summary"));
        assert!(md.contains("- zero-image: 1"));
        assert!(md.contains("| 2 | 1 |"));
        assert!(md.contains("- mean: 8.000"));

        let empty = render_summary_md(&Summary::Empty { trials: 0 });
        assert!(empty.contains("nothing to summarize"));
    }
}
