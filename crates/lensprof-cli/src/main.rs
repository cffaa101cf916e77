//! lensprof - Monte Carlo lensing statistics
//!
//! ## Commands
//!
//! - `generate`: sample a galaxy population into a galaxy list file
//! - `split`: split a galaxy list into parts for independent workers
//! - `run`: run the simulator over a galaxy list and archive the results
//! - `merge`: merge result archives from several workers
//! - `analyze`: summarize archives and write plot-ready data files

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, Level};

use lensprof_batch::config::{ENV_RESULTS_DIR, ENV_SIMULATOR, ENV_TIMEOUT_SECS};
use lensprof_batch::{BatchConfig, BatchOutcome, SimulatorInvoker, TrialPipeline};
use lensprof_core::{
    expand_archive_paths, load_archives, read_galaxy_list, render_summary_md, split_file_name,
    summarize, write_galaxy_list, write_report, ConfigTemplate, GalaxyList, LensError,
    ResultArchive, Summary, TrialKey,
};

#[derive(Parser)]
#[command(name = "lensprof")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Monte Carlo lensing statistics over sampled SIE galaxies", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample a galaxy population and write it as a galaxy list
    Generate {
        /// Number of galaxies
        #[arg(short, long, allow_negative_numbers = true)]
        count: i64,

        /// Output galaxy list (JSON)
        #[arg(short, long)]
        output: PathBuf,

        /// Sampling seed
        #[arg(short, long, default_value_t = 0)]
        seed: u64,
    },

    /// Split a galaxy list into contiguous parts
    Split {
        /// Galaxy list to split
        #[arg(short, long)]
        input: PathBuf,

        /// Number of parts
        #[arg(short, long)]
        parts: usize,

        /// Directory for the parts (default: next to the input)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Run the simulator over every galaxy of a list
    Run {
        /// Simulator configuration template
        #[arg(short, long)]
        template: PathBuf,

        /// Galaxy list (JSON)
        #[arg(short, long)]
        galaxies: PathBuf,

        /// Trial seed (default: the galaxy list's sampling seed)
        #[arg(short, long)]
        seed: Option<u64>,

        /// Trial name; results land in <results-dir>/<name>---seed<seed>
        #[arg(short = 'n', long)]
        trial_name: String,

        /// Simulator executable
        #[arg(long, env = ENV_SIMULATOR, default_value = lensprof_batch::config::DEFAULT_SIMULATOR)]
        simulator: PathBuf,

        /// Root directory for trial outputs
        #[arg(long, env = ENV_RESULTS_DIR, default_value = lensprof_batch::config::DEFAULT_RESULTS_DIR)]
        results_dir: PathBuf,

        /// Kill simulator runs exceeding this many seconds (0 = no limit)
        #[arg(long, env = ENV_TIMEOUT_SECS)]
        timeout_secs: Option<u64>,

        /// Remove each galaxy's working directory after a successful parse
        #[arg(long)]
        clean: bool,
    },

    /// Merge result archives into one
    Merge {
        /// Merged archive to write
        #[arg(short, long)]
        output: PathBuf,

        /// Archive files, trial directories or glob patterns
        #[arg(required = true)]
        archives: Vec<String>,
    },

    /// Summarize archives and write report files
    Analyze {
        /// Archive files, trial directories or glob patterns
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Directory for report files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Print the summary as JSON instead of markdown
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    lensprof_core::init_tracing(cli.json_logs, level);

    match cli.command {
        Commands::Generate {
            count,
            output,
            seed,
        } => cmd_generate(count, &output, seed),
        Commands::Split {
            input,
            parts,
            output_dir,
        } => cmd_split(&input, parts, output_dir.as_deref()).map(|_| ()),
        Commands::Run {
            template,
            galaxies,
            seed,
            trial_name,
            simulator,
            results_dir,
            timeout_secs,
            clean,
        } => {
            let config = BatchConfig {
                simulator,
                results_dir,
                timeout_secs: timeout_secs.filter(|&s| s > 0),
                clean_galaxy_dirs: clean,
                ..BatchConfig::default()
            };
            let invoker = config.process_invoker();
            let outcome =
                cmd_run(&invoker, &template, &galaxies, &trial_name, seed, &config).await?;
            print_run_report(&outcome);
            Ok(())
        }
        Commands::Merge { output, archives } => cmd_merge(&output, &archives).map(|_| ()),
        Commands::Analyze {
            inputs,
            output_dir,
            json,
        } => {
            let summary = cmd_analyze(&inputs, output_dir.as_deref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", render_summary_md(&summary));
            }
            Ok(())
        }
    }
}

/// Sample `count` galaxies and write the list.
fn cmd_generate(count: i64, output: &Path, seed: u64) -> Result<()> {
    if count <= 0 {
        return Err(LensError::InvalidArgument(format!(
            "galaxy count must be positive, got {count}"
        )))
        .context("generate");
    }
    let list = GalaxyList::generate(count as usize, seed).context("sample galaxies")?;
    write_galaxy_list(output, &list)
        .with_context(|| format!("write galaxy list {}", output.display()))?;

    println!(
        "Wrote {} galaxies (seed {}) to {}",
        list.len(),
        seed,
        output.display()
    );
    println!("  digest: {}", list.digest);
    Ok(())
}

/// Split a galaxy list, returning the written part files.
fn cmd_split(input: &Path, parts: usize, output_dir: Option<&Path>) -> Result<Vec<PathBuf>> {
    let list = read_galaxy_list(input)
        .with_context(|| format!("read galaxy list {}", input.display()))?;
    let pieces = list.split(parts).context("split galaxy list")?;

    let dir = match output_dir {
        Some(dir) => dir.to_path_buf(),
        None => input
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("galaxies");

    let mut written = Vec::with_capacity(pieces.len());
    for (part, piece) in pieces.iter().enumerate() {
        let path = dir.join(split_file_name(stem, part));
        write_galaxy_list(&path, piece)
            .with_context(|| format!("write part {}", path.display()))?;
        println!("  {} ({} galaxies)", path.display(), piece.len());
        written.push(path);
    }
    println!("Split {} galaxies into {} parts", list.len(), written.len());
    Ok(written)
}

/// Run one trial over a galaxy list.
async fn cmd_run(
    invoker: &dyn SimulatorInvoker,
    template_path: &Path,
    galaxies_path: &Path,
    trial_name: &str,
    seed: Option<u64>,
    config: &BatchConfig,
) -> Result<BatchOutcome> {
    let template = ConfigTemplate::load(template_path)
        .with_context(|| format!("load template {}", template_path.display()))?;
    let list = read_galaxy_list(galaxies_path)
        .with_context(|| format!("read galaxy list {}", galaxies_path.display()))?;

    let trial = TrialKey::new(trial_name, seed.unwrap_or(list.seed));
    info!(trial = %trial, galaxies = list.len(), "starting trial");

    let outcome = TrialPipeline::run_batch(invoker, &template, &list.galaxies, &trial, config)
        .await
        .with_context(|| format!("run trial {trial}"))?;
    Ok(outcome)
}

fn print_run_report(outcome: &BatchOutcome) {
    let s = &outcome.summary;
    println!("Trial {} finished in {} ms", s.trial, s.duration_ms);
    println!(
        "  {} of {} galaxies archived ({:.1}%), {} multiply imaged, {} without images",
        s.succeeded, s.galaxies, s.success_percent, s.multiply_imaged, s.zero_image
    );
    if !outcome.errors.is_empty() {
        println!("  {} failures:", outcome.errors.len());
        for failure in &outcome.errors.failures {
            println!(
                "    galaxy {:>6}  {:?}  {}",
                failure.galaxy_index, failure.kind, failure.reason
            );
        }
    }
    println!("  output: {}", outcome.trial_dir.display());
}

/// Merge archives and write the result.
fn cmd_merge(output: &Path, archives: &[String]) -> Result<ResultArchive> {
    let paths = expand_archive_paths(archives).context("resolve archives")?;
    let loaded = paths
        .iter()
        .map(|p| ResultArchive::load(p).with_context(|| format!("load archive {}", p.display())))
        .collect::<Result<Vec<_>>>()?;
    let merged = ResultArchive::merge(loaded).context("merge archives")?;
    merged
        .save(output)
        .with_context(|| format!("write archive {}", output.display()))?;

    println!(
        "Merged {} archives ({} trials, {} rows) into {}",
        paths.len(),
        merged.trial_count(),
        merged.row_count(),
        output.display()
    );
    Ok(merged)
}

/// Summarize archives, writing report files when `output_dir` is given.
fn cmd_analyze(inputs: &[String], output_dir: Option<&Path>) -> Result<Summary> {
    let archive = load_archives(inputs).context("load archives")?;
    let summary = summarize(&archive);
    if let Some(dir) = output_dir {
        write_report(dir, &summary)?;
    }
    Ok(summary)
}
