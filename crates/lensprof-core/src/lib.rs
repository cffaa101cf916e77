//! lensprof core library
//!
//! Galaxy sampling, simulator templates, output parsing, result archives and
//! population analysis. Subprocess orchestration lives in `lensprof-batch`.

pub mod analyzer;
pub mod archive;
pub mod domain;
pub mod galaxy_list;
pub mod obs;
pub mod parser;
pub mod reporting;
pub mod sampler;
pub mod storage;
pub mod telemetry;
pub mod template;

pub use analyzer::{
    expand_archive_paths, load_archives, summarize, CdfPoint, HistogramBin, ImagePoint, PairPoint,
    SampleStats, Series, Summary, SummaryStats, SystemPoint,
};
pub use archive::{ArchiveEntry, ArchiveRow, ResultArchive, ARCHIVE_FILE_NAME};
pub use domain::{
    galaxies_digest, ErrorLog, FailureKind, FailureRecord, GalaxyRecord, LensError, LensedImage,
    Result, TrialFlags, TrialKey, TrialResult,
};
pub use galaxy_list::{
    read_galaxy_list, split_file_name, write_galaxy_list, GalaxyList, SplitOrigin,
};
pub use parser::{parse_output_dir, parse_point_output, point_output_path};
pub use reporting::{render_summary_md, write_report};
pub use sampler::sample;
pub use telemetry::init_tracing;
pub use template::ConfigTemplate;

/// lensprof version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
