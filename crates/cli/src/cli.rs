#![forbid(unsafe_code)]

use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::path::{Path, PathBuf};

/// edged: edge video segment cache and inference dispatch daemon
///
/// Serves recorded video segments through a memory and disk cache, warms
/// upcoming segments ahead of playback and places inference work on the
/// least loaded edge device. Settings come from the configuration file and
/// `EDGED_*` environment variables.
#[derive(Debug, Parser, Clone)]
#[command(about, long_about, version)]
pub struct Cli {
    /// Path to configuration file.
    ///
    /// Without one, defaults and the environment are used.
    #[arg(short, long, value_parser = validate_file)]
    pub conffile: Option<PathBuf>,

    /// Recording archive the segment origin reads from.
    ///
    /// Segments are looked up as `<archive>/<task>/<start>_<duration>.seg`.
    #[arg(short, long, default_value = "/var/lib/edged/archive")]
    pub archive: PathBuf,

    /// Directory of the disk cache tier, overriding the configuration.
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    pub dump_config: bool,

    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,
}

/// Check if the file exists.
#[inline(always)]
fn validate_file(file: &str) -> Result<PathBuf, String> {
    let path = Path::new(file);
    if path.is_file() {
        Ok(path.to_owned())
    } else {
        Err(format!("File not found: {:?}", path))
    }
}
