use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use sandbox_probe::commands;
use sandbox_probe::load_analysis_config;

/// Heuristic decoding workbench for compiled sandbox-policy blobs and
/// multi-image kernel collections.
///
/// This CLI is a thin wrapper around `probe-core` (exposed in code as
/// `probe_core`). All substantive decoding logic lives in the library so
/// it can be tested thoroughly and reused from other frontends.
#[derive(Parser, Debug)]
#[command(
    name = "sandbox-probe",
    version,
    about = "Heuristic sandbox-profile and kernel-collection decoder",
    long_about = None
)]
struct Cli {
    /// Optional YAML file overriding analysis configuration fields
    /// (stride, thresholds, chain step cap, ...).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode one compiled policy blob into its JSON structure.
    ///
    /// Classifies the format revision, slices sections, parses the op
    /// table and fixed-stride node records, and extracts literal strings.
    DecodeProfile {
        /// Path to the compiled policy blob.
        #[arg(long)]
        path: PathBuf,

        /// Node record stride for this analysis pass (8, 12, or 16).
        #[arg(long)]
        stride: Option<usize>,

        /// Optional source label recorded in the output (defaults to the
        /// input path).
        #[arg(long)]
        source: Option<String>,

        /// Write JSON here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Extract printable strings from a file.
    Strings {
        /// Path to the input file.
        #[arg(long)]
        path: PathBuf,

        /// Minimum run length to report.
        #[arg(long)]
        min_len: Option<usize>,

        /// Emit JSON instead of offset/text lines.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Parse a multi-image container and emit its per-image index.
    ContainerIndex {
        /// Path to the container file.
        #[arg(long)]
        path: PathBuf,

        /// Write JSON here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Walk the container's chained fixups and emit a summary with base
    /// pointer inference and resolution classification.
    Fixups {
        /// Path to the container file.
        #[arg(long)]
        path: PathBuf,

        /// Write one JSON fixup record per line to this file.
        #[arg(long)]
        records_out: Option<PathBuf>,

        /// Write the summary JSON here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,

        /// Coverage ratio required to adopt the level-0 base for another
        /// cache level.
        #[arg(long)]
        threshold: Option<f64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_analysis_config(cli.config.as_deref())?;

    match cli.command {
        Command::DecodeProfile { path, stride, source, out } => {
            commands::decode_profile_command(&path, stride, source, out.as_deref(), cfg)?
        }
        Command::Strings { path, min_len, json } => {
            commands::strings_command(&path, min_len, json)?
        }
        Command::ContainerIndex { path, out } => {
            commands::container_index_command(&path, out.as_deref())?
        }
        Command::Fixups { path, records_out, out, threshold } => commands::fixups_command(
            &path,
            records_out.as_deref(),
            out.as_deref(),
            threshold,
            cfg,
        )?,
    }

    Ok(())
}
