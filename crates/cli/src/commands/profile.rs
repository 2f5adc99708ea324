use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use probe_core::profile::{decode_profile, ProfileBlob};
use probe_core::scan;
use probe_core::AnalysisConfig;

use crate::write_json_artifact;

/// Decode one compiled policy blob and emit its JSON structure.
pub fn decode_profile_command(
    path: &Path,
    stride: Option<usize>,
    source: Option<String>,
    out: Option<&Path>,
    mut cfg: AnalysisConfig,
) -> Result<()> {
    if let Some(stride) = stride {
        cfg.node_stride = stride;
    }
    let bytes = fs::read(path)
        .with_context(|| format!("Failed to read profile blob at {}", path.display()))?;
    let label = source.unwrap_or_else(|| path.display().to_string());

    let blob = ProfileBlob::new(&bytes, label);
    let decoded = decode_profile(&blob, &cfg);
    write_json_artifact(&decoded, out)
}

/// Extract printable strings from any file; orientation aid for blobs the
/// decoder does not yet understand.
pub fn strings_command(path: &Path, min_len: Option<usize>, json: bool) -> Result<()> {
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read input at {}", path.display()))?;
    let min_len = min_len.unwrap_or_else(|| AnalysisConfig::default().min_string_len);
    let strings = scan::extract_strings(&bytes, min_len);

    if json {
        write_json_artifact(&strings, None)
    } else {
        for s in strings {
            println!("{:#010x} {}", s.offset, s.text);
        }
        Ok(())
    }
}
