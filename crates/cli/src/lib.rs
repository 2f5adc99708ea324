use std::fs;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

pub mod commands;

/// Compute the SHA-256 hash of a file and return it as a hex string.
///
/// Used to pin summaries to the exact input bytes they describe.
pub fn sha256_file(path: &Path) -> Result<String> {
    let file = fs::File::open(path)
        .with_context(|| format!("Failed to open input for hashing: {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = reader
            .read(&mut buf)
            .with_context(|| format!("Failed to read input for hashing: {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let digest = hasher.finalize();
    Ok(format!("{:x}", digest))
}

/// Load an `AnalysisConfig`, applying YAML overrides when a path is given.
///
/// The override file may set any subset of fields; unset fields keep their
/// defaults.
pub fn load_analysis_config(path: Option<&Path>) -> Result<probe_core::AnalysisConfig> {
    match path {
        None => Ok(probe_core::AnalysisConfig::default()),
        Some(p) => {
            let body = fs::read_to_string(p)
                .with_context(|| format!("Failed to read analysis config at {}", p.display()))?;
            serde_yaml::from_str(&body)
                .with_context(|| format!("Failed to parse analysis config at {}", p.display()))
        }
    }
}

/// Serialize a value as pretty JSON to a file, or to stdout when no path
/// is given.
pub fn write_json_artifact<T: serde::Serialize>(value: &T, out: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize JSON output")?;
    match out {
        Some(path) => fs::write(path, json)
            .with_context(|| format!("Failed to write output to {}", path.display())),
        None => {
            println!("{json}");
            Ok(())
        }
    }
}

/// RFC 3339 timestamp for artifact metadata.
pub fn timestamp_now() -> String {
    chrono::Utc::now().to_rfc3339()
}
