use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use probe_core::container::{self, ContainerIndex, FILETYPE_FILESET};
use serde::Serialize;

use crate::{sha256_file, timestamp_now, write_json_artifact};

/// Metadata header attached to the fileset-index artifact.
#[derive(Debug, Serialize)]
pub struct ContainerIndexMeta {
    pub input: String,
    pub sha256: String,
    pub generated_at: String,
    pub filetype: u32,
    pub filetype_name: String,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub segment_count: usize,
    pub entry_count: usize,
}

#[derive(Debug, Serialize)]
pub struct ContainerIndexOut {
    pub meta: ContainerIndexMeta,
    pub segments: Vec<probe_core::container::Segment>,
    pub entries: Vec<probe_core::container::ImageEntry>,
}

/// Open a container file and parse its index.
pub fn parse_container(path: &Path) -> Result<ContainerIndex> {
    let mut file = fs::File::open(path)
        .with_context(|| format!("Failed to open container at {}", path.display()))?;
    container::parse(&mut file)
        .with_context(|| format!("Failed to parse container at {}", path.display()))
}

/// Emit the per-image index (segments, entries, spans) for a container.
pub fn container_index_command(path: &Path, out: Option<&Path>) -> Result<()> {
    let index = parse_container(path)?;

    let filetype_name =
        if index.header.filetype == FILETYPE_FILESET { "fileset" } else { "unknown" };
    let artifact = ContainerIndexOut {
        meta: ContainerIndexMeta {
            input: path.display().to_string(),
            sha256: sha256_file(path)?,
            generated_at: timestamp_now(),
            filetype: index.header.filetype,
            filetype_name: filetype_name.to_string(),
            ncmds: index.header.ncmds,
            sizeofcmds: index.header.sizeofcmds,
            segment_count: index.segments.len(),
            entry_count: index.entries.len(),
        },
        segments: index.segments,
        entries: index.entries,
    };
    write_json_artifact(&artifact, out)
}
