use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use probe_core::container;
use probe_core::fixups::{self, FixupsHeader, PageCoverage, PageStartModeCounts};
use probe_core::resolve::{self, BasePointerTable, ResolvedCounts};
use probe_core::{AnalysisConfig, UNDER_EXPLORATION};
use serde::Serialize;

use crate::commands::parse_container;
use crate::{sha256_file, timestamp_now, write_json_artifact};

/// Metadata header attached to the fixups summary artifact.
#[derive(Debug, Serialize)]
pub struct FixupsMeta {
    pub input: String,
    pub sha256: String,
    pub generated_at: String,
    pub fixups_dataoff: u64,
    pub fixups_datasize: u64,
    #[serde(flatten)]
    pub header: FixupsHeader,
    pub records_jsonl: Option<String>,
    pub status: String,
}

/// Aggregate counters of one walk plus resolution classification.
#[derive(Debug, Serialize)]
pub struct FixupCounts {
    pub total_fixups: u64,
    pub pointer_format_counts: BTreeMap<u16, u64>,
    pub segment_counts: BTreeMap<String, u64>,
    pub page_coverage: BTreeMap<String, PageCoverage>,
    pub max_chain_len: usize,
    pub cache_level_counts: BTreeMap<u8, u64>,
    pub page_start_mode_counts: PageStartModeCounts,
    pub short_reads: u64,
    pub resolved_counts: ResolvedCounts,
    pub resolved_counts_by_cache_level: BTreeMap<u8, ResolvedCounts>,
}

#[derive(Debug, Serialize)]
pub struct FixupsSummaryOut {
    pub meta: FixupsMeta,
    pub fixup_counts: FixupCounts,
    pub base_pointers: BTreeMap<u8, Option<u64>>,
    pub base_pointer_inference: BasePointerTable,
}

/// Full fixups pipeline: parse the container, walk every chain, infer
/// base pointers, classify resolutions, and emit the summary (and
/// optionally one JSON record per line).
pub fn fixups_command(
    path: &Path,
    records_out: Option<&Path>,
    out: Option<&Path>,
    threshold: Option<f64>,
    mut cfg: AnalysisConfig,
) -> Result<()> {
    if let Some(threshold) = threshold {
        cfg.coverage_threshold = threshold;
    }

    let index = parse_container(path)?;
    // A fileset without a fixups block cannot be walked at all; this is
    // the one fatal gap in the pipeline.
    let block_span = index
        .require_fixups_block()
        .with_context(|| format!("Container at {} has no fixups block", path.display()))?;

    let mut file = fs::File::open(path)
        .with_context(|| format!("Failed to open container at {}", path.display()))?;
    let block = container::read_block(&mut file, block_span)
        .context("Failed to read fixups metadata block")?;

    let mut walk = fixups::walk(&mut file, &block, &index.segments, &cfg)
        .context("Failed to walk chained fixups")?;
    let (table, resolved) = resolve::resolve_walk(&mut walk, &index, &cfg);

    let records_jsonl = match records_out {
        Some(records_path) => {
            let file = fs::File::create(records_path).with_context(|| {
                format!("Failed to create records output at {}", records_path.display())
            })?;
            let mut writer = BufWriter::new(file);
            for record in &walk.records {
                let line = serde_json::to_string(record)
                    .context("Failed to serialize fixup record")?;
                writeln!(writer, "{line}").with_context(|| {
                    format!("Failed to write records output at {}", records_path.display())
                })?;
            }
            writer.flush().context("Failed to flush records output")?;
            Some(records_path.display().to_string())
        }
        None => None,
    };

    let summary = FixupsSummaryOut {
        meta: FixupsMeta {
            input: path.display().to_string(),
            sha256: sha256_file(path)?,
            generated_at: timestamp_now(),
            fixups_dataoff: block_span.fileoff,
            fixups_datasize: block_span.size,
            header: walk.header,
            records_jsonl,
            status: UNDER_EXPLORATION.to_string(),
        },
        fixup_counts: FixupCounts {
            total_fixups: walk.totals.total_fixups,
            pointer_format_counts: walk.totals.pointer_format_counts,
            segment_counts: walk.totals.segment_counts,
            page_coverage: walk.totals.page_coverage,
            max_chain_len: walk.totals.max_chain_len,
            cache_level_counts: walk.totals.cache_level_counts,
            page_start_mode_counts: walk.totals.page_start_mode_counts,
            short_reads: walk.totals.short_reads,
            resolved_counts: resolved.resolved_counts,
            resolved_counts_by_cache_level: resolved.resolved_counts_by_cache_level,
        },
        base_pointers: table.bases.clone(),
        base_pointer_inference: table,
    };
    write_json_artifact(&summary, out)
}
