//! Base-pointer inference and per-record resolution classification.
//!
//! Format-8 pointers carry a cache level selecting which image partition a
//! resolved address belongs to. Level 0's base is structural (minimum
//! segment vmaddr masked to a 16 KiB boundary); every other level's base
//! is unknown and is inferred statistically: if assuming the level-0 base
//! makes nearly all of a level's pointers land inside known image-entry
//! spans, adopt it. This is a one-shot computation — re-running with more
//! data rebuilds the whole table.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;
use crate::container::{ContainerIndex, Segment};
use crate::fixups::{FixupRecord, FixupWalk, POINTER_FORMAT_KERNEL};
use crate::UNDER_EXPLORATION;

/// 16 KiB page mask for the structural level-0 base.
const BASE_ALIGN_MASK: u64 = !0x3FFF;

/// How a cache level's base was (or was not) established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceStatus {
    /// Level 0: seeded from image layout, not inferred.
    Seed,
    /// Coverage cleared the threshold; the level adopted the level-0 base.
    InferredBase0,
    /// Coverage was insufficient (or no base candidate existed).
    Unresolved,
}

/// Coverage evidence for one cache level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelInference {
    pub coverage_hits: u64,
    pub coverage_total: u64,
    pub coverage_ratio: f64,
    pub status: InferenceStatus,
}

/// Resolved (or unresolved) base address per cache level, with the
/// coverage evidence behind each decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasePointerTable {
    pub threshold: f64,
    pub base0: Option<u64>,
    pub bases: BTreeMap<u8, Option<u64>>,
    pub levels: BTreeMap<u8, LevelInference>,
    pub status: String,
}

impl BasePointerTable {
    pub fn base_for(&self, cache_level: u8) -> Option<u64> {
        self.bases.get(&cache_level).copied().flatten()
    }
}

/// Exhaustive resolution classes for format-8 records. `resolved_in_exec`
/// is a sub-tally of `resolved_in_entry`, not a fourth class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCounts {
    pub resolved_in_entry: u64,
    pub resolved_in_exec: u64,
    pub resolved_outside: u64,
    pub unresolved_unknown_base: u64,
}

/// Classification totals, overall and per cache level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSummary {
    pub resolved_counts: ResolvedCounts,
    pub resolved_counts_by_cache_level: BTreeMap<u8, ResolvedCounts>,
}

/// Structural level-0 base: minimum segment vmaddr masked down to a
/// 16 KiB boundary. `None` when the container declared no segments.
pub fn seed_base0(segments: &[Segment]) -> Option<u64> {
    segments.iter().map(|s| s.vmaddr).min().map(|min| min & BASE_ALIGN_MASK)
}

fn coverage_for_level(
    records: &[FixupRecord],
    index: &ContainerIndex,
    base0: u64,
    cache_level: u8,
) -> (u64, u64) {
    let mut hits = 0u64;
    let mut total = 0u64;
    for rec in records {
        if rec.pointer_format != POINTER_FORMAT_KERNEL {
            continue;
        }
        let Some(decoded) = rec.decoded else { continue };
        if decoded.cache_level != cache_level {
            continue;
        }
        total += 1;
        if index.find_entry(base0.wrapping_add(decoded.target)).is_some() {
            hits += 1;
        }
    }
    (hits, total)
}

/// Build the base-pointer table for every cache level observed in
/// `records` (level 0 always included).
pub fn infer_base_pointers(
    records: &[FixupRecord],
    index: &ContainerIndex,
    base0: Option<u64>,
    threshold: f64,
) -> BasePointerTable {
    let mut observed: BTreeSet<u8> = records
        .iter()
        .filter(|r| r.pointer_format == POINTER_FORMAT_KERNEL)
        .filter_map(|r| r.decoded.map(|d| d.cache_level))
        .collect();
    observed.insert(0);

    let mut bases: BTreeMap<u8, Option<u64>> = BTreeMap::new();
    let mut levels: BTreeMap<u8, LevelInference> = BTreeMap::new();

    for level in observed {
        let (hits, total) = match base0 {
            Some(base) => coverage_for_level(records, index, base, level),
            None => (0, 0),
        };
        let ratio = if total > 0 { hits as f64 / total as f64 } else { 0.0 };

        let (base, status) = if level == 0 {
            match base0 {
                Some(base) => (Some(base), InferenceStatus::Seed),
                None => (None, InferenceStatus::Unresolved),
            }
        } else if total > 0 && ratio >= threshold {
            (base0, InferenceStatus::InferredBase0)
        } else {
            (None, InferenceStatus::Unresolved)
        };

        bases.insert(level, base);
        levels.insert(
            level,
            LevelInference { coverage_hits: hits, coverage_total: total, coverage_ratio: ratio, status },
        );
    }

    BasePointerTable {
        threshold,
        base0,
        bases,
        levels,
        status: UNDER_EXPLORATION.to_string(),
    }
}

/// Final pass over all records: fill in `resolved_guess`, `resolved_base`,
/// and `owner_entry`, and tally resolution classes.
///
/// Exactly one of in-entry / outside / unresolved-unknown-base holds per
/// format-8 record; records with other pointer formats are never
/// classified (they still get an `owner_entry` for orientation).
pub fn classify_records(
    records: &mut [FixupRecord],
    table: &BasePointerTable,
    index: &ContainerIndex,
) -> ResolvedSummary {
    let mut summary = ResolvedSummary::default();

    for rec in records.iter_mut() {
        rec.owner_entry = index.find_entry(rec.vmaddr).map(|e| e.entry_id.clone());

        if rec.pointer_format != POINTER_FORMAT_KERNEL {
            continue;
        }
        let Some(decoded) = rec.decoded else { continue };
        let level = decoded.cache_level;
        let bucket = summary.resolved_counts_by_cache_level.entry(level).or_default();

        let Some(base) = table.base_for(level) else {
            summary.resolved_counts.unresolved_unknown_base += 1;
            bucket.unresolved_unknown_base += 1;
            continue;
        };
        let resolved = base.wrapping_add(decoded.target);
        rec.resolved_guess = Some(resolved);
        rec.resolved_base = Some(base);

        match index.find_entry(resolved) {
            Some(entry) => {
                summary.resolved_counts.resolved_in_entry += 1;
                bucket.resolved_in_entry += 1;
                if entry.is_exec_at(resolved) == Some(true) {
                    summary.resolved_counts.resolved_in_exec += 1;
                    bucket.resolved_in_exec += 1;
                }
            }
            None => {
                summary.resolved_counts.resolved_outside += 1;
                bucket.resolved_outside += 1;
            }
        }
    }

    summary
}

/// Convenience wrapper for the full inference pipeline: seed level 0,
/// infer the remaining levels, then classify every record in place.
pub fn resolve_walk(
    walk: &mut FixupWalk,
    index: &ContainerIndex,
    cfg: &AnalysisConfig,
) -> (BasePointerTable, ResolvedSummary) {
    let base0 = seed_base0(&index.segments);
    let table = infer_base_pointers(&walk.records, index, base0, cfg.coverage_threshold);
    let summary = classify_records(&mut walk.records, &table, index);
    (table, summary)
}
