//! Chained-fixups metadata parsing and per-page chain walking.
//!
//! The fixups block encodes, per segment, a table of 16-bit page starts.
//! Each page's pointer slots needing relocation are linked into an
//! in-place singly-linked list inside the mapped data, so the walker reads
//! the container file itself (seek + read, 8 bytes at a time) rather than
//! the metadata block alone.
//!
//! Pointer format 8 (the recognized kernel-image encoding) is decoded; all
//! other formats emit a single undecoded record per chain start and are
//! not walked further. Decode assumptions are heuristic and tagged
//! `under_exploration` in summaries.

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom};

use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;
use crate::container::Segment;
use crate::error::{FormatError, ProbeResult};
use crate::scan;

/// The one pointer encoding this walker knows how to follow.
pub const POINTER_FORMAT_KERNEL: u16 = 8;

/// Sentinel page-start value: no fixups on this page.
const PAGE_START_NONE: u16 = 0xFFFF;
/// High bit of a page start: the low 15 bits index an auxiliary list of
/// chain starts instead of being a chain start themselves.
const PAGE_START_MULTI: u16 = 0x8000;

const FIXUPS_HEADER_LEN: usize = 28;

/// Fixed header of the fixups metadata block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixupsHeader {
    pub version: u32,
    pub starts_offset: u32,
    pub imports_offset: u32,
    pub symbols_offset: u32,
    pub imports_count: u32,
    pub imports_format: u32,
    pub symbols_format: u32,
}

/// Decoded fields of a format-8 pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerDecode {
    pub target: u64,
    pub cache_level: u8,
    pub next_delta: u16,
    pub is_auth: bool,
}

/// One pointer record encountered on a chain. Immutable once emitted,
/// except for the resolution fields filled in by `resolve`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixupRecord {
    pub segment_index: usize,
    pub segment_name: String,
    pub pointer_format: u16,
    pub page_index: usize,
    pub page_start: u16,
    pub chain_offset: u16,
    pub fileoff: u64,
    pub vmaddr: u64,
    pub raw: u64,
    pub decoded: Option<PointerDecode>,
    pub next_offset: u64,
    pub resolved_guess: Option<u64>,
    pub resolved_base: Option<u64>,
    pub owner_entry: Option<String>,
}

/// How each non-empty page start was interpreted. Reported so format
/// confidence can be judged downstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageStartModeCounts {
    /// `page_start` itself was the single chain start.
    pub single: u64,
    /// Auxiliary list with a leading count.
    pub multi_count: u64,
    /// Auxiliary list terminated by a 0xFFFF sentinel.
    pub multi_sentinel: u64,
}

/// Per-segment page statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCoverage {
    pub page_size: u16,
    pub page_count: u16,
    pub pages_with_fixups: u64,
    pub fixups: u64,
}

/// Aggregate counters over one walk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkTotals {
    pub total_fixups: u64,
    pub pointer_format_counts: BTreeMap<u16, u64>,
    pub segment_counts: BTreeMap<String, u64>,
    pub page_coverage: BTreeMap<String, PageCoverage>,
    pub max_chain_len: usize,
    pub cache_level_counts: BTreeMap<u8, u64>,
    pub page_start_mode_counts: PageStartModeCounts,
    /// Chains or tables ended early by the end of the file/block. Recorded
    /// as a count, never raised as an error.
    pub short_reads: u64,
}

/// Result of walking every chain in the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixupWalk {
    pub header: FixupsHeader,
    pub records: Vec<FixupRecord>,
    pub totals: WalkTotals,
}

/// Decode a format-8 pointer's packed fields.
pub fn decode_kernel_pointer(raw: u64) -> PointerDecode {
    PointerDecode {
        target: raw & 0x3FFF_FFFF,
        cache_level: ((raw >> 30) & 0x3) as u8,
        next_delta: ((raw >> 32) & 0xFFF) as u16,
        is_auth: (raw >> 63) & 1 == 1,
    }
}

/// Parse the fixed fixups header. A block too short for the fixed header
/// means no interpretation is meaningful, which is fatal.
pub fn parse_fixups_header(block: &[u8]) -> ProbeResult<FixupsHeader> {
    if block.len() < FIXUPS_HEADER_LEN {
        return Err(FormatError::TruncatedFixups { offset: 0, needed: FIXUPS_HEADER_LEN });
    }
    let word = |i: usize| scan::read_u32_le(block, i * 4).unwrap_or(0);
    Ok(FixupsHeader {
        version: word(0),
        starts_offset: word(1),
        imports_offset: word(2),
        symbols_offset: word(3),
        imports_count: word(4),
        imports_format: word(5),
        symbols_format: word(6),
    })
}

/// Chain starts for one page, after decoding the page-start value.
///
/// The auxiliary-list mode is disambiguated heuristically: a first value
/// that is a small positive count fitting in the remaining list room is a
/// count prefix; anything else is read as a sentinel-terminated list. The
/// bound is empirical (`count_prefix_bound`) and deliberately left as a
/// tunable, not a derived truth.
fn page_chain_starts(
    block: &[u8],
    seg_off: usize,
    page_start: u16,
    cfg: &AnalysisConfig,
    modes: &mut PageStartModeCounts,
) -> Vec<u16> {
    let mut starts = Vec::new();
    if page_start & PAGE_START_MULTI != 0 {
        let list_off = (page_start & 0x7FFF) as usize;
        let list_base = seg_off + list_off;
        let Some(first) = scan::read_u16_le(block, list_base) else {
            return starts;
        };
        let remaining = block.len().saturating_sub(list_base) / 2;
        if first > 0 && (first as usize) <= remaining.saturating_sub(1) && first < cfg.count_prefix_bound
        {
            modes.multi_count += 1;
            for idx in 0..first as usize {
                match scan::read_u16_le(block, list_base + 2 + idx * 2) {
                    Some(PAGE_START_NONE) | None => break,
                    Some(off) => starts.push(off),
                }
            }
        } else {
            modes.multi_sentinel += 1;
            let mut idx = 0usize;
            loop {
                match scan::read_u16_le(block, list_base + idx * 2) {
                    Some(PAGE_START_NONE) | None => break,
                    Some(off) => starts.push(off),
                }
                idx += 1;
            }
        }
    } else {
        modes.single += 1;
        starts.push(page_start);
    }
    starts
}

/// Walk every chain declared by the fixups block, reading pointer slots
/// from `reader` (the container file).
///
/// Per-segment info tables that run past the block are skipped and
/// counted; chains stop on a terminal record, a short read, or the hard
/// step cap (corruption guard against cyclic chains).
pub fn walk<R: Read + Seek>(
    reader: &mut R,
    block: &[u8],
    segments: &[Segment],
    cfg: &AnalysisConfig,
) -> ProbeResult<FixupWalk> {
    let header = parse_fixups_header(block)?;
    let starts_offset = header.starts_offset as usize;
    let Some(seg_count) = scan::read_u32_le(block, starts_offset) else {
        return Err(FormatError::TruncatedFixups { offset: starts_offset as u64, needed: 4 });
    };

    let mut records = Vec::new();
    let mut totals = WalkTotals::default();

    for seg_index in 0..seg_count as usize {
        let Some(info_off) = scan::read_u32_le(block, starts_offset + 4 + seg_index * 4) else {
            totals.short_reads += 1;
            break;
        };
        if info_off == 0 {
            continue;
        }
        let seg_off = starts_offset + info_off as usize;

        let (Some(page_size), Some(pointer_format), Some(segment_offset), Some(page_count)) = (
            scan::read_u16_le(block, seg_off + 4),
            scan::read_u16_le(block, seg_off + 6),
            scan::read_u64_le(block, seg_off + 8),
            scan::read_u16_le(block, seg_off + 20),
        ) else {
            totals.short_reads += 1;
            continue;
        };
        let page_starts_off = seg_off + 22;

        let (seg_name, seg_vmaddr) = match segments.get(seg_index) {
            Some(seg) => (seg.name.clone(), seg.vmaddr),
            None => (format!("segment_{seg_index}"), 0),
        };

        totals.pointer_format_counts.entry(pointer_format).or_insert(0);
        totals.segment_counts.entry(seg_name.clone()).or_insert(0);
        totals.page_coverage.entry(seg_name.clone()).or_insert(PageCoverage {
            page_size,
            page_count,
            pages_with_fixups: 0,
            fixups: 0,
        });

        for page_index in 0..page_count as usize {
            let Some(page_start) = scan::read_u16_le(block, page_starts_off + page_index * 2)
            else {
                totals.short_reads += 1;
                break;
            };
            if page_start == PAGE_START_NONE {
                continue;
            }
            let starts = page_chain_starts(
                block,
                seg_off,
                page_start,
                cfg,
                &mut totals.page_start_mode_counts,
            );
            if starts.is_empty() {
                continue;
            }
            if let Some(cov) = totals.page_coverage.get_mut(&seg_name) {
                cov.pages_with_fixups += 1;
            }

            for chain_start in starts {
                let page_base = page_index as u64 * page_size as u64 + chain_start as u64;
                // Offsets come straight from the metadata block; clamp
                // instead of trusting them to stay in range.
                let mut chain_fileoff = segment_offset.saturating_add(page_base);
                let mut chain_vmaddr = seg_vmaddr.saturating_add(page_base);
                let mut chain_steps = 0usize;

                loop {
                    reader.seek(SeekFrom::Start(chain_fileoff))?;
                    let mut raw_bytes = [0u8; 8];
                    let mut filled = 0usize;
                    // Partial reads at EOF end the chain quietly.
                    let short = loop {
                        match reader.read(&mut raw_bytes[filled..])? {
                            0 => break filled < 8,
                            n => {
                                filled += n;
                                if filled == 8 {
                                    break false;
                                }
                            }
                        }
                    };
                    if short {
                        totals.short_reads += 1;
                        break;
                    }
                    let raw = u64::from_le_bytes(raw_bytes);

                    let (decoded, next_offset) = if pointer_format == POINTER_FORMAT_KERNEL {
                        let decoded = decode_kernel_pointer(raw);
                        let next_offset = decoded.next_delta as u64 * 4;
                        *totals.cache_level_counts.entry(decoded.cache_level).or_insert(0) += 1;
                        (Some(decoded), next_offset)
                    } else {
                        // Unsupported encodings are recorded but not walked.
                        (None, 0)
                    };

                    records.push(FixupRecord {
                        segment_index: seg_index,
                        segment_name: seg_name.clone(),
                        pointer_format,
                        page_index,
                        page_start,
                        chain_offset: chain_start,
                        fileoff: chain_fileoff,
                        vmaddr: chain_vmaddr,
                        raw,
                        decoded,
                        next_offset,
                        resolved_guess: None,
                        resolved_base: None,
                        owner_entry: None,
                    });
                    totals.total_fixups += 1;
                    *totals.pointer_format_counts.entry(pointer_format).or_insert(0) += 1;
                    *totals.segment_counts.entry(seg_name.clone()).or_insert(0) += 1;
                    if let Some(cov) = totals.page_coverage.get_mut(&seg_name) {
                        cov.fixups += 1;
                    }

                    chain_steps += 1;
                    totals.max_chain_len = totals.max_chain_len.max(chain_steps);
                    if next_offset == 0 || chain_steps > cfg.chain_step_cap {
                        break;
                    }
                    chain_fileoff = chain_fileoff.saturating_add(next_offset);
                    chain_vmaddr = chain_vmaddr.saturating_add(next_offset);
                }
            }
        }
    }

    Ok(FixupWalk { header, records, totals })
}
