//! Heuristic decoder for compiled sandbox-policy blobs.
//!
//! Two format revisions are recognized: an early decision-tree layout with
//! a tiny 4-byte header, and the modern graph layout with a 16-byte
//! preamble, an op-table of u16 node entry points, fixed-stride node
//! records, and a trailing literal/regex pool. Classification is a total
//! function of the first 16 bytes; everything downstream clamps rather
//! than fails, because the formats are undocumented and version drift is
//! expected. Decoded output is tagged `under_exploration`.

use std::collections::BTreeSet;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;
use crate::scan::{self, LiteralString};
use crate::UNDER_EXPLORATION;

/// Immutable input buffer plus a source label used only for diagnostics.
#[derive(Debug, Clone)]
pub struct ProfileBlob<'a> {
    pub bytes: &'a [u8],
    pub source: String,
}

impl<'a> ProfileBlob<'a> {
    pub fn new(bytes: &'a [u8], source: impl Into<String>) -> Self {
        Self { bytes, source: source.into() }
    }
}

/// Recognized format revisions of a compiled policy blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormatVariant {
    #[serde(rename = "legacy-decision-tree")]
    LegacyDecisionTree,
    #[serde(rename = "modern-heuristic")]
    ModernHeuristic,
}

/// Classified header for one blob.
///
/// Exactly one variant is chosen per buffer, decided solely from the first
/// 16 bytes. Counts are `None` whenever the heuristic declines to guess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub format_variant: FormatVariant,
    pub operation_count: Option<u32>,
    pub node_count: Option<u32>,
    pub regex_count: Option<u32>,
    pub raw_length: usize,
}

/// Byte ranges for the three sections following the preamble.
///
/// Invariant: `preamble`, `op_table`, `nodes`, and `literal_pool` are
/// contiguous, non-overlapping, and tile `[0, raw_length)` exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sections {
    pub preamble: Range<usize>,
    pub op_table: Range<usize>,
    pub nodes: Range<usize>,
    pub literal_pool: Range<usize>,
}

impl Sections {
    pub fn lengths(&self) -> SectionLengths {
        SectionLengths {
            op_table: self.op_table.len(),
            nodes: self.nodes.len(),
            literal_pool: self.literal_pool.len(),
        }
    }
}

/// Section lengths as reported in JSON output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionLengths {
    pub op_table: usize,
    pub nodes: usize,
    pub literal_pool: usize,
}

/// One fixed-stride node record.
///
/// `tag` is the record's first byte; `fields` are the remaining bytes read
/// as little-endian u16 pairs. Fields are opaque integers — their semantic
/// role comes from external layout metadata, not from this decoder.
/// `literal_refs` lists field values that coincide with the pool-relative
/// offset of an extracted literal (orientation aid, heuristic).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub offset: usize,
    pub tag: u8,
    pub fields: Vec<u16>,
    pub literal_refs: Vec<u64>,
    pub hex: String,
}

/// Edge validation tallies: how many field values land inside `[0,
/// node_count)` when read as node indices. Reporting only; no edges are
/// materialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeStats {
    pub in_bounds: usize,
    pub total: usize,
}

/// Full decode of one policy blob. Field names are stable for downstream
/// JSON consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedProfile {
    pub format_variant: FormatVariant,
    pub preamble_words: Vec<u16>,
    pub op_count: Option<u32>,
    pub op_table: Vec<u16>,
    pub nodes: Vec<NodeRecord>,
    pub literal_strings: Vec<LiteralString>,
    pub sections: SectionLengths,
    pub node_stride: usize,
    /// Trailing bytes of the node section not covered by stride slicing.
    /// Non-zero means reduced decode fidelity, never an error.
    pub stride_remainder: usize,
    pub edge_stats: EdgeStats,
    pub status: String,
    pub source: String,
}

const MODERN_PREAMBLE_LEN: usize = 16;
const LEGACY_HEADER_LEN: usize = 4;

/// Legacy-format probe: the first u16 is a regex-table offset in 8-byte
/// words; the op table fills the gap between the 4-byte header and that
/// offset, so the gap must be positive and an even number of bytes.
fn legacy_candidate(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < LEGACY_HEADER_LEN {
        return None;
    }
    let words = scan::read_u16_le(bytes, 0)? as usize;
    let candidate = words * 8;
    if candidate > LEGACY_HEADER_LEN && candidate <= bytes.len() && (candidate - 4) % 2 == 0 {
        Some(candidate)
    } else {
        None
    }
}

/// Classify a buffer into exactly one `Header`.
///
/// Total and deterministic over the first <= 16 bytes: every buffer of
/// length >= 2 classifies; shorter buffers fall through to the modern
/// variant with all counts unknown.
pub fn classify_header(bytes: &[u8], cfg: &AnalysisConfig) -> Header {
    if let Some(candidate) = legacy_candidate(bytes) {
        return Header {
            format_variant: FormatVariant::LegacyDecisionTree,
            operation_count: Some(((candidate - LEGACY_HEADER_LEN) / 2) as u32),
            node_count: None,
            regex_count: bytes.get(2).map(|b| *b as u32),
            raw_length: bytes.len(),
        };
    }

    // Modern heuristic: the second preamble word usually matches the
    // op-table entry count. Accept it only inside a sanity bound so
    // unrelated data is not misread as a huge count.
    let operation_count = scan::read_u16_le(bytes, 2)
        .filter(|c| *c > 0 && *c < cfg.op_count_bound)
        .map(u32::from);

    Header {
        format_variant: FormatVariant::ModernHeuristic,
        operation_count,
        node_count: None,
        regex_count: None,
        raw_length: bytes.len(),
    }
}

/// Compute section byte ranges for a classified blob.
///
/// All boundaries clamp to the buffer length; the tiling invariant holds
/// for every input, including truncated ones.
pub fn slice_sections(bytes: &[u8], header: &Header, cfg: &AnalysisConfig) -> Sections {
    match header.format_variant {
        FormatVariant::LegacyDecisionTree => {
            let candidate = legacy_candidate(bytes).unwrap_or(bytes.len().min(LEGACY_HEADER_LEN));
            let preamble_end = LEGACY_HEADER_LEN.min(bytes.len());
            Sections {
                preamble: 0..preamble_end,
                op_table: preamble_end..candidate,
                // The legacy layout has no separate node graph; handlers are
                // embedded in the regex/literal region.
                nodes: candidate..candidate,
                literal_pool: candidate..bytes.len(),
            }
        }
        FormatVariant::ModernHeuristic => {
            let preamble_end = MODERN_PREAMBLE_LEN.min(bytes.len());
            let op_table_len = header.operation_count.unwrap_or(0) as usize * 2;
            let op_table_end = preamble_end.saturating_add(op_table_len).min(bytes.len());
            let literal_start =
                scan::find_text_onset(bytes, op_table_end, cfg.text_window, cfg.printable_threshold);
            Sections {
                preamble: 0..preamble_end,
                op_table: preamble_end..op_table_end,
                nodes: op_table_end..literal_start,
                literal_pool: literal_start..bytes.len(),
            }
        }
    }
}

fn parse_preamble_words(preamble: &[u8]) -> Vec<u16> {
    preamble.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect()
}

fn parse_op_table(bytes: &[u8]) -> Vec<u16> {
    bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect()
}

fn hex_string(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Decode one blob end to end: classify, slice, parse the op table and
/// node records, extract literal strings.
///
/// Never fails: malformed input degrades to empty sections and zero
/// counts. The node stride comes from `cfg` and is not auto-detected.
pub fn decode_profile(blob: &ProfileBlob<'_>, cfg: &AnalysisConfig) -> DecodedProfile {
    let header = classify_header(blob.bytes, cfg);
    let sections = slice_sections(blob.bytes, &header, cfg);

    let preamble_words = parse_preamble_words(&blob.bytes[sections.preamble.clone()]);
    let op_table = parse_op_table(&blob.bytes[sections.op_table.clone()]);

    let node_bytes = &blob.bytes[sections.nodes.clone()];
    let (chunks, stride_remainder) = scan::slice_fixed_stride(node_bytes, cfg.node_stride);
    let node_count = chunks.len();

    let literal_strings =
        scan::extract_strings(&blob.bytes[sections.literal_pool.clone()], cfg.min_string_len);
    let literal_offsets: BTreeSet<usize> = literal_strings.iter().map(|s| s.offset).collect();

    let mut edge_stats = EdgeStats::default();
    let mut nodes = Vec::with_capacity(node_count);
    for (index, chunk) in chunks.iter().enumerate() {
        let tag = chunk[0];
        let fields: Vec<u16> =
            chunk[1..].chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
        let mut literal_refs = Vec::new();
        for field in &fields {
            edge_stats.total += 1;
            if (*field as usize) < node_count {
                edge_stats.in_bounds += 1;
            }
            if literal_offsets.contains(&(*field as usize)) {
                literal_refs.push(*field as u64);
            }
        }
        nodes.push(NodeRecord {
            offset: index * cfg.node_stride,
            tag,
            fields,
            literal_refs,
            hex: hex_string(chunk),
        });
    }

    DecodedProfile {
        format_variant: header.format_variant,
        preamble_words,
        op_count: header.operation_count,
        op_table,
        nodes,
        literal_strings,
        sections: sections.lengths(),
        node_stride: cfg.node_stride,
        stride_remainder,
        edge_stats,
        status: UNDER_EXPLORATION.to_string(),
        source: blob.source.clone(),
    }
}
