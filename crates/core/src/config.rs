use serde::{Deserialize, Serialize};

/// Explicit analysis configuration passed into each decode.
///
/// Every tunable the decoders consult lives here; there is no process-wide
/// heuristics state. Serde defaults allow a partial YAML/JSON file to
/// override any subset of fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Node record stride for profile decoding. Chosen per analysis pass
    /// (8, 12, or 16); the decoder does not auto-detect it.
    pub node_stride: usize,
    /// Forward window for the text-onset scan.
    pub text_window: usize,
    /// Printable-or-nul ratio at which a window counts as text.
    pub printable_threshold: f64,
    /// Minimum printable-run length emitted as a literal string.
    pub min_string_len: usize,
    /// Upper bound for accepting the preamble's second word as an
    /// operation count. Guards against reading unrelated data as a count.
    pub op_count_bound: u16,
    /// Empirical bound for the count-prefix vs sentinel disambiguation of
    /// auxiliary page-start lists. Tunable, not a derived truth.
    pub count_prefix_bound: u16,
    /// Hard cap on chain-walk steps. Corruption guard against cyclic or
    /// malformed chains; a safety invariant, not an optimization.
    pub chain_step_cap: usize,
    /// Coverage ratio at which a cache level adopts the level-0 base.
    pub coverage_threshold: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            node_stride: 12,
            text_window: 64,
            printable_threshold: 0.7,
            min_string_len: 4,
            op_count_bound: 2048,
            count_prefix_bound: 0x400,
            chain_step_cap: 10_000,
            coverage_threshold: 0.95,
        }
    }
}
