//! probe-core
//!
//! Core library for heuristic decoding of compiled sandbox-policy blobs and
//! multi-image kernel-collection containers.
//!
//! The crate is organized leaf-first:
//! - `scan`: generic byte utilities (printable-run detection, text-onset
//!   classification, fixed-stride slicing, clamped little-endian reads).
//! - `profile`: header classification and section decoding for compiled
//!   policy blobs across undocumented format revisions.
//! - `container`: parser for a multi-image executable container (per-image
//!   spans plus a binary-searchable range index).
//! - `fixups`: chained-fixups metadata parsing and per-page chain walking.
//! - `resolve`: statistical base-pointer inference and per-record
//!   resolution classification.
//!
//! Everything here is a pure function from input bytes (or a seekable
//! reader) to output structures; file discovery and artifact writing belong
//! to frontends. Heuristic outputs are tagged `under_exploration` so
//! downstream consumers can tell confident fields from speculative ones.

pub mod config;
pub mod container;
pub mod error;
pub mod fixups;
pub mod profile;
pub mod resolve;
pub mod scan;

pub use config::AnalysisConfig;
pub use error::{FormatError, ProbeResult};

/// Marker attached to heuristic outputs (see the JSON contracts).
pub const UNDER_EXPLORATION: &str = "under_exploration";

/// Returns the library version as encoded at compile time.
///
/// Useful for tests and for frontends to report consistent version info.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
