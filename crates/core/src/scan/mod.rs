//! Generic byte-scanning utilities.
//!
//! Pure functions over byte slices; no I/O. Out-of-range access clamps or
//! returns `None` — these helpers are routinely pointed at corrupt or
//! attacker-controlled buffers and must never panic.

use serde::{Deserialize, Serialize};

/// A printable run extracted from a byte buffer, with the offset of its
/// first byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiteralString {
    pub offset: usize,
    pub text: String,
}

/// True for bytes that count toward the text-onset ratio.
///
/// Nul bytes count as text-like: literal pools are nul-padded and
/// nul-separated, so a run of zeros is evidence *for* a pool, not against
/// it. String extraction (`extract_strings`) still breaks runs on nul.
pub fn is_text_like(b: u8) -> bool {
    b == 0x00 || (0x20..=0x7E).contains(&b)
}

fn is_printable(b: u8) -> bool {
    (0x20..=0x7E).contains(&b)
}

/// Scan forward from `start` for the first offset where the `window`-byte
/// forward slice has a text-like ratio >= `threshold`.
///
/// Returns `buf.len()` when no such offset exists; callers treat data as
/// non-text unless the scan says otherwise. The window is clamped at the
/// end of the buffer and the ratio is computed over the clamped slice.
pub fn find_text_onset(buf: &[u8], start: usize, window: usize, threshold: f64) -> usize {
    if window == 0 {
        return buf.len();
    }
    for i in start..buf.len() {
        let end = (i + window).min(buf.len());
        let chunk = &buf[i..end];
        if chunk.is_empty() {
            continue;
        }
        let text_like = chunk.iter().filter(|b| is_text_like(**b)).count();
        if text_like as f64 / chunk.len() as f64 >= threshold {
            return i;
        }
    }
    buf.len()
}

/// Accumulate consecutive printable bytes, emitting a string whenever a run
/// of length >= `min_len` ends. Any non-printable byte (including nul)
/// resets the run.
pub fn extract_strings(buf: &[u8], min_len: usize) -> Vec<LiteralString> {
    let mut out = Vec::new();
    let mut run_start = 0usize;
    let mut run: Vec<u8> = Vec::new();
    for (i, b) in buf.iter().enumerate() {
        if is_printable(*b) {
            if run.is_empty() {
                run_start = i;
            }
            run.push(*b);
        } else {
            flush_run(&mut out, run_start, &mut run, min_len);
        }
    }
    flush_run(&mut out, run_start, &mut run, min_len);
    out
}

fn flush_run(out: &mut Vec<LiteralString>, start: usize, run: &mut Vec<u8>, min_len: usize) {
    if run.len() >= min_len.max(1) {
        // Runs are built from printable ASCII only, so this cannot fail.
        let text = String::from_utf8_lossy(run).into_owned();
        out.push(LiteralString { offset: start, text });
    }
    run.clear();
}

/// Slice `buf` into exactly `len / stride` chunks of `stride` bytes.
///
/// The trailing `len % stride` bytes are discarded and returned as the
/// remainder count. A non-zero remainder is a decode-fidelity warning for
/// the caller, never an error. A zero stride yields no chunks and the
/// whole buffer as remainder.
pub fn slice_fixed_stride(buf: &[u8], stride: usize) -> (Vec<&[u8]>, usize) {
    if stride == 0 {
        return (Vec::new(), buf.len());
    }
    let chunks: Vec<&[u8]> = buf.chunks_exact(stride).collect();
    (chunks, buf.len() % stride)
}

/// Clamped little-endian u16 read; `None` when the slice is too short.
pub fn read_u16_le(buf: &[u8], off: usize) -> Option<u16> {
    let bytes = buf.get(off..off.checked_add(2)?)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Clamped little-endian u32 read; `None` when the slice is too short.
pub fn read_u32_le(buf: &[u8], off: usize) -> Option<u32> {
    let bytes = buf.get(off..off.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Clamped little-endian u64 read; `None` when the slice is too short.
pub fn read_u64_le(buf: &[u8], off: usize) -> Option<u64> {
    let bytes = buf.get(off..off.checked_add(8)?)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Some(u64::from_le_bytes(raw))
}

/// Read a nul-terminated ASCII name out of a fixed-width field, ignoring
/// non-ASCII bytes.
pub fn read_fixed_name(buf: &[u8], off: usize, width: usize) -> String {
    let end = off.saturating_add(width).min(buf.len());
    let field = buf.get(off..end).unwrap_or(&[]);
    let terminated = field.split(|b| *b == 0).next().unwrap_or(&[]);
    terminated.iter().filter(|b| b.is_ascii()).map(|b| *b as char).collect()
}
