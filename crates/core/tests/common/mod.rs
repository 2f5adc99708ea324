//! Shared builders for synthetic containers and fixups blocks.
//!
//! These assemble just enough of the on-disk layout to exercise the
//! parsers: a 32-byte header, load commands, embedded image-entry headers,
//! and a fixups metadata block with per-segment page-start tables.

#![allow(dead_code)]

use probe_core::container::{ContainerHeader, ContainerIndex, ImageEntry, Segment, SegmentDetail, Span};
use probe_core::fixups::FixupRecord;

pub const MAGIC_64: u32 = 0xFEED_FACF;
pub const FILETYPE_FILESET: u32 = 0xC;
pub const CMD_SEGMENT_64: u32 = 0x19;
pub const CMD_FILESET_ENTRY: u32 = 0x35;
pub const CMD_CHAINED_FIXUPS: u32 = 0x8000_0034;

pub fn push_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub fn push_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub fn fixed_name(name: &str, width: usize) -> Vec<u8> {
    let mut out = name.as_bytes().to_vec();
    out.resize(width, 0);
    out
}

/// 32-byte container header.
pub fn header(filetype: u32, ncmds: u32, sizeofcmds: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    push_u32(&mut buf, MAGIC_64);
    push_u32(&mut buf, 0x0100_000C); // cputype
    push_u32(&mut buf, 0); // cpusubtype
    push_u32(&mut buf, filetype);
    push_u32(&mut buf, ncmds);
    push_u32(&mut buf, sizeofcmds);
    push_u32(&mut buf, 0); // flags
    push_u32(&mut buf, 0); // reserved
    buf
}

/// 72-byte segment command with no sections.
pub fn segment_cmd(name: &str, vmaddr: u64, vmsize: u64, fileoff: u64, filesize: u64) -> Vec<u8> {
    let mut buf = Vec::new();
    push_u32(&mut buf, CMD_SEGMENT_64);
    push_u32(&mut buf, 72);
    buf.extend_from_slice(&fixed_name(name, 16));
    push_u64(&mut buf, vmaddr);
    push_u64(&mut buf, vmsize);
    push_u64(&mut buf, fileoff);
    push_u64(&mut buf, filesize);
    push_u32(&mut buf, 0); // maxprot
    push_u32(&mut buf, 0); // initprot
    push_u32(&mut buf, 0); // nsects
    push_u32(&mut buf, 0); // flags
    buf
}

/// Fileset-entry command with the entry id string at offset 32.
pub fn fileset_entry_cmd(entry_id: &str, vmaddr: u64, fileoff: u64) -> Vec<u8> {
    let name_bytes = entry_id.len() + 1;
    let padded = (32 + name_bytes + 7) / 8 * 8;
    let mut buf = Vec::new();
    push_u32(&mut buf, CMD_FILESET_ENTRY);
    push_u32(&mut buf, padded as u32);
    push_u64(&mut buf, vmaddr);
    push_u64(&mut buf, fileoff);
    push_u32(&mut buf, 32); // entry-id string offset within the command
    push_u32(&mut buf, 0); // reserved
    buf.extend_from_slice(entry_id.as_bytes());
    buf.resize(padded, 0);
    buf
}

/// Linkedit-data style command declaring the chained-fixups block.
pub fn chained_fixups_cmd(dataoff: u32, datasize: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    push_u32(&mut buf, CMD_CHAINED_FIXUPS);
    push_u32(&mut buf, 16);
    push_u32(&mut buf, dataoff);
    push_u32(&mut buf, datasize);
    buf
}

/// Assemble a header + load commands at a given position inside `file`,
/// growing the file as needed.
pub fn place_image(file: &mut Vec<u8>, offset: usize, filetype: u32, cmds: &[Vec<u8>]) {
    let sizeofcmds: usize = cmds.iter().map(Vec::len).sum();
    let mut image = header(filetype, cmds.len() as u32, sizeofcmds as u32);
    for cmd in cmds {
        image.extend_from_slice(cmd);
    }
    if file.len() < offset + image.len() {
        file.resize(offset + image.len(), 0);
    }
    file[offset..offset + image.len()].copy_from_slice(&image);
}

/// Encode a format-8 pointer value.
pub fn kc_ptr(target: u64, cache_level: u8, next_delta: u16, is_auth: bool) -> u64 {
    let mut raw = target & 0x3FFF_FFFF;
    raw |= (cache_level as u64 & 0x3) << 30;
    raw |= (next_delta as u64 & 0xFFF) << 32;
    if is_auth {
        raw |= 1 << 63;
    }
    raw
}

/// Write a little-endian u64 at an absolute file offset, growing the file
/// as needed.
pub fn place_u64(file: &mut Vec<u8>, offset: usize, value: u64) {
    if file.len() < offset + 8 {
        file.resize(offset + 8, 0);
    }
    file[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// Fixups block builder: fixed header, starts table, per-segment info.
pub struct FixupsBlockBuilder {
    seg_infos: Vec<Vec<u8>>,
}

impl FixupsBlockBuilder {
    pub fn new() -> Self {
        Self { seg_infos: Vec::new() }
    }

    /// Add a segment info record. `page_starts` are the raw 16-bit values;
    /// `extra_u16s` lands right after the page-start array (auxiliary
    /// chain-start lists indexed by high-bit page starts).
    pub fn segment(
        mut self,
        page_size: u16,
        pointer_format: u16,
        segment_offset: u64,
        page_starts: &[u16],
        extra_u16s: &[u16],
    ) -> Self {
        let mut info = Vec::new();
        let size = 22 + (page_starts.len() + extra_u16s.len()) * 2;
        push_u32(&mut info, size as u32);
        push_u16(&mut info, page_size);
        push_u16(&mut info, pointer_format);
        push_u64(&mut info, segment_offset);
        push_u32(&mut info, 0); // max_valid_pointer
        push_u16(&mut info, page_starts.len() as u16);
        for start in page_starts {
            push_u16(&mut info, *start);
        }
        for extra in extra_u16s {
            push_u16(&mut info, *extra);
        }
        self.seg_infos.push(info);
        self
    }

    /// Serialize the block: 28-byte header, seg-count + offsets table,
    /// then the info records.
    pub fn build(self) -> Vec<u8> {
        let starts_offset = 28u32;
        let mut block = Vec::new();
        push_u32(&mut block, 0); // version
        push_u32(&mut block, starts_offset);
        push_u32(&mut block, 0); // imports_offset
        push_u32(&mut block, 0); // symbols_offset
        push_u32(&mut block, 0); // imports_count
        push_u32(&mut block, 0); // imports_format
        push_u32(&mut block, 0); // symbols_format

        let seg_count = self.seg_infos.len();
        push_u32(&mut block, seg_count as u32);
        // Info offsets are relative to the starts table.
        let table_len = 4 + seg_count * 4;
        let mut next = table_len;
        for info in &self.seg_infos {
            push_u32(&mut block, next as u32);
            next += info.len();
        }
        for info in &self.seg_infos {
            block.extend_from_slice(info);
        }
        block
    }
}

/// Hand-built index for inference tests; entries must be given sorted by
/// vmaddr span start.
pub fn index_with_entries(segments: Vec<Segment>, entries: Vec<ImageEntry>) -> ContainerIndex {
    ContainerIndex {
        header: ContainerHeader { filetype: FILETYPE_FILESET, ncmds: 0, sizeofcmds: 0 },
        segments,
        entries,
        fixups_block: None,
    }
}

/// Image entry covering one vm span, with a single non-exec segment
/// detail spanning the whole entry.
pub fn entry(entry_id: &str, vm_start: u64, vm_end: u64) -> ImageEntry {
    ImageEntry {
        entry_id: entry_id.to_string(),
        fileoff: 0,
        vmaddr: vm_start,
        segment_details: vec![SegmentDetail {
            name: "__DATA".to_string(),
            vmaddr: vm_start,
            vmsize: vm_end - vm_start,
            vmaddr_end: vm_end,
            fileoff: 0,
            filesize: vm_end - vm_start,
            is_exec_heuristic: false,
        }],
        file_span: Span::new(0, 0),
        vmaddr_span: Span::new(vm_start, vm_end),
    }
}

/// Minimal format-8 record for inference tests.
pub fn kernel_record(target: u64, cache_level: u8, vmaddr: u64) -> FixupRecord {
    let raw = kc_ptr(target, cache_level, 0, false);
    FixupRecord {
        segment_index: 0,
        segment_name: "__DATA".to_string(),
        pointer_format: 8,
        page_index: 0,
        page_start: 0,
        chain_offset: 0,
        fileoff: 0,
        vmaddr,
        raw,
        decoded: Some(probe_core::fixups::decode_kernel_pointer(raw)),
        next_offset: 0,
        resolved_guess: None,
        resolved_base: None,
        owner_entry: None,
    }
}
