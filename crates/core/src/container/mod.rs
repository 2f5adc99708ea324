//! Parser for a multi-image executable container.
//!
//! The container is a single 64-bit image whose load commands describe its
//! own segments plus a table of embedded image entries, each with its own
//! header and segment layout at a file offset inside the container. Only
//! the load-command regions are read; the container itself may be hundreds
//! of megabytes, so the parser works against any `Read + Seek` source
//! instead of an in-memory copy.
//!
//! A bad header magic is the one fatal condition here — no partial parse
//! is meaningful without a valid header. Truncated command tables clamp.

use std::io::{Read, Seek, SeekFrom};

use serde::{Deserialize, Serialize};

use crate::error::{FormatError, ProbeResult};
use crate::scan;

pub const MAGIC_64: u32 = 0xFEED_FACF;
pub const FILETYPE_FILESET: u32 = 0xC;

const CMD_SEGMENT_64: u32 = 0x19;
const CMD_SYMTAB: u32 = 0x2;
const CMD_DYSYMTAB: u32 = 0xB;
const CMD_FILESET_ENTRY: u32 = 0x35;
const CMD_FILESET_ENTRY_REQ: u32 = 0x8000_0035;
const CMD_CHAINED_FIXUPS: u32 = 0x8000_0034;
const LINKEDIT_DATA_CMDS: [u32; 5] = [0x1D, 0x1E, 0x2F, 0x31, 0x34];

const HEADER_LEN: usize = 32;
const SEGMENT_NAME_LEN: usize = 16;
const SECTION_RECORD_LEN: usize = 80;
const NLIST_LEN: u64 = 16;

/// Fixed container header fields relevant to parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHeader {
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
}

impl ContainerHeader {
    pub fn is_fileset(&self) -> bool {
        self.filetype == FILETYPE_FILESET
    }
}

/// One mapped region of the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub name: String,
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
}

/// Segment span inside one image entry, with the executable-name
/// heuristic used by resolution classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDetail {
    pub name: String,
    pub vmaddr: u64,
    pub vmsize: u64,
    pub vmaddr_end: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub is_exec_heuristic: bool,
}

/// Half-open `[start, end)` span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: u64,
    pub end: u64,
    pub size: u64,
}

impl Span {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end, size: end.saturating_sub(start) }
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// One embedded image of the container. Built once per parse; immutable
/// afterward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub entry_id: String,
    pub fileoff: u64,
    pub vmaddr: u64,
    pub segment_details: Vec<SegmentDetail>,
    pub file_span: Span,
    pub vmaddr_span: Span,
}

impl ImageEntry {
    /// Executable-segment check for a resolved address inside this entry.
    /// `None` when the address falls between segment spans.
    pub fn is_exec_at(&self, vmaddr: u64) -> Option<bool> {
        self.segment_details
            .iter()
            .find(|seg| vmaddr >= seg.vmaddr && vmaddr < seg.vmaddr_end)
            .map(|seg| seg.is_exec_heuristic)
    }
}

/// File location of a metadata block declared by a load command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSpan {
    pub fileoff: u64,
    pub size: u64,
}

/// Parsed container: top-level segments, image entries sorted by
/// `vmaddr_span.start`, and the chained-fixups block location if declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerIndex {
    pub header: ContainerHeader,
    pub segments: Vec<Segment>,
    pub entries: Vec<ImageEntry>,
    pub fixups_block: Option<BlockSpan>,
}

impl ContainerIndex {
    /// Point lookup in the entry range index: the unique entry whose
    /// vmaddr span contains `addr`. Spans are sorted and non-overlapping.
    pub fn find_entry(&self, addr: u64) -> Option<&ImageEntry> {
        let idx = self.entries.partition_point(|e| e.vmaddr_span.start <= addr);
        if idx == 0 {
            return None;
        }
        let entry = &self.entries[idx - 1];
        entry.vmaddr_span.contains(addr).then_some(entry)
    }

    /// The fixups block, or the typed fatal error when the container
    /// declares none.
    pub fn require_fixups_block(&self) -> ProbeResult<BlockSpan> {
        self.fixups_block.ok_or(FormatError::MissingFixups)
    }
}

fn read_header_at<R: Read + Seek>(reader: &mut R, offset: u64) -> ProbeResult<ContainerHeader> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut raw = [0u8; HEADER_LEN];
    reader.read_exact(&mut raw)?;
    let magic = scan::read_u32_le(&raw, 0).unwrap_or(0);
    if magic != MAGIC_64 {
        return Err(FormatError::BadMagic { offset, magic });
    }
    Ok(ContainerHeader {
        filetype: scan::read_u32_le(&raw, 12).unwrap_or(0),
        ncmds: scan::read_u32_le(&raw, 16).unwrap_or(0),
        sizeofcmds: scan::read_u32_le(&raw, 20).unwrap_or(0),
    })
}

/// Read header + load-command table at `offset`. A short tail clamps; the
/// command iterator stops at the end of whatever was read.
fn read_command_region<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
) -> ProbeResult<(ContainerHeader, Vec<u8>)> {
    let header = read_header_at(reader, offset)?;
    reader.seek(SeekFrom::Start(offset))?;
    let want = HEADER_LEN as u64 + header.sizeofcmds as u64;
    let mut cmds = Vec::with_capacity(want.min(1 << 24) as usize);
    reader.by_ref().take(want).read_to_end(&mut cmds)?;
    Ok((header, cmds))
}

/// Iterate `(cmd, cmdsize, offset)` over a load-command table, clamping at
/// the end of the buffer and refusing to loop on degenerate sizes.
fn load_commands(cmds: &[u8], ncmds: u32) -> Vec<(u32, usize, usize)> {
    let mut out = Vec::new();
    let mut off = HEADER_LEN;
    for _ in 0..ncmds {
        let Some(cmd) = scan::read_u32_le(cmds, off) else { break };
        let Some(cmdsize) = scan::read_u32_le(cmds, off + 4) else { break };
        let cmdsize = cmdsize as usize;
        if cmdsize < 8 {
            break;
        }
        out.push((cmd, cmdsize, off));
        off = match off.checked_add(cmdsize) {
            Some(next) => next,
            None => break,
        };
    }
    out
}

fn parse_segments(cmds: &[u8], ncmds: u32) -> Vec<Segment> {
    let mut segments = Vec::new();
    for (cmd, _, off) in load_commands(cmds, ncmds) {
        if cmd != CMD_SEGMENT_64 {
            continue;
        }
        let name = scan::read_fixed_name(cmds, off + 8, SEGMENT_NAME_LEN);
        let vmaddr = scan::read_u64_le(cmds, off + 24).unwrap_or(0);
        let vmsize = scan::read_u64_le(cmds, off + 32).unwrap_or(0);
        let fileoff = scan::read_u64_le(cmds, off + 40).unwrap_or(0);
        let filesize = scan::read_u64_le(cmds, off + 48).unwrap_or(0);
        segments.push(Segment { name, vmaddr, vmsize, fileoff, filesize });
    }
    segments
}

struct RawFilesetEntry {
    entry_id: String,
    vmaddr: u64,
    fileoff: u64,
}

fn parse_fileset_entries(cmds: &[u8], ncmds: u32) -> Vec<RawFilesetEntry> {
    let mut entries = Vec::new();
    for (cmd, cmdsize, off) in load_commands(cmds, ncmds) {
        if cmd != CMD_FILESET_ENTRY && cmd != CMD_FILESET_ENTRY_REQ {
            continue;
        }
        let vmaddr = scan::read_u64_le(cmds, off + 8).unwrap_or(0);
        let fileoff = scan::read_u64_le(cmds, off + 16).unwrap_or(0);
        let name_off = scan::read_u32_le(cmds, off + 24).unwrap_or(0) as usize;
        let name_width = cmdsize.saturating_sub(name_off);
        let entry_id = scan::read_fixed_name(cmds, off + name_off, name_width);
        entries.push(RawFilesetEntry { entry_id, vmaddr, fileoff });
    }
    entries
}

fn find_fixups_block(cmds: &[u8], ncmds: u32) -> Option<BlockSpan> {
    for (cmd, _, off) in load_commands(cmds, ncmds) {
        if cmd == CMD_CHAINED_FIXUPS {
            let fileoff = scan::read_u32_le(cmds, off + 8)? as u64;
            let size = scan::read_u32_le(cmds, off + 12)? as u64;
            return Some(BlockSpan { fileoff, size });
        }
    }
    None
}

/// Min/max file offset and vmaddr spanned by one entry's own segments,
/// sections, symbol tables, and linkedit regions. Used to detect truncated
/// or overlapping entries.
fn entry_bounds(cmds: &[u8], ncmds: u32) -> (Span, Span, Vec<SegmentDetail>) {
    let mut file_base: Option<u64> = None;
    let mut file_end: u64 = 0;
    let mut vm_base: Option<u64> = None;
    let mut vm_end: u64 = 0;
    let mut details = Vec::new();

    for (cmd, cmdsize, off) in load_commands(cmds, ncmds) {
        if cmd == CMD_SEGMENT_64 {
            let name = scan::read_fixed_name(cmds, off + 8, SEGMENT_NAME_LEN);
            let vmaddr = scan::read_u64_le(cmds, off + 24).unwrap_or(0);
            let vmsize = scan::read_u64_le(cmds, off + 32).unwrap_or(0);
            let fileoff = scan::read_u64_le(cmds, off + 40).unwrap_or(0);
            let filesize = scan::read_u64_le(cmds, off + 48).unwrap_or(0);
            // A declared section count beyond what the command itself can
            // hold is corrupt; iterate only over records that fit.
            let nsects = (scan::read_u32_le(cmds, off + 64).unwrap_or(0) as usize)
                .min(cmdsize.saturating_sub(72) / SECTION_RECORD_LEN);

            if fileoff != 0 {
                file_base = Some(file_base.map_or(fileoff, |b| b.min(fileoff)));
            }
            file_end = file_end.max(fileoff.saturating_add(filesize));
            vm_base = Some(vm_base.map_or(vmaddr, |b| b.min(vmaddr)));
            vm_end = vm_end.max(vmaddr.saturating_add(vmsize));

            let is_exec_heuristic = name == "__TEXT" || name == "__TEXT_EXEC";
            details.push(SegmentDetail {
                name,
                vmaddr,
                vmsize,
                vmaddr_end: vmaddr.saturating_add(vmsize),
                fileoff,
                filesize,
                is_exec_heuristic,
            });

            let mut sect_off = off + 72;
            for _ in 0..nsects {
                let size = scan::read_u64_le(cmds, sect_off + 40).unwrap_or(0);
                let offset = scan::read_u32_le(cmds, sect_off + 48).unwrap_or(0) as u64;
                file_end = file_end.max(offset.saturating_add(size));
                sect_off += SECTION_RECORD_LEN;
            }
        } else if cmd == CMD_SYMTAB {
            let symoff = scan::read_u32_le(cmds, off + 8).unwrap_or(0) as u64;
            let nsyms = scan::read_u32_le(cmds, off + 12).unwrap_or(0) as u64;
            let stroff = scan::read_u32_le(cmds, off + 16).unwrap_or(0) as u64;
            let strsize = scan::read_u32_le(cmds, off + 20).unwrap_or(0) as u64;
            if symoff != 0 {
                file_end = file_end.max(symoff.saturating_add(nsyms.saturating_mul(NLIST_LEN)));
            }
            if stroff != 0 {
                file_end = file_end.max(stroff.saturating_add(strsize));
            }
        } else if cmd == CMD_DYSYMTAB {
            let field = |i: usize| scan::read_u32_le(cmds, off + 8 + i * 4).unwrap_or(0) as u64;
            // (offset field, per-record size) pairs for each indirect table.
            let tables =
                [(6, 0x10u64), (8, 0x38), (10, 4), (12, 4), (14, 8), (16, 8)];
            for (idx, rec_size) in tables {
                let table_off = field(idx);
                let count = field(idx + 1);
                if table_off != 0 {
                    file_end = file_end.max(table_off.saturating_add(count.saturating_mul(rec_size)));
                }
            }
        } else if LINKEDIT_DATA_CMDS.contains(&cmd) {
            let dataoff = scan::read_u32_le(cmds, off + 8).unwrap_or(0) as u64;
            let datasize = scan::read_u32_le(cmds, off + 12).unwrap_or(0) as u64;
            file_end = file_end.max(dataoff.saturating_add(datasize));
        }
    }

    let file_span = Span::new(file_base.unwrap_or(0), file_end);
    let vm_span = Span::new(vm_base.unwrap_or(0), vm_end);
    (file_span, vm_span, details)
}

/// Parse the whole container: top-level header, segments, fixups block
/// location, and every image entry (each entry's embedded header is parsed
/// recursively at its file offset to compute its own bounds).
pub fn parse<R: Read + Seek>(reader: &mut R) -> ProbeResult<ContainerIndex> {
    let (header, cmds) = read_command_region(reader, 0)?;

    let segments = parse_segments(&cmds, header.ncmds);
    let fixups_block = find_fixups_block(&cmds, header.ncmds);
    let raw_entries = parse_fileset_entries(&cmds, header.ncmds);

    let mut entries = Vec::with_capacity(raw_entries.len());
    for raw in raw_entries {
        let (entry_header, entry_cmds) = read_command_region(reader, raw.fileoff)?;
        let (file_span, vmaddr_span, segment_details) =
            entry_bounds(&entry_cmds, entry_header.ncmds);
        entries.push(ImageEntry {
            entry_id: raw.entry_id,
            fileoff: raw.fileoff,
            vmaddr: raw.vmaddr,
            segment_details,
            file_span,
            vmaddr_span,
        });
    }
    entries.sort_by_key(|e| e.vmaddr_span.start);

    Ok(ContainerIndex { header, segments, entries, fixups_block })
}

/// Read a declared metadata block out of the container file.
pub fn read_block<R: Read + Seek>(reader: &mut R, block: BlockSpan) -> ProbeResult<Vec<u8>> {
    reader.seek(SeekFrom::Start(block.fileoff))?;
    let mut data = Vec::with_capacity(block.size.min(1 << 28) as usize);
    reader.by_ref().take(block.size).read_to_end(&mut data)?;
    Ok(data)
}
