//! Builders for synthetic container files used by the CLI tests.

#![allow(dead_code)]

pub const MAGIC_64: u32 = 0xFEED_FACF;
pub const FILETYPE_FILESET: u32 = 0xC;
const CMD_SEGMENT_64: u32 = 0x19;
const CMD_FILESET_ENTRY: u32 = 0x35;
const CMD_CHAINED_FIXUPS: u32 = 0x8000_0034;

fn push_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn push_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn fixed_name(name: &str, width: usize) -> Vec<u8> {
    let mut out = name.as_bytes().to_vec();
    out.resize(width, 0);
    out
}

pub fn header(filetype: u32, ncmds: u32, sizeofcmds: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    push_u32(&mut buf, MAGIC_64);
    push_u32(&mut buf, 0x0100_000C);
    push_u32(&mut buf, 0);
    push_u32(&mut buf, filetype);
    push_u32(&mut buf, ncmds);
    push_u32(&mut buf, sizeofcmds);
    push_u32(&mut buf, 0);
    push_u32(&mut buf, 0);
    buf
}

pub fn segment_cmd(name: &str, vmaddr: u64, vmsize: u64, fileoff: u64, filesize: u64) -> Vec<u8> {
    let mut buf = Vec::new();
    push_u32(&mut buf, CMD_SEGMENT_64);
    push_u32(&mut buf, 72);
    buf.extend_from_slice(&fixed_name(name, 16));
    push_u64(&mut buf, vmaddr);
    push_u64(&mut buf, vmsize);
    push_u64(&mut buf, fileoff);
    push_u64(&mut buf, filesize);
    push_u32(&mut buf, 0);
    push_u32(&mut buf, 0);
    push_u32(&mut buf, 0);
    push_u32(&mut buf, 0);
    buf
}

pub fn fileset_entry_cmd(entry_id: &str, vmaddr: u64, fileoff: u64) -> Vec<u8> {
    let padded = (32 + entry_id.len() + 1 + 7) / 8 * 8;
    let mut buf = Vec::new();
    push_u32(&mut buf, CMD_FILESET_ENTRY);
    push_u32(&mut buf, padded as u32);
    push_u64(&mut buf, vmaddr);
    push_u64(&mut buf, fileoff);
    push_u32(&mut buf, 32);
    push_u32(&mut buf, 0);
    buf.extend_from_slice(entry_id.as_bytes());
    buf.resize(padded, 0);
    buf
}

pub fn chained_fixups_cmd(dataoff: u32, datasize: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    push_u32(&mut buf, CMD_CHAINED_FIXUPS);
    push_u32(&mut buf, 16);
    push_u32(&mut buf, dataoff);
    push_u32(&mut buf, datasize);
    buf
}

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

pub fn kc_ptr(target: u64, cache_level: u8, next_delta: u16, is_auth: bool) -> u64 {
    let mut raw = target & 0x3FFF_FFFF;
    raw |= (cache_level as u64 & 0x3) << 30;
    raw |= (next_delta as u64 & 0xFFF) << 32;
    if is_auth {
        raw |= 1 << 63;
    }
    raw
}

pub fn place_u64(file: &mut Vec<u8>, offset: usize, value: u64) {
    if file.len() < offset + 8 {
        file.resize(offset + 8, 0);
    }
    file[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// One-segment fixups metadata block: 28-byte header, starts table, one
/// info record.
pub fn fixups_block(
    page_size: u16,
    pointer_format: u16,
    segment_offset: u64,
    page_starts: &[u16],
) -> Vec<u8> {
    let mut block = Vec::new();
    push_u32(&mut block, 0); // version
    push_u32(&mut block, 28); // starts_offset
    push_u32(&mut block, 0);
    push_u32(&mut block, 0);
    push_u32(&mut block, 0);
    push_u32(&mut block, 0);
    push_u32(&mut block, 0);

    push_u32(&mut block, 1); // seg count
    push_u32(&mut block, 8); // info offset, relative to the starts table

    push_u32(&mut block, (22 + page_starts.len() * 2) as u32);
    push_u16(&mut block, page_size);
    push_u16(&mut block, pointer_format);
    push_u64(&mut block, segment_offset);
    push_u32(&mut block, 0); // max_valid_pointer
    push_u16(&mut block, page_starts.len() as u16);
    for start in page_starts {
        push_u16(&mut block, *start);
    }
    block
}

/// Full fileset container: one embedded entry (exec + data segments), a
/// chained-fixups block at 0x9000, and a two-record pointer chain at file
/// offset 0x5000.
pub fn build_container_with_fixups() -> Vec<u8> {
    let mut file = Vec::new();

    place_image(
        &mut file,
        0x1000,
        0x2,
        &[
            segment_cmd("__TEXT_EXEC", 0x8000_0000, 0x4000, 0x1000, 0x4000),
            segment_cmd("__DATA", 0x8000_4000, 0x4000, 0x5000, 0x4000),
        ],
    );

    let block = fixups_block(0x4000, 8, 0x5000, &[0]);
    place_image(
        &mut file,
        0,
        FILETYPE_FILESET,
        &[
            segment_cmd("__TEXT", 0x8000_0000, 0x1_0000, 0, 0x1_0000),
            fileset_entry_cmd("com.probe.kext", 0x8000_0000, 0x1000),
            chained_fixups_cmd(0x9000, block.len() as u32),
        ],
    );

    // Chain: first record links 8 bytes on, second terminates. The first
    // target resolves into the exec segment, the second into data.
    place_u64(&mut file, 0x5000, kc_ptr(0x100, 0, 2, false));
    place_u64(&mut file, 0x5008, kc_ptr(0x4800, 0, 0, false));

    if file.len() < 0x9000 {
        file.resize(0x9000, 0);
    }
    file.extend_from_slice(&block);
    file
}

/// Fileset with segments but no chained-fixups declaration.
pub fn build_container_without_fixups() -> Vec<u8> {
    let mut file = Vec::new();
    place_image(
        &mut file,
        0,
        FILETYPE_FILESET,
        &[segment_cmd("__TEXT", 0x8000_0000, 0x4000, 0, 0x4000)],
    );
    file
}
