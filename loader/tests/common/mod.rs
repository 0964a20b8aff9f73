//! Synthetic ELF32 fixture builder for the integration tests.
//!
//! Builds just enough of the format for the loader to accept it: a 52-byte
//! header, a contiguous program header table, and segment bytes placed
//! immediately after it in file-offset order.

pub const PAGE_SIZE: u32 = 4096;

/// Base virtual address used across fixtures. Chosen low enough to be free
/// of the host's own mappings (text/heap/stack live much higher under
/// ASLR) so the lazy loader's `MAP_FIXED` pages land cleanly.
pub const BASE: u32 = 0x0804_8000;

pub struct SegSpec {
    pub vaddr: u32,
    pub memsz: u32,
    pub code: Vec<u8>,
}

pub fn build_elf(segments: &[SegSpec], entry: u32) -> Vec<u8> {
    const EHDR_SIZE: usize = 52;
    const PHDR_SIZE: usize = 32;

    let phoff: u32 = EHDR_SIZE as u32;
    let phnum = segments.len() as u16;
    let data_start = EHDR_SIZE + PHDR_SIZE * segments.len();

    let mut buf = vec![0u8; data_start];
    buf[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
    buf[4] = 1; // ELFCLASS32
    buf[5] = 1; // ELFDATA2LSB
    buf[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    buf[18..20].copy_from_slice(&3u16.to_le_bytes()); // EM_386
    buf[24..28].copy_from_slice(&entry.to_le_bytes());
    buf[28..32].copy_from_slice(&phoff.to_le_bytes());
    buf[42..44].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
    buf[44..46].copy_from_slice(&phnum.to_le_bytes());

    let mut foff = data_start as u32;
    for (i, seg) in segments.iter().enumerate() {
        let ph = EHDR_SIZE + i * PHDR_SIZE;
        let filesz = seg.code.len() as u32;
        buf[ph..ph + 4].copy_from_slice(&1u32.to_le_bytes()); // PT_LOAD
        buf[ph + 4..ph + 8].copy_from_slice(&foff.to_le_bytes());
        buf[ph + 8..ph + 12].copy_from_slice(&seg.vaddr.to_le_bytes());
        buf[ph + 16..ph + 20].copy_from_slice(&filesz.to_le_bytes());
        buf[ph + 20..ph + 24].copy_from_slice(&seg.memsz.to_le_bytes());
        buf[ph + 24..ph + 28].copy_from_slice(&7u32.to_le_bytes()); // PF_R|PF_W|PF_X

        buf.extend_from_slice(&seg.code);
        foff += filesz;
    }
    buf
}

/// `mov eax, <value>; ret`
pub fn code_return(value: i32) -> Vec<u8> {
    let mut c = vec![0xB8];
    c.extend_from_slice(&(value as u32).to_le_bytes());
    c.push(0xC3);
    c
}

/// For each address: `mov eax, <addr>; mov byte [eax], 0` (32-bit
/// zero-extended addressing via the `0x67` prefix, so it works unmodified
/// whether the host happens to execute it in 32- or 64-bit mode). Then
/// `mov eax, <value>; ret`.
pub fn code_touch_then_return(addrs: &[u32], value: i32) -> Vec<u8> {
    let mut c = Vec::new();
    for &addr in addrs {
        c.push(0xB8);
        c.extend_from_slice(&addr.to_le_bytes());
        c.extend_from_slice(&[0x67, 0xC6, 0x00, 0x00]);
    }
    c.push(0xB8);
    c.extend_from_slice(&(value as u32).to_le_bytes());
    c.push(0xC3);
    c
}
