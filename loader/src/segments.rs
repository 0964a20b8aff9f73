//! Program-header table resolution: reads `PT_LOAD` entries and derives the
//! segment table the rest of the loader works from.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use log::{debug, trace, warn};

use crate::error::{LoaderError, Result};

/// A retained `PT_LOAD` entry, reduced to the fields the loader needs.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub vaddr: u32,
    pub memsz: u32,
    pub filesz: u32,
    pub foff: u32,
}

impl Segment {
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.vaddr && addr < self.vaddr.saturating_add(self.memsz)
    }

    pub fn end(&self) -> u32 {
        self.vaddr.saturating_add(self.memsz)
    }
}

/// Read `header.phnum` program headers starting at `header.phoff`, keeping
/// only `PT_LOAD` entries, in on-file order.
///
/// Fails if any two retained segments overlap, or if the entry point given
/// in `header` is not covered by exactly one retained segment.
pub fn load_segments(file: &mut File, header: &elf32::Elf32Header) -> Result<Vec<Segment>> {
    let (start, _end) = elf32::program_header_table_range(header)?;

    file.seek(SeekFrom::Start(start as u64))
        .map_err(|e| LoaderError::Io("seek", "program header table".into(), e))?;

    let mut segments = Vec::new();
    let mut entry_buf = vec![0u8; header.phentsize as usize];

    for i in 0..header.phnum {
        file.read_exact(&mut entry_buf)
            .map_err(|e| LoaderError::Io("read", format!("program header {i}"), e))?;

        let phdr = elf32::parse_phdr(&entry_buf)?;
        if !phdr.is_load() {
            trace!("ignoring non-LOAD program header {i} (p_type={})", phdr.p_type);
            continue;
        }

        if phdr.p_filesz > phdr.p_memsz {
            warn!(
                "segment {i}: p_filesz ({:#x}) exceeds p_memsz ({:#x}), clamping",
                phdr.p_filesz, phdr.p_memsz
            );
        }

        let segment = Segment {
            vaddr: phdr.p_vaddr,
            memsz: phdr.p_memsz,
            filesz: phdr.p_filesz.min(phdr.p_memsz),
            foff: phdr.p_offset,
        };
        debug!(
            "retained LOAD segment: vaddr={:#010x} memsz={:#x} filesz={:#x} foff={:#x}",
            segment.vaddr, segment.memsz, segment.filesz, segment.foff
        );
        segments.push(segment);
    }

    check_no_overlap(&segments)?;

    if !segments.iter().any(|s| s.contains(header.entry)) {
        return Err(LoaderError::EntryNotCovered);
    }

    Ok(segments)
}

fn check_no_overlap(segments: &[Segment]) -> Result<()> {
    for (i, a) in segments.iter().enumerate() {
        for b in &segments[i + 1..] {
            if a.vaddr < b.end() && b.vaddr < a.end() {
                return Err(LoaderError::OverlappingSegments(
                    a.vaddr,
                    a.end(),
                    b.vaddr,
                    b.end(),
                ));
            }
        }
    }
    Ok(())
}
