//! ELF header reading: opens the file and decodes the fixed-size header.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::debug;

use crate::error::{LoaderError, Result};

/// Open `path` and read+validate the 52-byte ELF32 header.
///
/// Returns the still-open file handle alongside the parsed header so
/// callers can continue reading the program header table and segment
/// contents without reopening the file.
pub fn open_and_parse(path: &Path) -> Result<(File, elf32::Elf32Header)> {
    let mut file = File::open(path)
        .map_err(|e| LoaderError::Io("open", path.display().to_string(), e))?;

    let mut buf = [0u8; elf32::SIZEOF_EHDR];
    file.read_exact(&mut buf)
        .map_err(|e| LoaderError::Io("read", "ELF header".into(), e))?;

    let header = elf32::parse_header(&buf)?;
    debug!(
        "ELF header: entry={:#010x} phoff={:#x} phentsize={} phnum={}",
        header.entry, header.phoff, header.phentsize, header.phnum
    );

    Ok((file, header))
}
