//! Segment Mapper (eager variant): map the segment containing the entry
//! point in full and copy its file content before control transfer.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::num::NonZeroUsize;

use log::debug;
use nix::sys::mman::{mmap_anonymous, MapFlags, ProtFlags};

use crate::error::{LoaderError, Result};
use crate::segments::Segment;

/// Establish one RWX anonymous mapping sized `segment.memsz`, copy
/// `segment.filesz` bytes from the file into it, and return the local
/// address corresponding to `entry`.
///
/// The segment must contain `entry`; `entry_local` is computed as
/// `mapping_base + (entry - segment.vaddr)`.
pub fn map_entry_segment(file: &mut File, segment: &Segment, entry: u32) -> Result<*const ()> {
    let len = NonZeroUsize::new(segment.memsz as usize)
        .expect("segment containing the entry point has nonzero memsz");

    // SAFETY: anonymous, private mapping; no file descriptor aliasing.
    let mapping = unsafe {
        mmap_anonymous(
            None,
            len,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE | ProtFlags::PROT_EXEC,
            MapFlags::MAP_PRIVATE,
        )
    }
    .map_err(|e| LoaderError::MapFailed(segment.vaddr, e))?;

    let base = mapping.as_ptr() as *mut u8;
    debug!(
        "eager: mapped segment vaddr={:#010x} memsz={:#x} at local base {:p}",
        segment.vaddr, segment.memsz, base
    );

    file.seek(SeekFrom::Start(segment.foff as u64))
        .map_err(|e| LoaderError::Io("seek", "segment contents".into(), e))?;

    // SAFETY: `base` is valid for `memsz` bytes, just established above.
    let dest = unsafe { std::slice::from_raw_parts_mut(base, segment.filesz as usize) };
    file.read_exact(dest)
        .map_err(|e| LoaderError::Io("read", "segment contents".into(), e))?;

    let offset = entry - segment.vaddr;
    // SAFETY: offset < memsz because `segment.contains(entry)` was checked by the caller.
    let entry_local = unsafe { base.add(offset as usize) } as *const ();
    Ok(entry_local)
}
