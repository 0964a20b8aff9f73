//! Composes the ELF Reader, Program-Header Table, Segment Mapper, and
//! (for the lazy policy) Fault Resolver into a single load-and-run session.

use std::os::fd::AsRawFd;
use std::path::Path;

use log::info;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::{sysconf, SysconfVar};

use crate::error::{LoaderError, Result};
use crate::{fault, mapper, reader, segments};

/// Which memory-establishment policy to run the guest under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Eager,
    Lazy,
}

/// Load `path` and transfer control to its entry point under `policy`.
///
/// Prints the guest's return value (and, under [`Policy::Lazy`], the fault
/// accounting) to stdout on success, matching the external interface.
pub fn run(path: &Path, policy: Policy) -> Result<()> {
    let (mut file, header) = reader::open_and_parse(path)?;
    let segment_table = segments::load_segments(&mut file, &header)?;

    let (entry_ptr, counters) = match policy {
        Policy::Eager => {
            let segment = segment_table
                .iter()
                .find(|s| s.contains(header.entry))
                .expect("load_segments guarantees the entry point is covered");
            let entry_local = mapper::map_entry_segment(&mut file, segment, header.entry)?;
            (entry_local, None)
        }
        Policy::Lazy => {
            let page_size = sysconf(SysconfVar::PAGE_SIZE)
                .ok()
                .flatten()
                .unwrap_or(4096) as usize;
            info!("lazy loader: page size = {page_size}");
            let counters = fault::install(segment_table, file.as_raw_fd(), page_size)
                .map_err(|e| LoaderError::MapFailed(header.entry, e))?;
            (header.entry as usize as *const (), Some(counters))
        }
    };

    info!("transferring control to entry point at {:p}", entry_ptr);

    // SAFETY: `entry_ptr` was derived from the ELF's declared entry point,
    // resolved into this process's address space by the mapper/resolver
    // above. Calling into it is a deliberate trust boundary: the loader has
    // no way to verify the guest code behaves as a well-formed, argument-
    // free function returning `i32`.
    let entry: extern "C" fn() -> i32 = unsafe { std::mem::transmute(entry_ptr) };
    let result = entry();

    println!("User _start return value = {result}");
    if let Some(counters) = counters {
        println!("Total page faults = {}", counters.faults());
        println!("Total page allocations = {}", counters.allocations());
        println!("Internal fragmentation in KB = {:.2}", counters.frag_kb());
    }

    if policy == Policy::Lazy {
        restore_default_segv_handler();
        // SAFETY: the guest has returned and the default disposition is
        // restored, so no further faults will reach the resolver.
        unsafe { fault::teardown() };
    }

    Ok(())
}

fn restore_default_segv_handler() {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    // SAFETY: restoring the default disposition is always sound.
    let _ = unsafe { sigaction(Signal::SIGSEGV, &action) };
}
