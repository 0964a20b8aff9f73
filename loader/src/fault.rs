//! Fault Resolver (lazy variant): a `SIGSEGV` handler that materializes
//! exactly one page per fault.
//!
//! Everything reachable from [`handle_segv`] must be async-signal-safe: no
//! heap allocation, no buffered I/O, no locking. The mapping-table storage
//! is sized and allocated by [`install`] *before* the handler is armed, and
//! the handler only ever indexes into it through `Cell`s.

use std::cell::Cell;
use std::ffi::c_void;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use nix::sys::mman::{mmap_anonymous, MapFlags, ProtFlags};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::accounting::Counters;
use crate::segments::Segment;

struct LazySession {
    segments: Vec<Segment>,
    file_fd: RawFd,
    page_size: usize,
    counters: Counters,
    /// Page bases already materialized. Pre-sized to the worst case
    /// (every page of every segment) so the handler never reallocates.
    mapped_pages: Vec<Cell<u32>>,
    mapped_count: AtomicUsize,
}

/// `u32::MAX` can never collide with a real page base (bit 0 of a
/// page-aligned address is always 0, and `u32::MAX` isn't page-aligned),
/// so it doubles as the "slot unused" sentinel without an `Option` wrapper
/// the handler would need to allocate to update.
const EMPTY_SLOT: u32 = u32::MAX;

impl LazySession {
    fn find_segment(&self, addr: u32) -> Option<&Segment> {
        self.segments.iter().find(|s| s.contains(addr))
    }

    fn is_mapped(&self, page_base: u32) -> bool {
        let count = self.mapped_count.load(Ordering::Relaxed);
        self.mapped_pages[..count]
            .iter()
            .any(|slot| slot.get() == page_base)
    }

    fn record_mapped(&self, page_base: u32) -> bool {
        let count = self.mapped_count.load(Ordering::Relaxed);
        if count >= self.mapped_pages.len() {
            return false;
        }
        self.mapped_pages[count].set(page_base);
        self.mapped_count.store(count + 1, Ordering::Relaxed);
        true
    }
}

static SESSION: AtomicPtr<LazySession> = AtomicPtr::new(std::ptr::null_mut());

/// Install the `SIGSEGV` handler and pre-allocate the mapping table.
///
/// Must be called once, before the guest entry point is invoked. Returns a
/// reference to the counters the handler updates.
pub fn install(segments: Vec<Segment>, file_fd: RawFd, page_size: usize) -> nix::Result<&'static Counters> {
    let capacity: usize = segments
        .iter()
        .map(|s| (s.memsz as usize).div_ceil(page_size))
        .sum::<usize>()
        .max(1);

    let session = Box::new(LazySession {
        segments,
        file_fd,
        page_size,
        counters: Counters::new(),
        mapped_pages: (0..capacity).map(|_| Cell::new(EMPTY_SLOT)).collect(),
        mapped_count: AtomicUsize::new(0),
    });
    let ptr = Box::into_raw(session);
    SESSION.store(ptr, Ordering::SeqCst);

    let action = SigAction::new(
        SigHandler::SigAction(handle_segv),
        SaFlags::SA_SIGINFO,
        SigSet::empty(),
    );
    // SAFETY: `handle_segv` only touches the session pre-allocated above and
    // performs no allocation; installing it is the last step before control
    // transfers to the guest.
    unsafe { sigaction(Signal::SIGSEGV, &action) }?;

    // SAFETY: `ptr` was just produced by `Box::into_raw` and is non-null.
    Ok(unsafe { &(*ptr).counters })
}

/// Unmap every page the resolver established and free the session.
///
/// # Safety
/// Must be called after the guest has returned and no further faults can
/// occur (i.e. after restoring the default `SIGSEGV` disposition, or at
/// process exit).
pub unsafe fn teardown() {
    let ptr = SESSION.swap(std::ptr::null_mut(), Ordering::SeqCst);
    if ptr.is_null() {
        return;
    }
    let session = unsafe { Box::from_raw(ptr) };
    let count = session.mapped_count.load(Ordering::Relaxed);
    for slot in &session.mapped_pages[..count] {
        let base = slot.get() as usize as *mut c_void;
        let Some(base) = std::ptr::NonNull::new(base) else {
            continue;
        };
        // SAFETY: every recorded slot was mapped by `handle_segv` with
        // exactly `page_size` bytes and is still live.
        let _ = unsafe { nix::sys::mman::munmap(base, session.page_size) };
    }
}

extern "C" fn handle_segv(_signum: i32, info: *mut libc::siginfo_t, _ctx: *mut c_void) {
    let ptr = SESSION.load(Ordering::SeqCst);
    if ptr.is_null() {
        fatal_exit(b"segmentation fault: resolver not installed\n");
    }
    // SAFETY: non-null per the check above, and the session outlives every
    // fault delivered while the handler is armed.
    let session = unsafe { &*ptr };
    // SAFETY: `info` is valid for the duration of signal delivery.
    let fault_addr = unsafe { (*info).si_addr() } as usize;

    resolve_fault(session, fault_addr);
}

fn resolve_fault(session: &LazySession, fault_addr: usize) {
    let Some(segment) = session.find_segment(fault_addr as u32) else {
        fatal_exit_addr(b"segmentation fault: address is not in any loadable segment: ", fault_addr);
    };

    let page_size = session.page_size;
    let page_base = (fault_addr as u32) & !((page_size as u32) - 1);

    if session.is_mapped(page_base) {
        fatal_exit_addr(
            b"segmentation fault: page already mapped (permission violation): ",
            fault_addr,
        );
    }

    // SAFETY: fixed, anonymous, private mapping of exactly one page; the
    // address was derived from a real fault so it is unused virtual space.
    let map_result = unsafe {
        mmap_anonymous(
            std::num::NonZeroUsize::new(page_base as usize),
            std::num::NonZeroUsize::new(page_size).unwrap(),
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE | ProtFlags::PROT_EXEC,
            MapFlags::MAP_PRIVATE | MapFlags::MAP_FIXED,
        )
    };
    if map_result.is_err() {
        fatal_exit_addr(b"segmentation fault: failed to map page at ", fault_addr);
    }

    let offset_in_segment = page_base - segment.vaddr;
    let file_bytes_available = (segment.filesz as i64 - offset_in_segment as i64).max(0) as usize;
    let to_read = file_bytes_available.min(page_size);

    if to_read > 0 {
        let file_offset = segment.foff as i64 + offset_in_segment as i64;
        // SAFETY: `pread` does not allocate; it reads directly into the
        // freshly-mapped page.
        let n = unsafe {
            libc::pread(
                session.file_fd,
                page_base as usize as *mut c_void,
                to_read,
                file_offset as libc::off_t,
            )
        };
        if n < 0 || n as usize != to_read {
            fatal_exit_addr(b"segmentation fault: failed to read segment data for page at ", fault_addr);
        }
    }

    if !session.record_mapped(page_base) {
        fatal_exit_addr(b"segmentation fault: mapping table exhausted at ", fault_addr);
    }

    session.counters.record_fault();
    session.counters.record_allocation();

    let page_end = page_base as u64 + page_size as u64;
    if page_end >= segment.end() as u64 {
        let remainder = segment.memsz as u64 % page_size as u64;
        if remainder != 0 {
            session.counters.add_fragmentation(page_size as u64 - remainder);
        }
    }
}

/// Write a fixed ASCII message plus a hex-formatted address to stderr using
/// only the raw `write(2)` syscall, then terminate. No heap allocation, no
/// locking, no unwinding — safe to call from the signal handler.
fn fatal_exit_addr(prefix: &[u8], addr: usize) -> ! {
    let mut buf = [0u8; 10]; // "0x" + 8 hex digits
    buf[0] = b'0';
    buf[1] = b'x';
    for i in 0..8 {
        let nibble = (addr >> (28 - i * 4)) & 0xf;
        buf[2 + i] = match nibble {
            0..=9 => b'0' + nibble as u8,
            _ => b'a' + (nibble as u8 - 10),
        };
    }
    write_stderr(prefix);
    write_stderr(&buf);
    write_stderr(b"\n");
    unsafe { libc::_exit(1) }
}

fn fatal_exit(message: &[u8]) -> ! {
    write_stderr(message);
    unsafe { libc::_exit(1) }
}

fn write_stderr(bytes: &[u8]) {
    unsafe {
        libc::write(libc::STDERR_FILENO, bytes.as_ptr() as *const c_void, bytes.len());
    }
}
