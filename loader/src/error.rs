//! Error taxonomy for the loader.
//!
//! Every fatal condition reachable from ordinary (non-signal) control flow
//! maps to exactly one variant here, so `main` can log a precise
//! diagnostic without string-matching. Faults the `SIGSEGV` resolver
//! itself deems fatal never flow through here — the handler must stay
//! async-signal-safe, so it reports and exits directly (see
//! `fault::fatal_exit_addr`).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("failed to {0} {1}: {2}")]
    Io(&'static str, String, std::io::Error),

    #[error("invalid ELF: {0}")]
    Elf(#[from] elf32::ElfError),

    #[error("no loadable segment contains the entry point")]
    EntryNotCovered,

    #[error("loadable segments {0:#x}..{1:#x} and {2:#x}..{3:#x} overlap")]
    OverlappingSegments(u32, u32, u32, u32),

    #[error("failed to map segment at {0:#x}: {1}")]
    MapFailed(u32, nix::Error),
}

pub type Result<T> = std::result::Result<T, LoaderError>;
