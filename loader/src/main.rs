//! Userspace loader for statically-linked 32-bit ELF executables.
//!
//! Parses the ELF header and program-header table, establishes memory for
//! the loadable segments under an eager or lazy (demand-paged) policy,
//! transfers control to the program's entry point, and reports its return
//! value.

mod accounting;
mod driver;
mod error;
mod fault;
mod mapper;
mod reader;
mod segments;

use std::path::PathBuf;
use std::process::ExitCode;

use log::error;

use driver::Policy;

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let (path, policy) = match parse_args(&args) {
        Some(parsed) => parsed,
        None => {
            eprintln!("Usage: {} <ELF file>", program_name(&args));
            return ExitCode::from(1);
        }
    };

    match driver::run(&path, policy) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::from(1)
        }
    }
}

fn parse_args(args: &[String]) -> Option<(PathBuf, Policy)> {
    match args {
        [_, path] => Some((PathBuf::from(path), Policy::Eager)),
        [_, path, flag] if flag == "--lazy" => Some((PathBuf::from(path), Policy::Lazy)),
        _ => None,
    }
}

fn program_name(args: &[String]) -> &str {
    args.first().map(String::as_str).unwrap_or("loader")
}
