//! Code index daemon with a resident, rebuild-aware query cache.
//!
//! Binary crate entry point. All CLI logic is in the `cli` module.

// mimalloc returns freed pages to the OS promptly, which matters when large
// index generations are loaded and released over a long-running daemon.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod cli;
mod daemon;

fn main() {
    cli::run();
}
