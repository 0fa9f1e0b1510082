//! Shared environment configuration for the binaries.
//!
//! Consolidates `SEQASSIGN_BASE_PATH`, `RAYON_NUM_THREADS` and `RUST_LOG`
//! handling.

use std::path::PathBuf;

use tracing_subscriber::{fmt, EnvFilter};

/// Install the tracing subscriber. `RUST_LOG` overrides the default `info`
/// filter. Safe to call more than once.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Read `SEQASSIGN_BASE_PATH` (default `"."`) and chdir into it. Exits on
/// failure.
pub fn init_base_path() -> PathBuf {
    let base_path = std::env::var("SEQASSIGN_BASE_PATH").unwrap_or_else(|_| ".".to_string());
    tracing::info!(base_path = %base_path, "base path");
    let path = PathBuf::from(&base_path);
    if std::env::set_current_dir(&base_path).is_err() {
        eprintln!("Failed to change directory to {}", base_path);
        std::process::exit(1);
    }
    path
}

/// Thread count from `RAYON_NUM_THREADS` (fallback `OMP_NUM_THREADS`,
/// default 8).
pub fn rayon_threads() -> usize {
    std::env::var("RAYON_NUM_THREADS")
        .or_else(|_| std::env::var("OMP_NUM_THREADS"))
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|&n| n > 0)
        .unwrap_or(8)
}

/// Build the rayon global pool with [`rayon_threads`] threads, tolerating an
/// already-initialized pool. Returns the thread count.
pub fn init_rayon_threads() -> usize {
    let num_threads = rayon_threads();
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
        .ok(); // May fail if already initialized
    tracing::info!(threads = num_threads, "rayon pool");
    num_threads
}
