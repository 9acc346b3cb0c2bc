//! Core of the sftpcp tools: the recursive tree copy engine and everything it decides with.
//!
//! - [`path`]: `/`-separated path joining and cleaning shared by both sides of a copy
//! - [`fs`]: the [`fs::FileSystem`] capability and the local host implementation
//! - [`ignore`]: exact-match exclusion of source paths
//! - [`permission`]: permission rules applied to copied files
//! - [`copy`]: the depth-first copy, generic over source and destination file systems
//!
//! [`run`] sets up logging and a single-threaded runtime for a tool's `main`.

use std::future::Future;

pub mod config;
pub mod copy;
pub mod fs;
pub mod ignore;
pub mod path;
pub mod permission;

#[cfg(test)]
pub mod testutils;

pub use config::{OutputConfig, RuntimeConfig};
pub use copy::copy;
pub use fs::{FileSystem, LocalFs};
pub use ignore::IgnoreList;
pub use permission::PermissionRule;

fn init_tracing(output: &OutputConfig) {
    // RUST_LOG takes precedence over -v flags
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(output.log_level()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Runs `func` to completion on a current-thread runtime.
///
/// Returns the operation summary on success. On failure the error is reported (unless quiet) and
/// `None` is returned so the caller can pick an exit code.
pub fn run<Fut, Summary>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Summary: std::fmt::Display,
    Fut: Future<Output = anyhow::Result<Summary>>,
{
    init_tracing(&output);
    let mut builder = tokio::runtime::Builder::new_current_thread();
    builder.enable_all();
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let runtime = match builder.build() {
        Ok(runtime) => runtime,
        Err(error) => {
            if !output.quiet {
                eprintln!("failed to start the runtime: {error:#}");
            }
            return None;
        }
    };
    let start = std::time::Instant::now();
    let res = runtime.block_on(func());
    match res {
        Ok(summary) => {
            if output.print_summary || output.verbose > 0 {
                println!("{summary}");
                println!("walltime: {:.2?}", start.elapsed());
            }
            Some(summary)
        }
        Err(error) => {
            if !output.quiet {
                eprintln!("{error:#}");
            }
            None
        }
    }
}
