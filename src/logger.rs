//! Sets up diagnostic logging for the binaries.
//!
//! Diagnostics go to stderr so that they never mix with the per-host reports on stdout. They are
//! quiet by default; `--debug` or `RUST_LOG` turns them up.

use tracing_subscriber::EnvFilter;

/// Chooses which events to keep.
///
/// `RUST_LOG` wins when it is set. Otherwise only warnings are kept, or everything down to debug
/// if `debug` is set.
pub fn env_filter(debug: bool) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if debug {
        EnvFilter::new("volley=debug,volley_rsync=debug")
    } else {
        EnvFilter::new("volley=warn,volley_rsync=warn")
    }
}

/// Installs the global subscriber. Call once, early in `main`.
pub fn init(debug: bool) {
    let result = tracing_subscriber::fmt()
        .with_env_filter(env_filter(debug))
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
    if let Err(err) = result {
        eprintln!("logging is already initialized: {err}");
    }
}
