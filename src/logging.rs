//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins when set; otherwise `--verbose` selects debug output for
//! this crate and the default keeps the terminal to warnings so the progress
//! bar stays readable.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub fn default_filter(verbose: bool) -> &'static str {
    if verbose { "locflow=debug,info" } else { "warn" }
}

pub fn init(verbose: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .compact(),
        )
        .try_init();
}
