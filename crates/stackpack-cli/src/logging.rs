//! Log subscriber setup.

use tracing_subscriber::EnvFilter;

/// Filter directive from command line flags and the configured level.
///
/// `-v`/`-q` override the config file; `RUST_LOG` overrides both (see [`init`]).
pub fn directive(verbose: u8, quiet: bool, configured: &str) -> String {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) if configured.trim().is_empty() => "info",
        (false, 0) => configured.trim(),
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    level.to_string()
}

/// Install the global fmt subscriber. Logs go to stderr so stdout stays
/// machine readable.
pub fn init(verbose: u8, quiet: bool, configured: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(directive(verbose, quiet, configured))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
