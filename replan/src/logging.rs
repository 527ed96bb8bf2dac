//! Development-time tracing for the engine.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: diagnostics via `RUST_LOG`, written to stderr.
//!   Not persisted and not part of a run's product output.
//!
//! - **Agent events (`events`)**: structured product events injected into the
//!   engine through an `EventSink`; the CLI persists them as `events.jsonl` in
//!   the run directory regardless of `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the process-wide subscriber. Call once, from the binary only.
///
/// `RUST_LOG` wins when set. Otherwise the filter is `warn`, or `warn,replan=info`
/// with `verbose` (crate-level `info`) so agent events show up. Compact format on stderr.
///
/// # Example
/// ```bash
/// RUST_LOG=replan=debug replan run --goal "write a 3-step outline"
/// ```
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

fn default_directive(verbose: bool) -> &'static str {
    if verbose { "warn,replan=info" } else { "warn" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_raises_crate_level_only() {
        assert_eq!(default_directive(false), "warn");
        assert_eq!(default_directive(true), "warn,replan=info");
    }
}
