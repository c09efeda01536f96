//! Process-wide log subscriber.
//!
//! Library code only emits `tracing` events; threads spawned by the recorder
//! run under the dispatcher captured when their owner was built. Binaries
//! call [`init`] once at startup.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "TALLY_LOG";

/// Install a formatting subscriber filtered by `TALLY_LOG`, or by
/// `default_directive` when the variable is unset or invalid.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_refused() {
        init("tally=debug");
        assert!(!init("tally=debug"));
    }
}
