//! Tracing initialisation.
//!
//! Log output goes to stdout through a `fmt` layer. Verbosity follows `RUST_LOG` and falls back
//! to `info` when it is unset or unparsable:
//!
//! ```bash
//! RUST_LOG=campus=debug,tower_http=debug campus -f config.yaml
//! ```

use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_telemetry() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()?;

    info!("Telemetry initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_an_error() {
        // test-log may already own the global subscriber; either way the second call must fail
        let _ = init_telemetry();
        assert!(init_telemetry().is_err());
    }
}
