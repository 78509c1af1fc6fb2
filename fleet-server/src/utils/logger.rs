//! Logging setup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// HTTP client internals stay quiet unless asked for explicitly.
const QUIET_CRATES: [&str; 3] = ["hyper_util", "reqwest", "h2"];

fn directives(level: &str) -> String {
    let mut out = level.trim().to_string();
    for name in QUIET_CRATES {
        if !out.contains(name) {
            out.push_str(&format!(",{name}=warn"));
        }
    }
    out
}

/// Install the global subscriber. `RUST_LOG` replaces the configured level entirely.
pub fn init(level: &str) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(directives(level))
            .map_err(|e| anyhow::anyhow!("invalid log level {level:?}: {e}"))?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_quiet_http_internals() {
        assert_eq!(directives("debug"), "debug,hyper_util=warn,reqwest=warn,h2=warn");
        assert_eq!(directives("info,reqwest=trace"), "info,reqwest=trace,hyper_util=warn,h2=warn");
        assert!(EnvFilter::try_new(directives("fleet_server=debug")).is_ok());
    }
}
