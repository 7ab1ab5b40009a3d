// Tracing log adapter - subscriber setup for the binary

use tracing_subscriber::EnvFilter;

use crate::adapters::toml_config::LoggingConfig;

/// Build the filter: `RUST_LOG` wins over the configured level
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber once; later calls are no-ops
pub fn init(config: &LoggingConfig) {
    let filter = env_filter(config);
    // Logs go to stderr so command output on stdout stays machine-readable
    let result = if config.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init()
    };

    if result.is_ok() {
        tracing::debug!("Logging initialized (json: {})", config.json);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_falls_back() {
        let config = LoggingConfig {
            level: "not a [valid directive".to_string(),
            json: false,
        };
        // Must not panic whatever RUST_LOG holds
        let _ = env_filter(&config);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let config = LoggingConfig::default();
        init(&config);
        init(&config);
    }
}
