//! Logging initialization

pub use log::{debug, error, info, trace, warn};

/// Initialize the `env_logger` backend.
///
/// `level` is the default filter ("error", "warn", "info", "debug", "trace").
/// `RUST_LOG` still wins when it is set. Unknown levels fall back to info.
pub fn init(level: &str) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(parse_level(level));
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    // A second init (tests, embedding applications) is not an error for us.
    let _ = builder.try_init();
}

fn parse_level(level: &str) -> log::LevelFilter {
    level.parse().unwrap_or(log::LevelFilter::Info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_levels() {
        assert_eq!(parse_level("debug"), log::LevelFilter::Debug);
        assert_eq!(parse_level("WARN"), log::LevelFilter::Warn);
        assert_eq!(parse_level("off"), log::LevelFilter::Off);
    }

    #[test]
    fn test_unknown_level_defaults_to_info() {
        assert_eq!(parse_level("loud"), log::LevelFilter::Info);
    }
}
