//! Textured quad demo for the Vulkan harness
//!
//! Usage: `quad_app [config.toml|config.ron]` (defaults to `harness.toml`;
//! built-in defaults are used when the file does not exist).

use vk_harness::{logging, Config, Engine, HarnessConfig, HarnessError};

const DEFAULT_CONFIG_PATH: &str = "harness.toml";

fn main() {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    if let Err(e) = run(&config_path) {
        log::error!("Fatal: {}", e);
        std::process::exit(1);
    }
}

fn run(config_path: &str) -> Result<(), HarnessError> {
    // A config that fails to load still gets an info-level logger so the
    // error is reported. RUST_LOG overrides the level either way.
    let config = match HarnessConfig::load_or_default(config_path) {
        Ok(config) => {
            logging::init(&config.log_level);
            config
        }
        Err(e) => {
            logging::init("info");
            return Err(e.into());
        }
    };

    log::info!("Loaded configuration from {}", config_path);
    Engine::run(&config)?;
    log::info!("Shutdown complete");
    Ok(())
}
