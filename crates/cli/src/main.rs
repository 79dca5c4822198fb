use std::process::ExitCode;

use anyhow::anyhow;
use fieldops_core::config::{AppConfig, LoadOptions};

/// Logs go to stderr so stdout stays a single JSON document.
fn init_logging(config: &AppConfig) -> anyhow::Result<()> {
    use fieldops_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    match config.logging.format {
        Compact => builder.compact().try_init(),
        Pretty => builder.pretty().try_init(),
        Json => builder.json().try_init(),
    }
    .map_err(|error| anyhow!(error))
}

fn main() -> ExitCode {
    // A config that does not load is reported by the command itself.
    if let Ok(config) = AppConfig::load(LoadOptions::default()) {
        if let Err(error) = init_logging(&config) {
            eprintln!("logging disabled: {error:#}");
        }
    }

    fieldops_cli::run()
}
