//! Config validation CLI tool
//!
//! Validates a hallpassd configuration file and reports any errors.

use hallpass_util::default_config_path;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a hallpassd configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            eprintln!("  validate-config config.example.toml");
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!(
            "Error: Configuration file not found: {}",
            config_path.display()
        );
        return ExitCode::from(1);
    }

    match hallpass_config::load_config(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!(
                "  Config version: {}",
                hallpass_config::CURRENT_CONFIG_VERSION
            );
            println!("  Socket: {}", config.service.socket_path.display());
            println!(
                "  Sweep interval: {}s",
                config.service.sweep_interval.as_secs()
            );
            println!("  Destinations: {}", config.destinations.len());

            if !config.destinations.is_empty() {
                println!();
                println!("Destinations:");
                for dest in &config.destinations {
                    let state = if dest.active { "active" } else { "inactive" };
                    println!("  - {} [{}]: {}", dest.id.as_str(), state, dest.name);
                }
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                hallpass_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                hallpass_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                hallpass_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                hallpass_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        hallpass_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
