//! Command-line entry point for labframe
//!
//! ```bash
//! labframe inspect run_042.lfarc
//! labframe inspect run_042.lfarc --json
//! labframe devices --config lab.toml
//! labframe identify esa --config lab.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use labframe::config::LabConfig;
use labframe::data;
use labframe::logging;
use labframe::DeviceRegistry;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "labframe")]
#[command(about = "Lab instrument control and data archives", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = "lab.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the contents of a data archive without loading the samples
    Inspect {
        /// Archive written by `NumericalData::save`
        archive: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// List configured devices and their drivers
    Devices,

    /// Connect to a device and print its *IDN? response
    Identify {
        /// Device id from the configuration
        id: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { archive, json } => {
            logging::init(logging::LoggingConfig::default())?;
            let summary = data::inspect(&archive)
                .with_context(|| format!("cannot inspect {}", archive.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("{summary}");
            }
        }
        Commands::Devices => {
            let config = load_config(&cli.config)?;
            let registry = DeviceRegistry::from_config(&config)?;
            for info in registry.list_devices() {
                let resolved = match &info.resolution {
                    Ok(name) => name.clone(),
                    Err(reason) => format!("unresolved: {reason}"),
                };
                println!("{:<16} {:<28} {}", info.id, info.driver, resolved);
            }
        }
        Commands::Identify { id } => {
            let config = load_config(&cli.config)?;
            let mut registry = DeviceRegistry::from_config(&config)?;
            let device = registry.get_device(&id)?;
            println!("{}", device.identify()?);
            registry.disconnect_all()?;
        }
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<LabConfig> {
    let config = LabConfig::load(path)
        .with_context(|| format!("cannot load configuration from {}", path.display()))?;
    logging::init_from_config(&config)?;
    Ok(config)
}
