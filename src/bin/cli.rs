//! Operational CLI for the switchboard fabric: inspecting and generating configuration files
//! without needing a running server, the way `caxton-cli` fronts its application server.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use switchboard::FabricConfig;

/// Configuration tooling for the switchboard fabric.
#[derive(Debug, Parser)]
#[command(name = "switchboard-cli", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Profile {
    Development,
    Production,
    Testing,
}

impl Profile {
    fn resolve(self) -> FabricConfig {
        match self {
            Profile::Development => FabricConfig::development(),
            Profile::Production => FabricConfig::production(),
            Profile::Testing => FabricConfig::testing(),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Prints a named preset as TOML, for redirecting into a file to start from.
    Show {
        #[arg(value_enum, default_value_t = Profile::Development)]
        profile: Profile,
    },
    /// Validates a configuration file, reporting the first failing check if any.
    Validate {
        /// Path to the TOML configuration file.
        path: PathBuf,
    },
    /// Writes a named preset to a file.
    Init {
        /// Destination path for the new configuration file.
        path: PathBuf,
        #[arg(value_enum, default_value_t = Profile::Development)]
        profile: Profile,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    match args.command {
        Command::Show { profile } => {
            let config = profile.resolve();
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Command::Validate { path } => {
            let config = FabricConfig::load_from_file(&path)?;
            config.validate()?;
            println!("{} is valid", path.display());
        }
        Command::Init { path, profile } => {
            let config = profile.resolve();
            config.save_to_file(&path)?;
            println!("wrote {} preset to {}", preset_name(profile), path.display());
        }
    }
    Ok(())
}

fn preset_name(profile: Profile) -> &'static str {
    match profile {
        Profile::Development => "development",
        Profile::Production => "production",
        Profile::Testing => "testing",
    }
}
