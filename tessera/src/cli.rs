use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the config file
    #[arg(short, long, global = true, env = "TESSERA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect and fill the configured key vaults
    Vaults {
        #[command(subcommand)]
        action: VaultAction,
    },
    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum VaultAction {
    /// Look up a key by KID
    Get {
        kid: String,
        /// Service tag the key belongs to
        #[arg(short, long, env = "TESSERA_SERVICE")]
        service: String,
    },
    /// Store a key in every vault
    Add {
        kid: String,
        key: String,
        #[arg(short, long, env = "TESSERA_SERVICE")]
        service: String,
    },
    /// Store every key of a key export file in every vault
    Import {
        export: PathBuf,
        #[arg(short, long, env = "TESSERA_SERVICE")]
        service: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration with secrets masked
    Show,
    /// Print the default config file location
    Path,
}
