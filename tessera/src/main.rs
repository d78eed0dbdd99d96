mod cli;

use std::process;

use clap::Parser;
use key_vaults::Vaults;
use media_tracks::{ContentKey, kid_hex, parse_kid};
use tessera::config::AppConfig;
use tessera::drm::KeyExport;
use tessera::logging::init_logging;
use tessera::{Error, Result};
use tracing::{error, info, warn};

use crate::cli::{Args, Commands, ConfigAction, VaultAction};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = AppConfig::load(args.config.as_deref())?;
    let _guard = init_logging(args.verbose, args.quiet, config.log_dir.as_deref())?;

    match args.command {
        Commands::Vaults { action } => run_vaults(&config, action).await,
        Commands::Config { action } => run_config(&config, action),
    }
}

async fn connect(config: &AppConfig, service: &str) -> Result<Vaults> {
    let vaults = config.vaults(service).await?;
    if vaults.is_empty() {
        return Err(Error::config("No key vaults are configured"));
    }
    info!(service, vaults = vaults.len(), "Connected to vaults");
    Ok(vaults)
}

async fn run_vaults(config: &AppConfig, action: VaultAction) -> Result<()> {
    match action {
        VaultAction::Get { kid, service } => {
            let kid = parse_kid(&kid)?;
            let vaults = connect(config, &service).await?;
            match vaults.get_key(&kid, None).await {
                (Some(key), Some(vault)) => {
                    info!(vault = %vault.name(), "Key found");
                    println!("{}:{}", kid_hex(&kid), key);
                }
                _ => {
                    return Err(Error::other(format!(
                        "No vault has a key for {}",
                        kid_hex(&kid)
                    )));
                }
            }
        }
        VaultAction::Add { kid, key, service } => {
            let kid = parse_kid(&kid)?;
            let key = ContentKey::new(&key)?;
            let vaults = connect(config, &service).await?;
            let stored = vaults.add_key(&kid, &key, None, None).await;
            if stored == 0 {
                warn!(kid = %kid_hex(&kid), "Key was not stored in any vault");
            } else {
                info!(kid = %kid_hex(&kid), stored, "Stored key");
            }
        }
        VaultAction::Import { export, service } => {
            let keys = KeyExport::new(&export).keys().await?;
            if keys.is_empty() {
                warn!(path = %export.display(), "Key export holds no keys");
                return Ok(());
            }
            let vaults = connect(config, &service).await?;
            let stored = vaults.add_keys(&keys, None).await;
            info!(
                path = %export.display(),
                keys = keys.len(),
                stored,
                "Imported key export"
            );
        }
    }
    Ok(())
}

fn run_config(config: &AppConfig, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", config.redacted().to_toml()?);
        }
        ConfigAction::Path => match AppConfig::default_path() {
            Some(path) => println!("{}", path.display()),
            None => return Err(Error::config("No config directory on this platform")),
        },
    }
    Ok(())
}
