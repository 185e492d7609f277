//! Command line and environment configuration.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use asset_hub_core::importer::DEFAULT_WORKERS;

const DEV_SECRET: &str = "asset-hub-development-secret";

#[derive(Parser)]
#[command(name = "asset-hub")]
#[command(about = "Teams, shared folders and notes behind one permission model")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Listen address
        #[arg(short, long, env = "ASSET_HUB_ADDR", default_value = "127.0.0.1:3000")]
        addr: SocketAddr,
    },

    /// Import users from a CSV file straight into the data directory
    Import {
        /// CSV file with a header row and username,email,password,role columns
        file: PathBuf,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub data_dir: PathBuf,
    pub jwt_secret: String,
    pub import_workers: usize,
    pub import_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            jwt_secret: DEV_SECRET.to_string(),
            import_workers: DEFAULT_WORKERS,
            import_timeout: None,
        }
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => Ok(Some(
            value
                .trim()
                .parse()
                .with_context(|| format!("invalid {name}: {value}"))?,
        )),
        Err(_) => Ok(None),
    }
}

/// Read the server configuration from the environment.
pub fn load_config() -> Result<Config> {
    let defaults = Config::default();
    let jwt_secret = match std::env::var("JWT_SECRET") {
        Ok(secret) if !secret.is_empty() => secret,
        _ => {
            warn!("JWT_SECRET not set, using the development secret");
            defaults.jwt_secret
        }
    };
    Ok(Config {
        data_dir: std::env::var("ASSET_HUB_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir),
        jwt_secret,
        import_workers: parse_var("IMPORT_WORKERS")?
            .unwrap_or(defaults.import_workers)
            .max(1),
        import_timeout: parse_var::<u64>("IMPORT_TIMEOUT_SECS")?.map(Duration::from_secs),
    })
}
