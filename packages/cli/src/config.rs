// ABOUTME: Environment-driven configuration for the Crucible server
// ABOUTME: Parses and validates ports, paths, and the sandbox image name

use std::env;
use std::num::ParseIntError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid port number: {0}")]
    InvalidPort(#[from] ParseIntError),
    #[error("Port {0} is out of valid range (1-65535)")]
    PortOutOfRange(u16),
}

#[derive(Debug)]
pub struct Config {
    pub port: u16,
    pub cors_origin: String,
    /// SQLite database file backing the metadata store
    pub database_path: String,
    /// Root directory for per-environment working directories
    pub data_dir: PathBuf,
    /// Image every sandbox unit runs
    pub kernel_image: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port_str = env::var("CRUCIBLE_PORT").unwrap_or_else(|_| "4100".to_string());

        let port = port_str.parse::<u16>()?;
        if port == 0 {
            return Err(ConfigError::PortOutOfRange(port));
        }

        let cors_origin =
            env::var("CORS_ORIGIN").unwrap_or_else(|_| "http://localhost:5173".to_string());

        let database_path =
            env::var("CRUCIBLE_DB").unwrap_or_else(|_| "crucible.db".to_string());

        let data_dir = env::var("CRUCIBLE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));

        let kernel_image =
            env::var("CRUCIBLE_IMAGE").unwrap_or_else(|_| "crucible-node:latest".to_string());

        Ok(Config {
            port,
            cors_origin,
            database_path,
            data_dir,
            kernel_image,
        })
    }
}
