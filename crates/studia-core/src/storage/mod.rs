mod config;
pub mod database;
pub mod migrations;
mod sqlite_store;

pub use config::{Config, RetryConfig, RunConfig, StudentConfig, TimerConfig};
pub use database::Database;
pub use sqlite_store::SqliteStore;

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/studia[-dev]/` based on STUDIA_ENV.
///
/// Set STUDIA_ENV=dev to use the development data directory.
/// STUDIA_DATA_DIR overrides both.
///
/// # Errors
/// Returns an error if the directory cannot be created.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("STUDIA_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("STUDIA_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("studia-dev")
            } else {
                base_dir.join("studia")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
