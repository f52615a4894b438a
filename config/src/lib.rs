//! Configuration for the agent server: apply project `.env` to the process
//! environment (existing env wins), then read a typed [`Settings`] from it.

mod dotenv;
mod settings;

use std::path::Path;
use thiserror::Error;

pub use settings::Settings;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

/// Loads `.env` (from `override_dir` or the current directory) and sets each
/// key that the process environment does not already define.
pub fn load_and_apply(override_dir: Option<&Path>) -> Result<(), SettingsError> {
    let map = dotenv::load_env_map(override_dir).map_err(SettingsError::DotenvRead)?;
    for (key, value) in map {
        if std::env::var(&key).is_err() {
            std::env::set_var(&key, value);
        }
    }
    Ok(())
}

/// Convenience: `.env` application followed by [`Settings::from_env`].
pub fn load(override_dir: Option<&Path>) -> Result<Settings, SettingsError> {
    load_and_apply(override_dir)?;
    Settings::from_env()
}
