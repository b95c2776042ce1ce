//! Default filesystem locations

use std::path::PathBuf;

use crate::constants::paths::{CONFIG_DIR_NAME, CONFIG_FILE_NAME, DATA_DIR_NAME, LOGS_DIR_NAME};

/// Root config directory (`~/.govern`), falling back to the working directory
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Default store directory
pub fn data_dir() -> PathBuf {
    config_dir().join(DATA_DIR_NAME)
}

/// Log file directory
pub fn logs_dir() -> PathBuf {
    config_dir().join(LOGS_DIR_NAME)
}

/// Default config file path
pub fn config_file() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}
