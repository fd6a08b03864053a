//! Storage Layer
//!
//! Resolves the per-user directories holding the scanner config and the
//! downloaded OCR models.

use anyhow::Result;
use directories::ProjectDirs;
use std::path::PathBuf;

/// Default config file name inside the config directory
pub const CONFIG_FILE: &str = "config.toml";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "platescanner", "PlateScanner")
}

/// Get the application data directory
pub fn get_data_dir() -> Result<PathBuf> {
    let proj_dirs = project_dirs()
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;

    let data_dir = proj_dirs.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;

    Ok(data_dir)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let proj_dirs = project_dirs()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    let config_dir = proj_dirs.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}

/// Default location of the models directory
pub fn get_models_dir() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("models"))
}

/// Default location of the scanner config file
pub fn default_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join(CONFIG_FILE))
}
