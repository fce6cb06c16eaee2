//! Loading of job, roster and configuration files.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use fieldroute_core::{DispatchConfig, ServiceJob, Technician};

pub(crate) fn load_jobs(path: &Path) -> Result<Vec<ServiceJob>> {
    let raw = read(path)?;
    parse_jobs(&raw).with_context(|| format!("parsing jobs from {}", path.display()))
}

pub(crate) fn load_technicians(path: &Path) -> Result<Vec<Technician>> {
    let raw = read(path)?;
    parse_technicians(&raw).with_context(|| format!("parsing technicians from {}", path.display()))
}

/// Defaults when no file is given; the result is validated either way.
pub(crate) fn load_config(path: Option<&Path>) -> Result<DispatchConfig> {
    let config = match path {
        Some(path) => {
            let raw = read(path)?;
            parse_config(&raw).with_context(|| format!("parsing config {}", path.display()))?
        }
        None => DispatchConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn parse_jobs(raw: &str) -> Result<Vec<ServiceJob>> {
    Ok(serde_json::from_str(raw)?)
}

fn parse_technicians(raw: &str) -> Result<Vec<Technician>> {
    Ok(serde_json::from_str(raw)?)
}

fn parse_config(raw: &str) -> Result<DispatchConfig> {
    Ok(toml::from_str(raw)?)
}
