//! Config command handlers.

use std::path::Path;

use anyhow::{Context, Result};
use appsession_core::config;

pub fn path(explicit: Option<&Path>) {
    println!("{}", config::paths::resolve(explicit).display());
}

pub fn init(explicit: Option<&Path>) -> Result<()> {
    let config_path = config::paths::resolve(explicit);
    config::Config::init(&config_path)
        .with_context(|| format!("init config at {}", config_path.display()))?;
    println!("Created config at {}", config_path.display());
    Ok(())
}
