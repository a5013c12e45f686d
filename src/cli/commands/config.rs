//! Config command - show or write the effective settings.

use std::path::Path;

use anyhow::Context;

use crate::config::Settings;

/// Run the config command.
pub fn run(write: bool, settings: &Settings, path: &Path) -> anyhow::Result<()> {
    if write {
        settings
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Wrote settings to {}", path.display());
    } else {
        print!("{}", settings.to_toml()?);
    }
    Ok(())
}
