//! Script command - print the client script.

use crate::config::Settings;
use crate::middleware::{injected_script, normalize_endpoint};

/// Render the script for `endpoint`, falling back to `reload.endpoint`.
pub fn render(endpoint: Option<String>, settings: &Settings) -> String {
    let endpoint = endpoint.unwrap_or_else(|| settings.reload.endpoint.clone());
    injected_script(&normalize_endpoint(endpoint))
}

/// Run the script command.
pub fn run(endpoint: Option<String>, settings: &Settings) {
    println!("{}", render(endpoint, settings).trim_start());
}
