//! Settings actions.
//!
//! Provides get/save operations for link settings, persisting to a JSON file
//! in the app data directory.

use std::path::Path;

use tracing::debug;

use crate::settings::{LinkSettings, SettingsManager};

/// Get current link settings from disk.
///
/// Returns default settings if no settings file exists yet.
pub async fn get_link_settings(app_data_dir: &Path) -> Result<LinkSettings, String> {
    SettingsManager::new(app_data_dir).load()
}

/// Save link settings to disk.
///
/// Takes effect for links created afterwards.
pub async fn save_link_settings(
    app_data_dir: &Path,
    settings: LinkSettings,
) -> Result<(), String> {
    let manager = SettingsManager::new(app_data_dir);
    manager.save(&settings)?;

    if settings != LinkSettings::default() {
        debug!(path = %manager.settings_path().display(), "saved non-default settings");
    }
    Ok(())
}
