//! Wabi Ledger Plugin Host
//!
//! The subsystem of Wabi Ledger that loads third-party extension scripts,
//! decides what each one is allowed to touch, and enforces that decision at
//! runtime. Provides:
//! - Capability model and consent flow (install and update diffs)
//! - Sandboxed script execution via an embedded rhai engine with zero
//!   ambient authority
//! - Capability-scoped context objects (`storage`, `data`, `ui`, `net`,
//!   `events`, `charts`)
//! - Per-plugin isolated key-value storage
//! - Extension points: custom pages, home widgets, lifecycle hooks
//! - Plugin registry with SQLite persistence and a remote store feed

pub mod capability;
pub mod consent;
pub mod context;
pub mod domain;
pub mod extensions;
pub mod feed;
pub mod host;
pub mod registry;
pub mod sandbox;
pub mod storage;

#[cfg(test)]
mod context_tests;
#[cfg(test)]
mod testutil;

use capability::Capability;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Application identity exposed to every plugin context.
pub const APP_NAME: &str = "Wabi Ledger";
/// Host application version, not the plugin host crate version.
pub const APP_VERSION: &str = "2.1.0";

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Plugin validation failed: {0}")]
    Validation(String),

    #[error("Permission denied: '{operation}' requires the '{capability}' capability")]
    PermissionDenied {
        capability: Capability,
        operation: String,
    },

    #[error("User declined the consent prompt")]
    ConsentDeclined,

    #[error("Plugin '{plugin}' failed to load: {reason}")]
    Load { plugin: String, reason: String },

    #[error("Plugin '{0}' is not installed")]
    NotFound(String),

    #[error("Plugin script error: {0}")]
    Script(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Plugin IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PluginResult<T> = Result<T, PluginError>;

/// Metadata a plugin declares about itself via its `metadata()` function.
///
/// The declared `permissions` are what the plugin *asks* for; the set the
/// user actually consents to is recorded on the [`PluginRecord`] and is the
/// only set authorization ever consults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub permissions: BTreeSet<Capability>,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Persisted state for one installed plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRecord {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub icon: String,
    /// The capability set the user consented to for this installed version.
    /// Never the declared set.
    pub permissions: BTreeSet<Capability>,
    /// Verbatim plugin source text, stored unwrapped.
    pub source: String,
    pub enabled: bool,
    pub installed_at: DateTime<Utc>,
}

impl PluginRecord {
    /// Build a fresh record from a validated manifest and a consented set.
    pub fn from_manifest(
        manifest: &PluginManifest,
        consented: BTreeSet<Capability>,
        source: &str,
    ) -> Self {
        Self {
            id: manifest.id.clone(),
            name: if manifest.name.is_empty() {
                manifest.id.clone()
            } else {
                manifest.name.clone()
            },
            version: manifest.version.clone(),
            description: manifest.description.clone(),
            author: manifest.author.clone(),
            icon: manifest.icon.clone(),
            permissions: consented,
            source: source.to_string(),
            enabled: true,
            installed_at: Utc::now(),
        }
    }
}

/// Validate a plugin id against `[A-Za-z0-9._-]+`.
///
/// Ids become storage key prefixes, so anything outside this alphabet is a
/// prefix-escape vector and is rejected outright.
pub fn validate_plugin_id(id: &str) -> PluginResult<()> {
    if id.is_empty() {
        return Err(PluginError::Validation("plugin id cannot be empty".into()));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(PluginError::Validation(format!(
            "invalid plugin id '{id}': only letters, digits, dots, underscores and hyphens are allowed"
        )));
    }
    Ok(())
}
