//! Remote plugin store feed
//!
//! An optional, remotely-fetched index of installable plugins. Feed
//! entries pre-populate the consent prompt (the feed's permission list is
//! more trusted than the plugin's own metadata) and drive update
//! detection.

use crate::capability::Capability;
use crate::registry::compare_versions;
use crate::{PluginRecord, PluginResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// One installable plugin as listed by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreEntry {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    /// URL of the plugin source file.
    pub file: String,
    #[serde(default)]
    pub permissions: BTreeSet<Capability>,
}

/// Fetch and parse the store index.
pub async fn fetch_feed(client: &reqwest::Client, url: &str) -> PluginResult<Vec<StoreEntry>> {
    let entries = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json::<Vec<StoreEntry>>()
        .await?;
    Ok(entries)
}

/// Download a feed entry's source text.
pub async fn fetch_source(client: &reqwest::Client, entry: &StoreEntry) -> PluginResult<String> {
    let source = client
        .get(&entry.file)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    Ok(source)
}

/// The feed entry offering a strictly newer version of an installed
/// plugin, if any.
pub fn available_update<'a>(
    record: &PluginRecord,
    entries: &'a [StoreEntry],
) -> Option<&'a StoreEntry> {
    entries
        .iter()
        .find(|e| e.id == record.id && compare_versions(&e.version, &record.version) == Ordering::Greater)
}
