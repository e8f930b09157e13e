//! Permission consent flow
//!
//! Every install and every permission-expanding update is gated behind an
//! explicit user decision. The metadata shown in the prompt always comes
//! from a zero-authority sandbox parse of the plugin, never from trusting
//! the running plugin, and a store-feed manifest takes precedence over the
//! plugin's self-declared permissions since the store is the more trusted
//! source.

use crate::capability::Capability;
use crate::PluginManifest;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// One row of the consent view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityInfo {
    pub capability: Capability,
    pub label: &'static str,
    pub description: &'static str,
}

impl From<Capability> for CapabilityInfo {
    fn from(capability: Capability) -> Self {
        Self {
            capability,
            label: capability.label(),
            description: capability.description(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentKind {
    Install,
    /// An update asking for capabilities beyond the consented set; the
    /// request lists only the newly-requested ones.
    Update,
}

/// What the user is asked to approve.
#[derive(Debug, Clone)]
pub struct ConsentRequest {
    pub kind: ConsentKind,
    pub plugin_id: String,
    pub plugin_name: String,
    pub version: String,
    pub capabilities: Vec<CapabilityInfo>,
}

impl ConsentRequest {
    pub fn install(manifest: &PluginManifest, declared: &BTreeSet<Capability>) -> Self {
        Self::new(ConsentKind::Install, manifest, declared)
    }

    pub fn update(manifest: &PluginManifest, diff: &BTreeSet<Capability>) -> Self {
        Self::new(ConsentKind::Update, manifest, diff)
    }

    fn new(kind: ConsentKind, manifest: &PluginManifest, caps: &BTreeSet<Capability>) -> Self {
        Self {
            kind,
            plugin_id: manifest.id.clone(),
            plugin_name: if manifest.name.is_empty() {
                manifest.id.clone()
            } else {
                manifest.name.clone()
            },
            version: manifest.version.clone(),
            capabilities: caps.iter().copied().map(CapabilityInfo::from).collect(),
        }
    }
}

/// The host UI's consent dialog. `true` means the user approved.
#[async_trait]
pub trait ConsentPrompt: Send + Sync {
    async fn request(&self, request: &ConsentRequest) -> bool;
}
