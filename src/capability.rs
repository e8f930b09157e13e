//! Capability model
//!
//! A capability is a coarse-grained, user-consentable permission gating one
//! namespace of the plugin context. The enumeration is closed: plugins
//! cannot invent capabilities, and unknown strings fail manifest parsing.

use crate::{PluginError, PluginResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Isolated per-plugin key-value storage.
    #[serde(rename = "storage")]
    Storage,
    /// Read access to records, debts, contacts, accounts and categories.
    #[serde(rename = "data:read")]
    DataRead,
    /// Write access: add records, debts and contacts.
    #[serde(rename = "data:write")]
    DataWrite,
    /// Toasts, dialogs, navigation, custom pages and home widgets.
    #[serde(rename = "ui")]
    Ui,
    /// Outbound HTTP requests.
    #[serde(rename = "network")]
    Network,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::Storage,
        Capability::DataRead,
        Capability::DataWrite,
        Capability::Ui,
        Capability::Network,
    ];

    /// Wire form, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Storage => "storage",
            Capability::DataRead => "data:read",
            Capability::DataWrite => "data:write",
            Capability::Ui => "ui",
            Capability::Network => "network",
        }
    }

    /// Short human-readable name shown in the consent prompt.
    pub fn label(&self) -> &'static str {
        match self {
            Capability::Storage => "Private storage",
            Capability::DataRead => "Read your data",
            Capability::DataWrite => "Add entries",
            Capability::Ui => "Extend the interface",
            Capability::Network => "Internet access",
        }
    }

    /// One-line explanation shown in the consent prompt.
    pub fn description(&self) -> &'static str {
        match self {
            Capability::Storage => "Keep its own settings and data, isolated from other plugins",
            Capability::DataRead => {
                "See your transactions, debts, contacts, accounts and categories"
            }
            Capability::DataWrite => "Add new transactions, debts and contacts on your behalf",
            Capability::Ui => "Show messages, open pages and add widgets to the home screen",
            Capability::Network => "Contact servers on the internet",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = PluginError;

    fn from_str(s: &str) -> PluginResult<Self> {
        Capability::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| PluginError::Validation(format!("unknown capability '{s}'")))
    }
}

/// The consent diff: capabilities present in `new` but absent from `old`.
///
/// An empty result means an update requests no authority beyond what the
/// user already approved and may proceed without re-consent.
pub fn newly_requested(
    new: &BTreeSet<Capability>,
    old: &BTreeSet<Capability>,
) -> BTreeSet<Capability> {
    new.difference(old).copied().collect()
}
