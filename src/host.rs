//! Host collaborator interfaces
//!
//! The plugin host mediates between untrusted scripts and these host-owned
//! surfaces. Plugins are never handed the host's own database, UI layer or
//! HTTP stack; they only ever see these traits through a capability-scoped
//! context, which is what makes the sandbox hold (no ambient authority to
//! intercept in the first place).

use crate::domain::{Account, Category, Contact, Debt, NewContact, NewDebt, NewRecord, TxRecord};
use crate::PluginResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Info,
    Success,
    Error,
}

impl ToastKind {
    /// Lenient parse for the string form plugins pass; unknown kinds fall
    /// back to `Info`.
    pub fn from_label(label: &str) -> Self {
        match label {
            "success" => ToastKind::Success,
            "error" => ToastKind::Error,
            _ => ToastKind::Info,
        }
    }
}

/// The host UI surface: toasts, dialogs and navigation.
///
/// Page and widget registration goes through the extension registry, not
/// this trait; the trait only covers operations the host renders itself.
pub trait UiHost: Send + Sync {
    fn show_toast(&self, message: &str, kind: ToastKind);
    fn navigate(&self, route: &str);
    fn confirm(&self, message: &str) -> bool;
    fn alert(&self, message: &str);
    /// Open the add-transaction page with prefilled fields.
    fn open_add_transaction(&self, prefill: serde_json::Value);
}

/// Read and write access to the ledger, gated per-direction by
/// `data:read` and `data:write`.
pub trait DataService: Send + Sync {
    fn records(&self) -> PluginResult<Vec<TxRecord>>;
    fn debts(&self) -> PluginResult<Vec<Debt>>;
    fn contacts(&self) -> PluginResult<Vec<Contact>>;
    fn accounts(&self) -> PluginResult<Vec<Account>>;
    fn categories(&self) -> PluginResult<Vec<Category>>;

    fn add_record(&self, record: NewRecord) -> PluginResult<i64>;
    fn add_debt(&self, debt: NewDebt) -> PluginResult<i64>;
    fn add_contact(&self, contact: NewContact) -> PluginResult<i64>;
}

/// Outbound HTTP, the only network path a plugin can reach.
pub trait NetworkFetcher: Send + Sync {
    fn get(&self, url: &str) -> PluginResult<String>;
}

/// Blocking reqwest-backed fetcher.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkFetcher for HttpFetcher {
    fn get(&self, url: &str) -> PluginResult<String> {
        // The blocking client must not run on the async runtime's thread,
        // and plugin calls arrive from inside one. Hop to a fresh thread.
        let client = self.client.clone();
        let url = url.to_string();
        let handle = std::thread::spawn(move || -> PluginResult<String> {
            let response = client.get(&url).send()?.error_for_status()?;
            Ok(response.text()?)
        });
        handle
            .join()
            .map_err(|_| crate::PluginError::Script("network fetch thread panicked".into()))?
    }
}

/// Shared rendering handle passed to every plugin by reference. Not
/// capability-gated; it can only draw, not touch data.
pub trait ChartEngine: Send + Sync {
    /// Render a chart spec (labels, values, chart type) to markup the host
    /// can embed.
    fn render(&self, spec: &serde_json::Value) -> PluginResult<String>;
}
