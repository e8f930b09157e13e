//! Capability-scoped plugin context
//!
//! Builds the object a plugin's `init` receives. Each capability maps to
//! one namespace; a namespace the user did not grant is still present but
//! its live binding is absent, so every method raises a deterministic,
//! catchable permission error naming the missing capability and the
//! attempted call — never "method not found". The `data` namespace is
//! mixed-mode: `data:read` and `data:write` gate its methods individually.
//!
//! `events`, `charts` and the app identity are part of the baseline
//! extension contract and are never gated.

use crate::capability::Capability;
use crate::domain::{NewContact, NewDebt, NewRecord};
use crate::extensions::ExtensionRegistry;
use crate::host::{ChartEngine, DataService, NetworkFetcher, ToastKind, UiHost};
use crate::storage::{KeyValueStore, PluginStorage};
use crate::{PluginError, PluginResult, APP_NAME, APP_VERSION};
use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, Position};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Raise a permission error across the interpreter boundary. The script
/// sees a normal runtime error it can catch; the message names both the
/// capability and the operation so plugin authors get an actionable signal.
fn deny(capability: Capability, operation: &str) -> Box<EvalAltResult> {
    let err = PluginError::PermissionDenied {
        capability,
        operation: operation.to_string(),
    };
    EvalAltResult::ErrorRuntime(Dynamic::from(err.to_string()), Position::NONE).into()
}

fn script_err(e: impl std::fmt::Display) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(Dynamic::from(e.to_string()), Position::NONE).into()
}

/// `ctx.storage` — live when the `storage` capability was consented.
#[derive(Clone)]
pub struct StorageApi {
    inner: Option<PluginStorage>,
}

impl StorageApi {
    fn live(&self, operation: &str) -> Result<&PluginStorage, Box<EvalAltResult>> {
        self.inner
            .as_ref()
            .ok_or_else(|| deny(Capability::Storage, operation))
    }
}

/// `ctx.data` — read and write halves gated independently.
#[derive(Clone)]
pub struct DataApi {
    service: Arc<dyn DataService>,
    can_read: bool,
    can_write: bool,
}

impl DataApi {
    fn read(&self, operation: &str) -> Result<&dyn DataService, Box<EvalAltResult>> {
        if self.can_read {
            Ok(self.service.as_ref())
        } else {
            Err(deny(Capability::DataRead, operation))
        }
    }

    fn write(&self, operation: &str) -> Result<&dyn DataService, Box<EvalAltResult>> {
        if self.can_write {
            Ok(self.service.as_ref())
        } else {
            Err(deny(Capability::DataWrite, operation))
        }
    }
}

/// `ctx.ui` — toasts, dialogs, navigation and extension registration.
#[derive(Clone)]
pub struct UiApi {
    owner: String,
    inner: Option<Arc<dyn UiHost>>,
    extensions: ExtensionRegistry,
    ui_granted: bool,
}

impl UiApi {
    fn live(&self, operation: &str) -> Result<&dyn UiHost, Box<EvalAltResult>> {
        self.inner
            .as_deref()
            .ok_or_else(|| deny(Capability::Ui, operation))
    }

    fn registry(&self, operation: &str) -> Result<&ExtensionRegistry, Box<EvalAltResult>> {
        if self.ui_granted {
            Ok(&self.extensions)
        } else {
            Err(deny(Capability::Ui, operation))
        }
    }
}

/// `ctx.net` — the only path to the network a plugin has.
#[derive(Clone)]
pub struct NetApi {
    inner: Option<Arc<dyn NetworkFetcher>>,
}

/// `ctx.events` — hook subscription, available to every plugin.
#[derive(Clone)]
pub struct EventsApi {
    owner: String,
    extensions: ExtensionRegistry,
}

/// `ctx.charts` — shared rendering handle, never gated.
#[derive(Clone)]
pub struct ChartsApi {
    engine: Arc<dyn ChartEngine>,
}

/// The context object handed to `init`. Ephemeral: built fresh on every
/// load and dropped with the plugin's runtime.
#[derive(Clone)]
pub struct PluginContext {
    pub(crate) storage: StorageApi,
    pub(crate) data: DataApi,
    pub(crate) ui: UiApi,
    pub(crate) net: NetApi,
    pub(crate) events: EventsApi,
    pub(crate) charts: ChartsApi,
    app_name: String,
    app_version: String,
}

/// Builds capability-scoped contexts and registers the context API on a
/// plugin's engine.
pub struct ContextFactory {
    kv: Arc<dyn KeyValueStore>,
    data: Arc<dyn DataService>,
    ui: Arc<dyn UiHost>,
    net: Arc<dyn NetworkFetcher>,
    charts: Arc<dyn ChartEngine>,
    extensions: ExtensionRegistry,
}

impl ContextFactory {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        data: Arc<dyn DataService>,
        ui: Arc<dyn UiHost>,
        net: Arc<dyn NetworkFetcher>,
        charts: Arc<dyn ChartEngine>,
        extensions: ExtensionRegistry,
    ) -> Self {
        Self {
            kv,
            data,
            ui,
            net,
            charts,
            extensions,
        }
    }

    /// Build the context for one plugin from its *consented* capability
    /// set, wiring live bindings only for granted namespaces.
    pub fn build(
        &self,
        plugin_id: &str,
        granted: &BTreeSet<Capability>,
    ) -> PluginResult<PluginContext> {
        let storage = StorageApi {
            inner: if granted.contains(&Capability::Storage) {
                Some(PluginStorage::new(self.kv.clone(), plugin_id)?)
            } else {
                None
            },
        };
        let ui_granted = granted.contains(&Capability::Ui);
        Ok(PluginContext {
            storage,
            data: DataApi {
                service: self.data.clone(),
                can_read: granted.contains(&Capability::DataRead),
                can_write: granted.contains(&Capability::DataWrite),
            },
            ui: UiApi {
                owner: plugin_id.to_string(),
                inner: ui_granted.then(|| self.ui.clone()),
                extensions: self.extensions.clone(),
                ui_granted,
            },
            net: NetApi {
                inner: granted
                    .contains(&Capability::Network)
                    .then(|| self.net.clone()),
            },
            events: EventsApi {
                owner: plugin_id.to_string(),
                extensions: self.extensions.clone(),
            },
            charts: ChartsApi {
                engine: self.charts.clone(),
            },
            app_name: APP_NAME.to_string(),
            app_version: APP_VERSION.to_string(),
        })
    }

    /// Register the whole context API surface on a plugin engine. The
    /// registration is uniform across plugins; which bindings are live is
    /// decided per-plugin by [`ContextFactory::build`].
    pub fn install_api(engine: &mut Engine) {
        register_context(engine);
        register_storage(engine);
        register_data(engine);
        register_ui(engine);
        register_net(engine);
        register_events(engine);
        register_charts(engine);
    }
}

fn register_context(engine: &mut Engine) {
    engine.register_type_with_name::<PluginContext>("PluginContext");
    engine.register_get("storage", |ctx: &mut PluginContext| ctx.storage.clone());
    engine.register_get("data", |ctx: &mut PluginContext| ctx.data.clone());
    engine.register_get("ui", |ctx: &mut PluginContext| ctx.ui.clone());
    engine.register_get("net", |ctx: &mut PluginContext| ctx.net.clone());
    engine.register_get("events", |ctx: &mut PluginContext| ctx.events.clone());
    engine.register_get("charts", |ctx: &mut PluginContext| ctx.charts.clone());
    engine.register_get("app_name", |ctx: &mut PluginContext| ctx.app_name.clone());
    engine.register_get("version", |ctx: &mut PluginContext| {
        ctx.app_version.clone()
    });
}

fn register_storage(engine: &mut Engine) {
    engine.register_type_with_name::<StorageApi>("Storage");
    engine.register_fn(
        "get_item",
        |api: &mut StorageApi, key: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            Ok(match api.live("storage.get_item")?.get_item(key) {
                Some(value) => Dynamic::from(value),
                None => Dynamic::UNIT,
            })
        },
    );
    engine.register_fn(
        "set_item",
        |api: &mut StorageApi, key: &str, value: &str| -> Result<(), Box<EvalAltResult>> {
            api.live("storage.set_item")?.set_item(key, value);
            Ok(())
        },
    );
    engine.register_fn(
        "remove_item",
        |api: &mut StorageApi, key: &str| -> Result<(), Box<EvalAltResult>> {
            api.live("storage.remove_item")?.remove_item(key);
            Ok(())
        },
    );
    engine.register_fn(
        "clear",
        |api: &mut StorageApi| -> Result<(), Box<EvalAltResult>> {
            api.live("storage.clear")?.clear();
            Ok(())
        },
    );
    engine.register_fn(
        "get_json",
        |api: &mut StorageApi, key: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            match api.live("storage.get_json")?.get_json(key) {
                Some(value) => rhai::serde::to_dynamic(&value),
                None => Ok(Dynamic::UNIT),
            }
        },
    );
    engine.register_fn(
        "set_json",
        |api: &mut StorageApi, key: &str, value: Dynamic| -> Result<(), Box<EvalAltResult>> {
            let storage = api.live("storage.set_json")?;
            let json: serde_json::Value = rhai::serde::from_dynamic(&value)?;
            storage.set_json(key, &json);
            Ok(())
        },
    );
}

fn register_data(engine: &mut Engine) {
    engine.register_type_with_name::<DataApi>("Data");
    engine.register_fn(
        "records",
        |api: &mut DataApi| -> Result<Dynamic, Box<EvalAltResult>> {
            let rows = api.read("data.records")?.records().map_err(script_err)?;
            rhai::serde::to_dynamic(&rows)
        },
    );
    engine.register_fn(
        "debts",
        |api: &mut DataApi| -> Result<Dynamic, Box<EvalAltResult>> {
            let rows = api.read("data.debts")?.debts().map_err(script_err)?;
            rhai::serde::to_dynamic(&rows)
        },
    );
    engine.register_fn(
        "contacts",
        |api: &mut DataApi| -> Result<Dynamic, Box<EvalAltResult>> {
            let rows = api.read("data.contacts")?.contacts().map_err(script_err)?;
            rhai::serde::to_dynamic(&rows)
        },
    );
    engine.register_fn(
        "accounts",
        |api: &mut DataApi| -> Result<Dynamic, Box<EvalAltResult>> {
            let rows = api.read("data.accounts")?.accounts().map_err(script_err)?;
            rhai::serde::to_dynamic(&rows)
        },
    );
    engine.register_fn(
        "categories",
        |api: &mut DataApi| -> Result<Dynamic, Box<EvalAltResult>> {
            let rows = api
                .read("data.categories")?
                .categories()
                .map_err(script_err)?;
            rhai::serde::to_dynamic(&rows)
        },
    );
    engine.register_fn(
        "add_record",
        |api: &mut DataApi, record: Dynamic| -> Result<i64, Box<EvalAltResult>> {
            let service = api.write("data.add_record")?;
            let record: NewRecord = rhai::serde::from_dynamic(&record)?;
            service.add_record(record).map_err(script_err)
        },
    );
    engine.register_fn(
        "add_debt",
        |api: &mut DataApi, debt: Dynamic| -> Result<i64, Box<EvalAltResult>> {
            let service = api.write("data.add_debt")?;
            let debt: NewDebt = rhai::serde::from_dynamic(&debt)?;
            service.add_debt(debt).map_err(script_err)
        },
    );
    engine.register_fn(
        "add_contact",
        |api: &mut DataApi, contact: Dynamic| -> Result<i64, Box<EvalAltResult>> {
            let service = api.write("data.add_contact")?;
            let contact: NewContact = rhai::serde::from_dynamic(&contact)?;
            service.add_contact(contact).map_err(script_err)
        },
    );
}

fn register_ui(engine: &mut Engine) {
    engine.register_type_with_name::<UiApi>("Ui");
    engine.register_fn(
        "show_toast",
        |api: &mut UiApi, message: &str| -> Result<(), Box<EvalAltResult>> {
            api.live("ui.show_toast")?
                .show_toast(message, ToastKind::Info);
            Ok(())
        },
    );
    engine.register_fn(
        "show_toast",
        |api: &mut UiApi, message: &str, kind: &str| -> Result<(), Box<EvalAltResult>> {
            api.live("ui.show_toast")?
                .show_toast(message, ToastKind::from_label(kind));
            Ok(())
        },
    );
    engine.register_fn(
        "navigate",
        |api: &mut UiApi, route: &str| -> Result<(), Box<EvalAltResult>> {
            api.live("ui.navigate")?.navigate(route);
            Ok(())
        },
    );
    engine.register_fn(
        "confirm",
        |api: &mut UiApi, message: &str| -> Result<bool, Box<EvalAltResult>> {
            Ok(api.live("ui.confirm")?.confirm(message))
        },
    );
    engine.register_fn(
        "alert",
        |api: &mut UiApi, message: &str| -> Result<(), Box<EvalAltResult>> {
            api.live("ui.alert")?.alert(message);
            Ok(())
        },
    );
    engine.register_fn(
        "open_add_transaction",
        |api: &mut UiApi, prefill: Dynamic| -> Result<(), Box<EvalAltResult>> {
            let ui = api.live("ui.open_add_transaction")?;
            let prefill: serde_json::Value = rhai::serde::from_dynamic(&prefill)?;
            ui.open_add_transaction(prefill);
            Ok(())
        },
    );
    engine.register_fn(
        "register_page",
        |api: &mut UiApi, route: &str, title: &str, render: FnPtr| -> Result<(), Box<EvalAltResult>> {
            let owner = api.owner.clone();
            api.registry("ui.register_page")?
                .register_page(&owner, route, title, render);
            Ok(())
        },
    );
    engine.register_fn(
        "register_home_widget",
        |api: &mut UiApi, id: &str, render: FnPtr| -> Result<(), Box<EvalAltResult>> {
            let owner = api.owner.clone();
            api.registry("ui.register_home_widget")?
                .register_home_widget(&owner, id, render);
            Ok(())
        },
    );
}

fn register_net(engine: &mut Engine) {
    engine.register_type_with_name::<NetApi>("Net");
    engine.register_fn(
        "get",
        |api: &mut NetApi, url: &str| -> Result<String, Box<EvalAltResult>> {
            let fetcher = api
                .inner
                .as_deref()
                .ok_or_else(|| deny(Capability::Network, "net.get"))?;
            fetcher.get(url).map_err(script_err)
        },
    );
}

fn register_events(engine: &mut Engine) {
    engine.register_type_with_name::<EventsApi>("Events");
    engine.register_fn("on", |api: &mut EventsApi, hook: &str, callback: FnPtr| {
        api.extensions.on(&api.owner, hook, callback);
    });
    engine.register_fn("off", |api: &mut EventsApi, hook: &str, callback: FnPtr| {
        api.extensions.off(&api.owner, hook, &callback);
    });
}

fn register_charts(engine: &mut Engine) {
    engine.register_type_with_name::<ChartsApi>("Charts");
    engine.register_fn(
        "render",
        |api: &mut ChartsApi, spec: Dynamic| -> Result<String, Box<EvalAltResult>> {
            let spec: serde_json::Value = rhai::serde::from_dynamic(&spec)?;
            api.engine.render(&spec).map_err(script_err)
        },
    );
}
