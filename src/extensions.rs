//! Extension points registry
//!
//! Lets plugins extend host surfaces the host does not know about in
//! advance: custom pages, home-screen widgets with a persisted order, and
//! named lifecycle hooks. Every registration carries the owning plugin id
//! so unloading a plugin sweeps all of its registrations; the widget
//! *order* is the one exception and deliberately keeps stale ids, so a
//! disabled-then-re-enabled plugin resumes its prior slot.
//!
//! Script callbacks are stored as `FnPtr`s and invoked against the owner's
//! engine and AST, which live here for exactly that purpose. Hook callbacks
//! run sequentially in registration order; a callback transforms the
//! payload by returning a new value, and must return the payload to keep
//! the chain alive — returning unit is the cancellation signal that
//! short-circuits the remaining callbacks.

use crate::storage::KeyValueStore;
use crate::{PluginError, PluginResult};
use rhai::{Dynamic, Engine, FnPtr, AST};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

/// Settings key holding the shared home-widget order.
const WIDGET_ORDER_KEY: &str = "home_widget_order";

/// A running plugin's execution state, kept only while the plugin is
/// loaded. Created fresh on every load, dropped on unload.
#[derive(Clone)]
pub struct PluginRuntime {
    pub engine: Rc<Engine>,
    pub ast: Rc<AST>,
}

#[derive(Clone)]
struct PageEntry {
    owner: String,
    title: String,
    render: FnPtr,
}

#[derive(Clone)]
struct WidgetEntry {
    id: String,
    owner: String,
    render: FnPtr,
}

#[derive(Clone)]
struct HookSubscription {
    owner: String,
    callback: FnPtr,
}

/// A widget rendered for the home screen.
#[derive(Debug, Clone)]
pub struct RenderedWidget {
    pub id: String,
    pub html: String,
}

/// A custom page resolved for the router.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub title: String,
    pub html: String,
}

struct ExtensionState {
    pages: HashMap<String, PageEntry>,
    /// Registration order preserved; re-registering an id replaces in
    /// place.
    widgets: Vec<WidgetEntry>,
    hooks: HashMap<String, Vec<HookSubscription>>,
    order: Vec<String>,
    runtimes: HashMap<String, PluginRuntime>,
    kv: Arc<dyn KeyValueStore>,
}

/// Shared handle to the process-wide extension state. Cheap to clone;
/// everything runs on the host UI thread, so interior mutability is a
/// `RefCell` and dispatch snapshots state before calling back into scripts.
#[derive(Clone)]
pub struct ExtensionRegistry {
    state: Rc<RefCell<ExtensionState>>,
}

impl ExtensionRegistry {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        let order = match kv.get(WIDGET_ORDER_KEY) {
            Some(raw) => match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(order) => order,
                Err(e) => {
                    tracing::warn!(error = %e, "widget order setting is corrupt, starting empty");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        Self {
            state: Rc::new(RefCell::new(ExtensionState {
                pages: HashMap::new(),
                widgets: Vec::new(),
                hooks: HashMap::new(),
                order,
                runtimes: HashMap::new(),
                kv,
            })),
        }
    }

    // ------------------------------------------------------------------
    // Runtime lifecycle
    // ------------------------------------------------------------------

    pub fn insert_runtime(&self, owner: &str, engine: Rc<Engine>, ast: Rc<AST>) {
        self.state
            .borrow_mut()
            .runtimes
            .insert(owner.to_string(), PluginRuntime { engine, ast });
    }

    pub fn is_running(&self, owner: &str) -> bool {
        self.state.borrow().runtimes.contains_key(owner)
    }

    /// Drop a plugin's runtime and sweep every registration it owns.
    /// The widget order is left untouched.
    pub fn unload(&self, owner: &str) {
        let mut state = self.state.borrow_mut();
        state.runtimes.remove(owner);
        state.pages.retain(|_, p| p.owner != owner);
        state.widgets.retain(|w| w.owner != owner);
        for subs in state.hooks.values_mut() {
            subs.retain(|s| s.owner != owner);
        }
        state.hooks.retain(|_, subs| !subs.is_empty());
    }

    fn runtime(&self, owner: &str) -> Option<PluginRuntime> {
        self.state.borrow().runtimes.get(owner).cloned()
    }

    fn call_render(&self, owner: &str, render: &FnPtr) -> PluginResult<String> {
        let runtime = self.runtime(owner).ok_or_else(|| PluginError::Script(
            format!("callback owner '{owner}' is not running"),
        ))?;
        render
            .call::<String>(&runtime.engine, &runtime.ast, ())
            .map_err(|e| PluginError::Script(e.to_string()))
    }

    // ------------------------------------------------------------------
    // Custom pages
    // ------------------------------------------------------------------

    /// Associate a route with a render callback. Routes resolve only after
    /// built-in routes fail to match. Last writer wins, with a warning.
    pub fn register_page(&self, owner: &str, route: &str, title: &str, render: FnPtr) {
        let mut state = self.state.borrow_mut();
        if let Some(existing) = state.pages.get(route) {
            tracing::warn!(
                route,
                previous_owner = %existing.owner,
                new_owner = %owner,
                "plugin page route already registered, overwriting"
            );
        }
        state.pages.insert(
            route.to_string(),
            PageEntry {
                owner: owner.to_string(),
                title: title.to_string(),
                render,
            },
        );
        tracing::info!(route, owner, "registered custom page");
    }

    pub fn has_page(&self, route: &str) -> bool {
        self.state.borrow().pages.contains_key(route)
    }

    pub fn page_title(&self, route: &str) -> Option<String> {
        self.state.borrow().pages.get(route).map(|p| p.title.clone())
    }

    /// Resolve and render a custom page. `None` means the route is not
    /// registered and the router should fall through to its 404 handling.
    pub fn render_page(&self, route: &str) -> Option<PluginResult<RenderedPage>> {
        let entry = self.state.borrow().pages.get(route).cloned()?;
        Some(
            self.call_render(&entry.owner, &entry.render)
                .map(|html| RenderedPage {
                    title: entry.title,
                    html,
                }),
        )
    }

    // ------------------------------------------------------------------
    // Home widgets
    // ------------------------------------------------------------------

    /// Register a home widget. A new id is appended to the persisted order;
    /// a known id (including one left behind by an earlier enable) keeps
    /// its slot.
    pub fn register_home_widget(&self, owner: &str, id: &str, render: FnPtr) {
        let mut state = self.state.borrow_mut();
        let entry = WidgetEntry {
            id: id.to_string(),
            owner: owner.to_string(),
            render,
        };
        match state.widgets.iter_mut().find(|w| w.id == id) {
            Some(existing) => {
                tracing::warn!(widget = id, "home widget already registered, overwriting");
                *existing = entry;
            }
            None => state.widgets.push(entry),
        }
        if !state.order.iter().any(|o| o == id) {
            state.order.push(id.to_string());
            persist_order(&state);
        }
    }

    pub fn widget_order(&self) -> Vec<String> {
        self.state.borrow().order.clone()
    }

    /// Swap a widget with its neighbour. `delta` is -1 (up) or +1 (down);
    /// out-of-range moves and unknown ids are no-ops.
    pub fn move_widget(&self, id: &str, delta: i64) {
        let mut state = self.state.borrow_mut();
        let Some(pos) = state.order.iter().position(|o| o == id) else {
            tracing::warn!(widget = id, "move requested for widget missing from order");
            return;
        };
        let target = pos as i64 + delta;
        if target < 0 || target as usize >= state.order.len() {
            return;
        }
        state.order.swap(pos, target as usize);
        persist_order(&state);
    }

    /// Render every ordered widget that is currently registered, then any
    /// registered widget missing from the order. Ids in the order without a
    /// live widget are skipped, not pruned. A widget whose callback fails
    /// is dropped from this render only.
    pub fn render_home_widgets(&self) -> Vec<RenderedWidget> {
        let (order, widgets) = {
            let state = self.state.borrow();
            (state.order.clone(), state.widgets.clone())
        };

        let mut out = Vec::new();
        let mut rendered: Vec<&str> = Vec::new();
        for id in &order {
            if let Some(entry) = widgets.iter().find(|w| &w.id == id) {
                self.render_widget_into(entry, &mut out);
                rendered.push(id);
            }
        }
        // Defensive fallback for a stale or corrupted order list.
        for entry in widgets.iter().filter(|w| !rendered.contains(&w.id.as_str())) {
            self.render_widget_into(entry, &mut out);
        }
        out
    }

    fn render_widget_into(&self, entry: &WidgetEntry, out: &mut Vec<RenderedWidget>) {
        match self.call_render(&entry.owner, &entry.render) {
            Ok(html) => out.push(RenderedWidget {
                id: entry.id.clone(),
                html,
            }),
            Err(e) => {
                tracing::error!(widget = %entry.id, owner = %entry.owner, error = %e, "widget render failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle hooks
    // ------------------------------------------------------------------

    /// Subscribe a callback to a named hook. Subscriptions keep
    /// registration order and carry the owner for unload sweeping.
    pub fn on(&self, owner: &str, hook: &str, callback: FnPtr) {
        self.state
            .borrow_mut()
            .hooks
            .entry(hook.to_string())
            .or_default()
            .push(HookSubscription {
                owner: owner.to_string(),
                callback,
            });
    }

    /// Unsubscribe by owner and function identity (name).
    pub fn off(&self, owner: &str, hook: &str, callback: &FnPtr) {
        let mut state = self.state.borrow_mut();
        if let Some(subs) = state.hooks.get_mut(hook) {
            subs.retain(|s| !(s.owner == owner && s.callback.fn_name() == callback.fn_name()));
            if subs.is_empty() {
                state.hooks.remove(hook);
            }
        }
    }

    /// Dispatch a hook. Callbacks run sequentially in registration order;
    /// each receives the current payload and its return value becomes the
    /// payload for the next. A unit return cancels: `None` is propagated
    /// and the remaining callbacks never run. A callback that errors is
    /// logged and skipped without breaking the chain.
    pub fn trigger(&self, hook: &str, payload: serde_json::Value) -> Option<serde_json::Value> {
        let subs: Vec<HookSubscription> = self
            .state
            .borrow()
            .hooks
            .get(hook)
            .cloned()
            .unwrap_or_default();
        if subs.is_empty() {
            return Some(payload);
        }

        let mut current = match rhai::serde::to_dynamic(&payload) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(hook, error = %e, "hook payload is not representable in scripts");
                return Some(payload);
            }
        };

        for sub in subs {
            let Some(runtime) = self.runtime(&sub.owner) else {
                continue;
            };
            match sub
                .callback
                .call::<Dynamic>(&runtime.engine, &runtime.ast, (current.clone(),))
            {
                Ok(result) if result.is_unit() => return None,
                Ok(result) => current = result,
                Err(e) => {
                    tracing::error!(hook, owner = %sub.owner, error = %e, "hook callback failed");
                }
            }
        }

        match rhai::serde::from_dynamic(&current) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(hook, error = %e, "hook payload no longer JSON-representable");
                Some(payload)
            }
        }
    }
}

fn persist_order(state: &ExtensionState) {
    match serde_json::to_string(&state.order) {
        Ok(text) => state.kv.set(WIDGET_ORDER_KEY, &text),
        Err(e) => tracing::error!(error = %e, "failed to serialize widget order"),
    }
}
