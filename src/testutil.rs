//! Shared test fixtures: recording host collaborators and script helpers.

use crate::consent::{ConsentPrompt, ConsentRequest};
use crate::context::{ContextFactory, PluginContext};
use crate::domain::{
    Account, Category, Contact, Debt, NewContact, NewDebt, NewRecord, TxRecord,
};
use crate::extensions::ExtensionRegistry;
use crate::host::{ChartEngine, DataService, NetworkFetcher, ToastKind, UiHost};
use crate::registry::{HostServices, MemoryPluginStore, PluginHost};
use crate::sandbox::{self, SandboxConfig};
use crate::storage::MemoryKvStore;
use crate::PluginResult;
use async_trait::async_trait;
use rhai::{Dynamic, EvalAltResult, Scope};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct RecordingUi {
    pub toasts: Mutex<Vec<(String, ToastKind)>>,
    pub navigations: Mutex<Vec<String>>,
    pub alerts: Mutex<Vec<String>>,
    pub prefills: Mutex<Vec<serde_json::Value>>,
}

impl UiHost for RecordingUi {
    fn show_toast(&self, message: &str, kind: ToastKind) {
        self.toasts.lock().unwrap().push((message.to_string(), kind));
    }

    fn navigate(&self, route: &str) {
        self.navigations.lock().unwrap().push(route.to_string());
    }

    fn confirm(&self, _message: &str) -> bool {
        true
    }

    fn alert(&self, message: &str) {
        self.alerts.lock().unwrap().push(message.to_string());
    }

    fn open_add_transaction(&self, prefill: serde_json::Value) {
        self.prefills.lock().unwrap().push(prefill);
    }
}

#[derive(Default)]
pub struct FakeData {
    pub added_records: Mutex<Vec<NewRecord>>,
    pub added_debts: Mutex<Vec<NewDebt>>,
    pub added_contacts: Mutex<Vec<NewContact>>,
}

impl DataService for FakeData {
    fn records(&self) -> PluginResult<Vec<TxRecord>> {
        Ok(vec![TxRecord {
            id: 1,
            kind: "expense".into(),
            amount: 120.0,
            category: "food".into(),
            account: "cash".into(),
            note: "lunch".into(),
            date: "2026-08-30".into(),
        }])
    }

    fn debts(&self) -> PluginResult<Vec<Debt>> {
        Ok(Vec::new())
    }

    fn contacts(&self) -> PluginResult<Vec<Contact>> {
        Ok(vec![Contact {
            id: 1,
            name: "Aki".into(),
        }])
    }

    fn accounts(&self) -> PluginResult<Vec<Account>> {
        Ok(vec![Account {
            id: 1,
            name: "cash".into(),
            balance: 880.0,
        }])
    }

    fn categories(&self) -> PluginResult<Vec<Category>> {
        Ok(vec![Category {
            key: "food".into(),
            kind: "expense".into(),
            name: "Food".into(),
            icon: "fa-bowl-rice".into(),
        }])
    }

    fn add_record(&self, record: NewRecord) -> PluginResult<i64> {
        let mut added = self.added_records.lock().unwrap();
        added.push(record);
        Ok(added.len() as i64)
    }

    fn add_debt(&self, debt: NewDebt) -> PluginResult<i64> {
        let mut added = self.added_debts.lock().unwrap();
        added.push(debt);
        Ok(added.len() as i64)
    }

    fn add_contact(&self, contact: NewContact) -> PluginResult<i64> {
        let mut added = self.added_contacts.lock().unwrap();
        added.push(contact);
        Ok(added.len() as i64)
    }
}

#[derive(Default)]
pub struct FakeNet {
    pub requests: Mutex<Vec<String>>,
}

impl NetworkFetcher for FakeNet {
    fn get(&self, url: &str) -> PluginResult<String> {
        self.requests.lock().unwrap().push(url.to_string());
        Ok("pong".to_string())
    }
}

pub struct FakeCharts;

impl ChartEngine for FakeCharts {
    fn render(&self, _spec: &serde_json::Value) -> PluginResult<String> {
        Ok("<svg class=\"chart\"></svg>".to_string())
    }
}

pub struct StaticConsent {
    approve: Mutex<bool>,
    pub requests: Mutex<Vec<ConsentRequest>>,
}

impl StaticConsent {
    pub fn new(approve: bool) -> Self {
        Self {
            approve: Mutex::new(approve),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_approve(&self, approve: bool) {
        *self.approve.lock().unwrap() = approve;
    }
}

#[async_trait]
impl ConsentPrompt for StaticConsent {
    async fn request(&self, request: &ConsentRequest) -> bool {
        self.requests.lock().unwrap().push(request.clone());
        *self.approve.lock().unwrap()
    }
}

/// Full host fixture over in-memory stores.
pub struct Harness {
    pub host: PluginHost,
    pub store: Arc<MemoryPluginStore>,
    pub kv: Arc<MemoryKvStore>,
    pub ui: Arc<RecordingUi>,
    pub data: Arc<FakeData>,
    pub net: Arc<FakeNet>,
    pub consent: Arc<StaticConsent>,
}

pub fn harness(approve: bool) -> Harness {
    let store = Arc::new(MemoryPluginStore::new());
    let kv = Arc::new(MemoryKvStore::new());
    let ui = Arc::new(RecordingUi::default());
    let data = Arc::new(FakeData::default());
    let net = Arc::new(FakeNet::default());
    let consent = Arc::new(StaticConsent::new(approve));
    let services = HostServices {
        kv: kv.clone(),
        ui: ui.clone(),
        data: data.clone(),
        net: net.clone(),
        charts: Arc::new(FakeCharts),
        consent: consent.clone(),
    };
    Harness {
        host: PluginHost::new(store.clone(), services),
        store,
        kv,
        ui,
        data,
        net,
        consent,
    }
}

/// Plugin source with the given id, declared permissions (wire form, e.g.
/// `"storage", "ui"`) and init body.
pub fn plugin_src(id: &str, permissions: &str, init_body: &str) -> String {
    plugin_src_v(id, "1.0", permissions, init_body)
}

pub fn plugin_src_v(id: &str, version: &str, permissions: &str, init_body: &str) -> String {
    format!(
        r#"
fn metadata() {{
    #{{
        id: "{id}",
        name: "Test Plugin",
        version: "{version}",
        description: "a test plugin",
        author: "tests",
        icon: "fa-flask",
        permissions: [{permissions}]
    }}
}}

fn init(ctx) {{
    {init_body}
}}
"#
    )
}

/// Context-level fixture: a factory and an engine with the full API
/// registered, without going through the registry.
pub struct ContextFixture {
    pub kv: Arc<MemoryKvStore>,
    pub ui: Arc<RecordingUi>,
    pub data: Arc<FakeData>,
    pub net: Arc<FakeNet>,
    pub extensions: ExtensionRegistry,
    pub factory: ContextFactory,
}

pub fn context_fixture() -> ContextFixture {
    context_fixture_with_kv(Arc::new(MemoryKvStore::new()))
}

/// Same as [`context_fixture`] but over a pre-seeded settings store.
pub fn context_fixture_with_kv(kv: Arc<MemoryKvStore>) -> ContextFixture {
    let ui = Arc::new(RecordingUi::default());
    let data = Arc::new(FakeData::default());
    let net = Arc::new(FakeNet::default());
    let extensions = ExtensionRegistry::new(kv.clone());
    let factory = ContextFactory::new(
        kv.clone(),
        data.clone(),
        ui.clone(),
        net.clone(),
        Arc::new(FakeCharts),
        extensions.clone(),
    );
    ContextFixture {
        kv,
        ui,
        data,
        net,
        extensions,
        factory,
    }
}

impl ContextFixture {
    /// Run `body` as a plugin's init with the given consented capability
    /// set (wire forms). The plugin id is `test.plugin`.
    pub fn run(&self, caps: &[&str], body: &str) -> Result<Dynamic, Box<EvalAltResult>> {
        self.run_as("test.plugin", caps, body)
    }

    pub fn run_as(
        &self,
        plugin_id: &str,
        caps: &[&str],
        body: &str,
    ) -> Result<Dynamic, Box<EvalAltResult>> {
        let granted = caps
            .iter()
            .map(|c| c.parse().expect("capability wire form"))
            .collect();
        let mut engine = sandbox::build_engine(&SandboxConfig::default());
        ContextFactory::install_api(&mut engine);
        let source = format!("fn init(ctx) {{\n{body}\n}}");
        let ast = engine.compile(&source).expect("test script parses");
        let context: PluginContext = self
            .factory
            .build(plugin_id, &granted)
            .expect("context builds");
        let engine = Rc::new(engine);
        let ast = Rc::new(ast);
        self.extensions
            .insert_runtime(plugin_id, engine.clone(), ast.clone());
        let mut scope = Scope::new();
        engine.call_fn::<Dynamic>(&mut scope, &ast, "init", (context,))
    }
}
