//! Plugin registry and lifecycle
//!
//! CRUD over persisted [`PluginRecord`]s plus orchestration of load and
//! unload. Startup loads each enabled plugin sequentially; one plugin's
//! failure is logged and toasted but never stops the rest.

use crate::capability::{newly_requested, Capability};
use crate::consent::{ConsentPrompt, ConsentRequest};
use crate::context::ContextFactory;
use crate::extensions::ExtensionRegistry;
use crate::feed::StoreEntry;
use crate::host::{ChartEngine, DataService, NetworkFetcher, ToastKind, UiHost};
use crate::sandbox::{self, SandboxConfig};
use crate::storage::KeyValueStore;
use crate::{PluginError, PluginManifest, PluginRecord, PluginResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rhai::{Dynamic, Scope};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// Compare dotted-numeric versions segment by segment. Missing trailing
/// segments count as zero, so "1.2" == "1.2.0"; non-numeric segments also
/// count as zero.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |s: &str| -> Vec<u64> {
        s.split('.')
            .map(|seg| seg.trim().parse::<u64>().unwrap_or(0))
            .collect()
    };
    let (va, vb) = (parse(a), parse(b));
    for i in 0..va.len().max(vb.len()) {
        let x = va.get(i).copied().unwrap_or(0);
        let y = vb.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}

/// Persistence for installed plugins, keyed by plugin id.
#[async_trait]
pub trait PluginStore: Send + Sync {
    async fn list(&self) -> PluginResult<Vec<PluginRecord>>;
    async fn get(&self, id: &str) -> PluginResult<Option<PluginRecord>>;
    async fn put(&self, record: &PluginRecord) -> PluginResult<()>;
    async fn delete(&self, id: &str) -> PluginResult<()>;
}

/// In-memory store for tests and ephemeral hosts.
#[derive(Debug, Default)]
pub struct MemoryPluginStore {
    records: Mutex<BTreeMap<String, PluginRecord>>,
}

impl MemoryPluginStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PluginStore for MemoryPluginStore {
    async fn list(&self) -> PluginResult<Vec<PluginRecord>> {
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }

    async fn get(&self, id: &str) -> PluginResult<Option<PluginRecord>> {
        Ok(self.records.lock().unwrap().get(id).cloned())
    }

    async fn put(&self, record: &PluginRecord) -> PluginResult<()> {
        self.records
            .lock()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> PluginResult<()> {
        self.records.lock().unwrap().remove(id);
        Ok(())
    }
}

/// Default plugin database location.
pub fn default_database_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        config_dir.join("wabi-ledger").join("plugins.db")
    } else {
        PathBuf::from("plugins.db")
    }
}

/// SQLite-backed plugin store.
#[derive(Debug, Clone)]
pub struct SqlitePluginStore {
    pool: SqlitePool,
}

impl SqlitePluginStore {
    pub async fn open(path: &Path) -> PluginResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(PluginError::Database)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory database, useful for testing.
    pub async fn in_memory() -> PluginResult<Self> {
        let options =
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(PluginError::Database)?;
        let pool = SqlitePoolOptions::new()
            // In-memory databases exist per-connection.
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> PluginResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS plugins (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                version TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                author TEXT NOT NULL DEFAULT '',
                icon TEXT NOT NULL DEFAULT '',
                permissions TEXT NOT NULL,
                source TEXT NOT NULL,
                enabled INTEGER NOT NULL,
                installed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> PluginResult<PluginRecord> {
        let permissions: String = row.try_get("permissions")?;
        let permissions: BTreeSet<Capability> = serde_json::from_str(&permissions)
            .map_err(|e| PluginError::Validation(format!("corrupt permissions column: {e}")))?;
        let installed_at: String = row.try_get("installed_at")?;
        let installed_at = DateTime::parse_from_rfc3339(&installed_at)
            .map_err(|e| PluginError::Validation(format!("corrupt installed_at column: {e}")))?
            .with_timezone(&Utc);
        Ok(PluginRecord {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            version: row.try_get("version")?,
            description: row.try_get("description")?,
            author: row.try_get("author")?,
            icon: row.try_get("icon")?,
            permissions,
            source: row.try_get("source")?,
            enabled: row.try_get::<i64, _>("enabled")? != 0,
            installed_at,
        })
    }
}

#[async_trait]
impl PluginStore for SqlitePluginStore {
    async fn list(&self) -> PluginResult<Vec<PluginRecord>> {
        let rows = sqlx::query("SELECT * FROM plugins ORDER BY installed_at, id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn get(&self, id: &str) -> PluginResult<Option<PluginRecord>> {
        let row = sqlx::query("SELECT * FROM plugins WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn put(&self, record: &PluginRecord) -> PluginResult<()> {
        let permissions = serde_json::to_string(&record.permissions)
            .map_err(|e| PluginError::Validation(format!("unserializable permissions: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO plugins
                (id, name, version, description, author, icon, permissions, source, enabled, installed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                version = excluded.version,
                description = excluded.description,
                author = excluded.author,
                icon = excluded.icon,
                permissions = excluded.permissions,
                source = excluded.source,
                enabled = excluded.enabled,
                installed_at = excluded.installed_at
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.version)
        .bind(&record.description)
        .bind(&record.author)
        .bind(&record.icon)
        .bind(permissions)
        .bind(&record.source)
        .bind(record.enabled as i64)
        .bind(record.installed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> PluginResult<()> {
        sqlx::query("DELETE FROM plugins WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Host-side collaborators the plugin host mediates access to.
pub struct HostServices {
    pub kv: Arc<dyn KeyValueStore>,
    pub ui: Arc<dyn UiHost>,
    pub data: Arc<dyn DataService>,
    pub net: Arc<dyn NetworkFetcher>,
    pub charts: Arc<dyn ChartEngine>,
    pub consent: Arc<dyn ConsentPrompt>,
}

/// The plugin host: owns the registry, the sandbox configuration and every
/// running plugin instance. Lives on the host UI thread; plugin state is
/// deliberately not `Send`.
pub struct PluginHost {
    store: Arc<dyn PluginStore>,
    ui: Arc<dyn UiHost>,
    consent: Arc<dyn ConsentPrompt>,
    factory: ContextFactory,
    extensions: ExtensionRegistry,
    config: SandboxConfig,
}

impl PluginHost {
    pub fn new(store: Arc<dyn PluginStore>, services: HostServices) -> Self {
        let extensions = ExtensionRegistry::new(services.kv.clone());
        let factory = ContextFactory::new(
            services.kv,
            services.data,
            services.ui.clone(),
            services.net,
            services.charts,
            extensions.clone(),
        );
        Self {
            store,
            ui: services.ui,
            consent: services.consent,
            factory,
            extensions,
            config: SandboxConfig::default(),
        }
    }

    pub fn with_sandbox_config(mut self, config: SandboxConfig) -> Self {
        self.config = config;
        self
    }

    /// Extension registry handle for the host's router and home screen.
    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    pub async fn installed(&self) -> PluginResult<Vec<PluginRecord>> {
        self.store.list().await
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.extensions.is_running(id)
    }

    /// Load every enabled plugin, sequentially so diagnostics stay ordered
    /// and one failure cannot interfere with the next load. Returns the
    /// number of plugins that came up.
    pub async fn load_all(&self) -> PluginResult<usize> {
        let records = self.store.list().await?;
        let mut loaded = 0;
        for record in records.iter().filter(|r| r.enabled) {
            match self.instantiate(record) {
                Ok(()) => loaded += 1,
                Err(e) => {
                    tracing::error!(plugin = %record.id, error = %e, "plugin failed to load");
                    self.ui.show_toast(
                        &format!("Plugin '{}' failed to load", record.name),
                        ToastKind::Error,
                    );
                }
            }
        }
        Ok(loaded)
    }

    /// Install a plugin from source text. The declared permission set comes
    /// from the store feed entry when one is available, otherwise from the
    /// plugin's own sandbox-parsed metadata; either way nothing is
    /// persisted and nothing runs unless the user approves.
    pub async fn install(
        &self,
        source: &str,
        store_entry: Option<&StoreEntry>,
    ) -> PluginResult<PluginRecord> {
        let manifest = sandbox::extract_manifest(&self.config, source)?;
        let declared = declared_set(&manifest, store_entry);

        let request = ConsentRequest::install(&manifest, &declared);
        if !self.consent.request(&request).await {
            return Err(PluginError::ConsentDeclined);
        }

        let record = PluginRecord::from_manifest(&manifest, declared, source);
        self.store.put(&record).await?;
        self.instantiate(&record)?;
        tracing::info!(plugin = %record.id, version = %record.version, "plugin installed");
        Ok(record)
    }

    /// Apply an update. An update that requests no capability beyond the
    /// consented set proceeds silently; otherwise the user is asked about
    /// exactly the newly-requested capabilities, and declining leaves the
    /// installed version running unchanged.
    pub async fn update(
        &self,
        id: &str,
        source: &str,
        store_entry: Option<&StoreEntry>,
    ) -> PluginResult<PluginRecord> {
        let existing = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| PluginError::NotFound(id.to_string()))?;

        let manifest = sandbox::extract_manifest(&self.config, source)?;
        if manifest.id != id {
            return Err(PluginError::Validation(format!(
                "update source declares id '{}' but '{id}' is being updated",
                manifest.id
            )));
        }

        let declared = declared_set(&manifest, store_entry);
        let diff = newly_requested(&declared, &existing.permissions);
        if !diff.is_empty() {
            let request = ConsentRequest::update(&manifest, &diff);
            if !self.consent.request(&request).await {
                return Err(PluginError::ConsentDeclined);
            }
        }

        let record = PluginRecord {
            permissions: declared,
            source: source.to_string(),
            enabled: existing.enabled,
            installed_at: existing.installed_at,
            ..PluginRecord::from_manifest(&manifest, BTreeSet::new(), source)
        };
        self.store.put(&record).await?;

        self.extensions.unload(id);
        if record.enabled {
            self.instantiate(&record)?;
        }
        tracing::info!(plugin = %record.id, version = %record.version, "plugin updated");
        Ok(record)
    }

    /// Remove the record and drop the running instance. The plugin's
    /// storage namespace is intentionally kept; reinstalling resumes with
    /// the old data.
    pub async fn uninstall(&self, id: &str) -> PluginResult<()> {
        if self.store.get(id).await?.is_none() {
            return Err(PluginError::NotFound(id.to_string()));
        }
        self.store.delete(id).await?;
        self.extensions.unload(id);
        tracing::info!(plugin = %id, "plugin uninstalled");
        Ok(())
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> PluginResult<()> {
        let mut record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| PluginError::NotFound(id.to_string()))?;
        if record.enabled == enabled {
            return Ok(());
        }
        record.enabled = enabled;
        self.store.put(&record).await?;
        if enabled {
            self.instantiate(&record)?;
        } else {
            self.extensions.unload(id);
        }
        Ok(())
    }

    /// Compile the stored source in a fresh hardened engine, build the
    /// capability-scoped context from the *consented* set, and run `init`.
    fn instantiate(&self, record: &PluginRecord) -> PluginResult<()> {
        if self.extensions.is_running(&record.id) {
            self.extensions.unload(&record.id);
        }

        let mut engine = sandbox::build_engine(&self.config);
        ContextFactory::install_api(&mut engine);

        let ast = sandbox::compile(&engine, &record.source)?;
        sandbox::ensure_entry_points(&ast)?;

        let context = self.factory.build(&record.id, &record.permissions)?;

        let engine = Rc::new(engine);
        let ast = Rc::new(ast);
        // Registered before init runs so callbacks a plugin wires up during
        // init are dispatchable immediately.
        self.extensions
            .insert_runtime(&record.id, engine.clone(), ast.clone());

        let mut scope = Scope::new();
        match engine.call_fn::<Dynamic>(&mut scope, &ast, "init", (context,)) {
            Ok(_) => {
                tracing::info!(plugin = %record.id, "plugin loaded");
                Ok(())
            }
            Err(e) => {
                // Sweep anything a partially-initialized plugin registered.
                self.extensions.unload(&record.id);
                Err(PluginError::Load {
                    plugin: record.id.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn declared_set(manifest: &PluginManifest, store_entry: Option<&StoreEntry>) -> BTreeSet<Capability> {
    match store_entry {
        Some(entry) => entry.permissions.clone(),
        None => manifest.permissions.clone(),
    }
}
