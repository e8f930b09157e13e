//! Sandboxed script execution environment
//!
//! Plugins run inside an embedded rhai engine that starts with no ambient
//! authority at all: no filesystem, no network, no host globals. Anything a
//! plugin can reach arrives through the capability-scoped context object
//! `init` receives, so "sandboxing" here means hardening the engine itself:
//!
//! - `eval` is disabled unconditionally (no code generation from strings,
//!   and no capability un-blocks it)
//! - module imports resolve to nothing, so a script cannot pull code in
//! - an operation budget, call-depth and value-size limits bound runaway
//!   scripts the way fuel and memory limits bound a bytecode sandbox
//!
//! Metadata extraction for the consent flow runs on the same hardened
//! engine with no host API registered and a much smaller budget, so a
//! malicious plugin cannot use side effects during parsing to pre-empt the
//! consent step.

use crate::{validate_plugin_id, PluginError, PluginManifest, PluginResult};
use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Dynamic, Engine, Scope, AST};

/// Execution limits applied to every plugin engine.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Operation budget per entry into the script.
    pub max_operations: u64,
    /// Operation budget while extracting `metadata()`.
    pub metadata_max_operations: u64,
    pub max_call_levels: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
    pub max_expr_depth: usize,
    pub max_function_expr_depth: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_operations: 10_000_000,
            metadata_max_operations: 100_000,
            max_call_levels: 64,
            max_string_size: 500_000,
            max_array_size: 10_000,
            max_map_size: 10_000,
            max_expr_depth: 64,
            max_function_expr_depth: 32,
        }
    }
}

/// Build a hardened engine with no host API registered yet.
pub fn build_engine(config: &SandboxConfig) -> Engine {
    let mut engine = Engine::new();

    engine.set_max_operations(config.max_operations);
    engine.set_max_call_levels(config.max_call_levels);
    engine.set_max_string_size(config.max_string_size);
    engine.set_max_array_size(config.max_array_size);
    engine.set_max_map_size(config.max_map_size);
    engine.set_max_expr_depths(config.max_expr_depth, config.max_function_expr_depth);

    // Blocked unconditionally; no capability un-blocks runtime code
    // synthesis.
    engine.disable_symbol("eval");

    // Scripts cannot import modules.
    engine.set_module_resolver(DummyModuleResolver::new());

    // Route script diagnostics through the host's logging so ordering
    // stays deterministic alongside host messages.
    engine.on_print(|text| tracing::info!(target: "wabi_plugins::script", "{text}"));
    engine.on_debug(|text, source, pos| {
        tracing::debug!(target: "wabi_plugins::script", ?source, ?pos, "{text}");
    });

    engine
}

/// Compile plugin source. Parse failures are validation errors surfaced to
/// the installing user.
pub fn compile(engine: &Engine, source: &str) -> PluginResult<AST> {
    engine
        .compile(source)
        .map_err(|e| PluginError::Validation(format!("plugin source failed to parse: {e}")))
}

fn has_function(ast: &AST, name: &str, arity: usize) -> bool {
    ast.iter_functions()
        .any(|f| f.name == name && f.params.len() == arity)
}

/// A loadable plugin must define `metadata()` and `init(ctx)`.
pub fn ensure_entry_points(ast: &AST) -> PluginResult<()> {
    if !has_function(ast, "metadata", 0) {
        return Err(PluginError::Validation(
            "plugin does not define a metadata() function".into(),
        ));
    }
    if !has_function(ast, "init", 1) {
        return Err(PluginError::Validation(
            "plugin does not define an init(ctx) entry point".into(),
        ));
    }
    Ok(())
}

/// Parse a plugin's declared metadata under full sandbox restrictions.
///
/// The engine used here has no host API registered, so even a hostile
/// `metadata()` can observe nothing and touch nothing, and the tight
/// operation budget bounds its runtime.
pub fn extract_manifest(config: &SandboxConfig, source: &str) -> PluginResult<PluginManifest> {
    let mut engine = build_engine(config);
    engine.set_max_operations(config.metadata_max_operations);

    let ast = compile(&engine, source)?;
    ensure_entry_points(&ast)?;

    let mut scope = Scope::new();
    let meta: Dynamic = engine
        .call_fn(&mut scope, &ast, "metadata", ())
        .map_err(|e| PluginError::Validation(format!("metadata() failed: {e}")))?;

    let manifest: PluginManifest = rhai::serde::from_dynamic(&meta)
        .map_err(|e| PluginError::Validation(format!("invalid plugin metadata: {e}")))?;

    validate_plugin_id(&manifest.id)?;
    Ok(manifest)
}
