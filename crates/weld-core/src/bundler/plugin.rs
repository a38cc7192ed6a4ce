//! Plugin system for the bundler.
//!
//! Plugins register `on_start`, `on_resolve` and `on_load` hooks from `setup`.
//! Every `setup` runs before any hook does. Resolve and load hooks are tried in
//! registration order: the first resolve hook returning a result decides the
//! module's key, while a load hook returning `None` falls through to the next
//! matching hook and finally to the filesystem.
//!
//! ## Example
//!
//! ```ignore
//! use weld_core::{HookFilter, OnLoadResult, Plugin, PluginBuild, PluginError, Loader};
//!
//! struct TxtPlugin;
//!
//! impl Plugin for TxtPlugin {
//!     fn name(&self) -> &str { "txt" }
//!
//!     fn setup(&self, build: &mut PluginBuild<'_>) -> Result<(), PluginError> {
//!         build.on_load(HookFilter::new(r"\.txt$")?, |args| async move {
//!             let text = std::fs::read_to_string(&args.path).map_err(|e| e.to_string())?;
//!             Ok(Some(OnLoadResult::contents(text).loader(Loader::Text)))
//!         });
//!         Ok(())
//!     }
//! }
//! ```

#![allow(clippy::type_complexity)]

use super::defer::{Defer, DeferBarrier};
use crate::config::BuildConfig;
use crate::error::BundleError;
use crate::parse::{ImportKind, Loader};
use crate::resolver::{Resolution, ResolveRequest, Resolver};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use regex_lite::Regex;
use rustc_hash::FxHashMap as HashMap;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

/// Result type for plugin hooks.
pub type HookResult<T> = Result<T, PluginError>;

/// Error from a plugin.
///
/// Hooks usually build one from a message (`"boom".into()`); the pipeline fills
/// in the plugin name and hook before reporting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginError {
    /// Plugin name that caused the error.
    pub plugin: String,
    /// Hook that failed.
    pub hook: &'static str,
    /// Error message, reported verbatim.
    pub message: String,
}

impl PluginError {
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            plugin: String::new(),
            hook: "",
            message: message.into(),
        }
    }

    fn attribute(mut self, plugin: &str, hook: &'static str) -> Self {
        if self.plugin.is_empty() {
            self.plugin = plugin.to_string();
        }
        if self.hook.is_empty() {
            self.hook = hook;
        }
        self
    }

    fn into_bundle_error(self, path: Option<String>) -> BundleError {
        BundleError::Plugin {
            plugin: self.plugin,
            hook: self.hook,
            message: self.message,
            path,
        }
    }
}

impl std::fmt::Display for PluginError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.plugin, self.hook, self.message)
    }
}

impl std::error::Error for PluginError {}

impl From<String> for PluginError {
    fn from(message: String) -> Self {
        Self::msg(message)
    }
}

impl From<&str> for PluginError {
    fn from(message: &str) -> Self {
        Self::msg(message)
    }
}

/// Which paths and namespaces a hook applies to.
#[derive(Debug, Clone)]
pub struct HookFilter {
    filter: Regex,
    namespace: Option<String>,
}

impl HookFilter {
    pub fn new(pattern: &str) -> HookResult<Self> {
        let filter = Regex::new(pattern)
            .map_err(|e| PluginError::msg(format!("Invalid filter \"{pattern}\": {e}")))?;
        Ok(Self {
            filter,
            namespace: None,
        })
    }

    /// Only match inside `namespace`.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub fn matches(&self, path: &str, namespace: &str) -> bool {
        self.namespace.as_deref().map_or(true, |ns| ns == namespace) && self.filter.is_match(path)
    }
}

/// Arguments to an `on_resolve` hook.
#[derive(Debug, Clone)]
pub struct OnResolveArgs {
    /// The specifier as written.
    pub path: String,
    /// Importing module's path; empty for entry points.
    pub importer: String,
    /// Importing module's namespace.
    pub namespace: String,
    pub kind: ImportKind,
    pub resolve_dir: PathBuf,
    /// Import attributes (`with { type: "json" }`).
    pub with: BTreeMap<String, String>,
}

/// What an `on_resolve` hook decided. Final: it is never resolved again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnResolveResult {
    pub path: String,
    /// Defaults to `"file"`.
    pub namespace: Option<String>,
    pub external: bool,
}

impl OnResolveResult {
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            namespace: None,
            external: false,
        }
    }

    pub fn external(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            namespace: None,
            external: true,
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// Arguments to an `on_load` hook.
#[derive(Debug, Clone)]
pub struct OnLoadArgs {
    pub path: String,
    pub namespace: String,
    defer: Defer,
}

impl OnLoadArgs {
    /// Suspend this load until every other pending load has settled.
    ///
    /// May be called once per invocation; a second call fails with
    /// `Can't call .defer() more than once within an onLoad plugin`.
    pub fn defer(&self) -> impl Future<Output = HookResult<()>> + Send + 'static {
        self.defer.defer()
    }
}

/// Module contents supplied by an `on_load` hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnLoadResult {
    pub contents: String,
    /// Inferred from the path's extension when `None`.
    pub loader: Option<Loader>,
    /// Where the module's own imports resolve from.
    pub resolve_dir: Option<PathBuf>,
}

impl OnLoadResult {
    pub fn contents(contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
            loader: None,
            resolve_dir: None,
        }
    }

    pub fn loader(mut self, loader: Loader) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn resolve_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.resolve_dir = Some(dir.into());
        self
    }
}

type StartCallback = Arc<dyn Fn() -> BoxFuture<'static, HookResult<()>> + Send + Sync>;
type ResolveCallback = Arc<
    dyn Fn(OnResolveArgs) -> BoxFuture<'static, HookResult<Option<OnResolveResult>>>
        + Send
        + Sync,
>;
type LoadCallback =
    Arc<dyn Fn(OnLoadArgs) -> BoxFuture<'static, HookResult<Option<OnLoadResult>>> + Send + Sync>;

struct StartHook {
    plugin: String,
    callback: StartCallback,
}

struct ResolveHook {
    plugin: String,
    filter: HookFilter,
    callback: ResolveCallback,
}

struct LoadHook {
    plugin: String,
    filter: HookFilter,
    callback: LoadCallback,
}

/// A bundler plugin.
pub trait Plugin: Send + Sync {
    /// Plugin name for debugging and error messages.
    fn name(&self) -> &str;

    /// Register hooks. Runs once per build, before any hook is invoked.
    fn setup(&self, build: &mut PluginBuild<'_>) -> HookResult<()>;
}

/// Registration handle passed to [`Plugin::setup`].
pub struct PluginBuild<'a> {
    plugin: String,
    config: &'a BuildConfig,
    resolver: &'a Arc<Resolver>,
    pipeline: &'a mut PluginPipeline,
}

impl PluginBuild<'_> {
    #[must_use]
    pub fn config(&self) -> &BuildConfig {
        self.config
    }

    /// The build's resolver, for hooks that rewrite a specifier and resolve it themselves.
    #[must_use]
    pub fn resolver(&self) -> Arc<Resolver> {
        Arc::clone(self.resolver)
    }

    pub fn on_start<F, Fut>(&mut self, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult<()>> + Send + 'static,
    {
        self.pipeline.start.push(StartHook {
            plugin: self.plugin.clone(),
            callback: Arc::new(move || callback().boxed()),
        });
    }

    pub fn on_resolve<F, Fut>(&mut self, filter: HookFilter, callback: F)
    where
        F: Fn(OnResolveArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult<Option<OnResolveResult>>> + Send + 'static,
    {
        self.pipeline.resolve.push(ResolveHook {
            plugin: self.plugin.clone(),
            filter,
            callback: Arc::new(move |args| callback(args).boxed()),
        });
    }

    pub fn on_load<F, Fut>(&mut self, filter: HookFilter, callback: F)
    where
        F: Fn(OnLoadArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult<Option<OnLoadResult>>> + Send + 'static,
    {
        self.pipeline.load.push(LoadHook {
            plugin: self.plugin.clone(),
            filter,
            callback: Arc::new(move |args| callback(args).boxed()),
        });
    }
}

/// Registered hooks of every plugin, in registration order.
#[derive(Default)]
pub(crate) struct PluginPipeline {
    start: Vec<StartHook>,
    resolve: Vec<ResolveHook>,
    load: Vec<LoadHook>,
}

impl PluginPipeline {
    /// Run every plugin's `setup`. Hooks only run after all of them returned.
    pub(crate) fn setup(
        plugins: &[Arc<dyn Plugin>],
        config: &BuildConfig,
        resolver: &Arc<Resolver>,
    ) -> Result<Self, BundleError> {
        let mut pipeline = Self::default();
        for plugin in plugins {
            let mut build = PluginBuild {
                plugin: plugin.name().to_string(),
                config,
                resolver,
                pipeline: &mut pipeline,
            };
            plugin
                .setup(&mut build)
                .map_err(|e| e.attribute(plugin.name(), "setup").into_bundle_error(None))?;
        }
        debug!(
            plugins = plugins.len(),
            start = pipeline.start.len(),
            resolve = pipeline.resolve.len(),
            load = pipeline.load.len(),
            "plugins set up"
        );
        Ok(pipeline)
    }

    /// Start every `on_start` hook in order and wait for all of them.
    pub(crate) async fn run_start(&self) -> Result<(), BundleError> {
        let pending = self.start.iter().map(|hook| (hook.callback)());
        let results = join_all(pending).await;
        for (hook, result) in self.start.iter().zip(results) {
            result.map_err(|e| e.attribute(&hook.plugin, "onStart").into_bundle_error(None))?;
        }
        Ok(())
    }

    /// First matching hook with a result wins. `attribute` names the importer for errors.
    pub(crate) async fn resolve(
        &self,
        args: &OnResolveArgs,
        attribute: Option<&str>,
    ) -> Result<Option<OnResolveResult>, BundleError> {
        for hook in &self.resolve {
            if !hook.filter.matches(&args.path, &args.namespace) {
                continue;
            }
            trace!(plugin = %hook.plugin, path = %args.path, "onResolve");
            match (hook.callback)(args.clone()).await {
                Ok(Some(result)) => {
                    debug!(plugin = %hook.plugin, path = %args.path, resolved = %result.path, "plugin resolved");
                    return Ok(Some(result));
                }
                Ok(None) => {}
                Err(e) => {
                    return Err(e
                        .attribute(&hook.plugin, "onResolve")
                        .into_bundle_error(attribute.map(str::to_string)))
                }
            }
        }
        Ok(None)
    }

    /// Matching load hooks in order; `None` from one falls through to the next.
    pub(crate) async fn load(
        &self,
        path: &str,
        namespace: &str,
        barrier: &Arc<DeferBarrier>,
        attribute: &str,
    ) -> Result<Option<OnLoadResult>, BundleError> {
        for hook in &self.load {
            if !hook.filter.matches(path, namespace) {
                continue;
            }
            trace!(plugin = %hook.plugin, path, namespace, "onLoad");
            // Each invocation gets its own defer counter.
            let defer = Defer::new(Arc::clone(barrier));
            let args = OnLoadArgs {
                path: path.to_string(),
                namespace: namespace.to_string(),
                defer: defer.clone(),
            };
            let result = (hook.callback)(args).await;
            if defer.misused() {
                return Err(BundleError::DeferMisuse {
                    path: attribute.to_string(),
                });
            }
            match result {
                Ok(Some(loaded)) => return Ok(Some(loaded)),
                Ok(None) => {}
                Err(e) => {
                    return Err(e
                        .attribute(&hook.plugin, "onLoad")
                        .into_bundle_error(Some(attribute.to_string())))
                }
            }
        }
        Ok(None)
    }
}

fn resolution_to_result(resolution: Resolution) -> OnResolveResult {
    match resolution {
        Resolution::File(path) => OnResolveResult::path(path.display().to_string()),
        Resolution::External(spec) => OnResolveResult::external(spec),
        Resolution::Empty(name) => OnResolveResult::path(name).namespace("empty"),
    }
}

/// Plugin that handles import aliases.
///
/// Maps `@/components` to `./src/components`. Path targets are taken relative to
/// the build's `cwd`; the rewritten specifier then goes through the resolver.
#[derive(Debug, Clone, Default)]
pub struct AliasPlugin {
    aliases: Vec<(String, String)>,
}

impl AliasPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alias(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.aliases.push((from.into(), to.into()));
        self
    }

    /// The rewritten specifier, if an alias applies.
    #[must_use]
    pub fn rewrite(&self, specifier: &str) -> Option<String> {
        self.aliases.iter().find_map(|(from, to)| {
            if specifier == from {
                return Some(to.clone());
            }
            specifier
                .strip_prefix(from.as_str())
                .filter(|rest| rest.starts_with('/'))
                .map(|rest| format!("{to}{rest}"))
        })
    }
}

impl Plugin for AliasPlugin {
    fn name(&self) -> &str {
        "alias"
    }

    fn setup(&self, build: &mut PluginBuild<'_>) -> HookResult<()> {
        if self.aliases.is_empty() {
            return Ok(());
        }
        let pattern = self
            .aliases
            .iter()
            .map(|(from, _)| format!("{}(?:/|$)", regex_lite::escape(from)))
            .collect::<Vec<_>>()
            .join("|");
        let filter = HookFilter::new(&format!("^(?:{pattern})"))?;
        let aliases = Arc::new(self.clone());
        let resolver = build.resolver();
        let cwd = build.config().cwd.clone();

        build.on_resolve(filter, move |args| {
            let aliases = Arc::clone(&aliases);
            let resolver = Arc::clone(&resolver);
            let cwd = cwd.clone();
            async move {
                let Some(rewritten) = aliases.rewrite(&args.path) else {
                    return Ok(None);
                };
                let base: &Path = if rewritten.starts_with("./") || rewritten.starts_with("../") {
                    &cwd
                } else {
                    &args.resolve_dir
                };
                let request = ResolveRequest::new(&rewritten, base, args.kind);
                let resolution = resolver
                    .resolve(&request)
                    .map_err(|e| PluginError::msg(e.message))?;
                Ok(Some(resolution_to_result(resolution)))
            }
        });
        Ok(())
    }
}

/// Plugin that serves in-memory modules from the `virtual` namespace.
///
/// `import "virtual:config"` and `import "config"` both reach a module
/// registered as `config`. Their own imports resolve from the build's `cwd`.
#[derive(Debug, Clone, Default)]
pub struct VirtualPlugin {
    modules: HashMap<String, String>,
}

impl VirtualPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(mut self, id: impl Into<String>, code: impl Into<String>) -> Self {
        self.modules.insert(id.into(), code.into());
        self
    }
}

impl Plugin for VirtualPlugin {
    fn name(&self) -> &str {
        "virtual"
    }

    fn setup(&self, build: &mut PluginBuild<'_>) -> HookResult<()> {
        if self.modules.is_empty() {
            return Ok(());
        }
        let mut ids: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        ids.sort_unstable();
        let alternatives = ids
            .iter()
            .map(|id| regex_lite::escape(id))
            .collect::<Vec<_>>()
            .join("|");
        let filter = HookFilter::new(&format!("^(?:virtual:)?(?:{alternatives})$"))?;

        build.on_resolve(filter, |args| async move {
            let id = args.path.strip_prefix("virtual:").unwrap_or(&args.path);
            Ok(Some(OnResolveResult::path(id).namespace("virtual")))
        });

        let modules = Arc::new(self.modules.clone());
        let cwd = build.config().cwd.clone();
        build.on_load(HookFilter::new(".*")?.namespace("virtual"), move |args| {
            let modules = Arc::clone(&modules);
            let cwd = cwd.clone();
            async move {
                let Some(code) = modules.get(&args.path) else {
                    return Ok(None);
                };
                let loader = Path::new(&args.path)
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .and_then(Loader::from_extension)
                    .unwrap_or(Loader::Js);
                Ok(Some(
                    OnLoadResult::contents(code.clone())
                        .loader(loader)
                        .resolve_dir(cwd),
                ))
            }
        });
        Ok(())
    }
}
