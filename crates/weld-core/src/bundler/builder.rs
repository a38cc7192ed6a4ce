//! Module graph construction.
//!
//! Entries are resolved first, one by one; a failure there aborts the build. Then
//! every newly discovered module is loaded on its own task: plugin `onLoad` hooks
//! or the filesystem, define substitution, parsing, classification, and
//! resolution of its imports. Each module key is loaded at most once and each
//! distinct resolve request is answered at most once, however many importers
//! ask. Errors from individual modules are collected and reported together.

use super::defer::DeferBarrier;
use super::graph::{ImportRecord, ModuleGraph, ModuleKey, ModuleRecord, ModuleType};
use super::plugin::{OnResolveArgs, OnResolveResult, PluginPipeline};
use crate::config::BuildConfig;
use crate::error::{codes, BuildFailure, BundleError, Warning};
use crate::parse::{apply_defines, ImportKind, ImportSite, Loader, ModuleAst, ModuleParser};
use crate::resolver::{PackageType, Resolution, ResolveError, ResolveRequest, Resolver};
use futures::future::join_all;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};
use weld_util::fs::read_to_string_lossy;
use weld_util::path::{normalize, relative_slash};

/// Namespace for modules replaced by nothing (disabled by `browser`, stubbed builtins).
pub const EMPTY_NAMESPACE: &str = "empty";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ResolveKey {
    specifier: String,
    resolve_dir: PathBuf,
    namespace: String,
    kind: ImportKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Module(ModuleKey),
    External(String),
}

type ResolveOutcome = Result<Target, BundleError>;

/// Per-build state shared by every load task.
pub(crate) struct BuildContext {
    pub(crate) config: Arc<BuildConfig>,
    pub(crate) resolver: Arc<Resolver>,
    pub(crate) pipeline: Arc<PluginPipeline>,
    pub(crate) parser: Arc<dyn ModuleParser>,
    pub(crate) barrier: Arc<DeferBarrier>,
    resolve_cache: Mutex<HashMap<ResolveKey, Arc<OnceCell<ResolveOutcome>>>>,
}

/// A module fresh off its load task, before ids are final.
struct LoadedModule {
    key: ModuleKey,
    source: String,
    loader: Loader,
    ast: ModuleAst,
    module_type: ModuleType,
    node_esm: bool,
    has_side_effects: bool,
    resolve_dir: PathBuf,
    records: Vec<(ImportSite, Option<Target>)>,
}

struct TaskOutput {
    key: ModuleKey,
    module: Option<LoadedModule>,
    errors: Vec<BundleError>,
    warnings: Vec<Warning>,
}

/// A built graph plus the warnings collected on the way.
pub(crate) struct GraphOutput {
    pub(crate) graph: ModuleGraph,
    pub(crate) warnings: Vec<Warning>,
}

impl BuildContext {
    pub(crate) fn new(
        config: Arc<BuildConfig>,
        resolver: Arc<Resolver>,
        pipeline: Arc<PluginPipeline>,
        parser: Arc<dyn ModuleParser>,
    ) -> Self {
        Self {
            config,
            resolver,
            pipeline,
            parser,
            barrier: Arc::new(DeferBarrier::new()),
            resolve_cache: Mutex::new(HashMap::default()),
        }
    }

    /// Load the whole graph reachable from the configured entry points.
    pub(crate) async fn build_graph(self: Arc<Self>) -> Result<GraphOutput, BuildFailure> {
        let mut entries: Vec<ModuleKey> = Vec::new();
        for spec in &self.config.entry_points {
            let key = self.resolve_entry(spec).await.map_err(|e| {
                BuildFailure::new(vec![e], self.resolver.take_warnings())
            })?;
            if !entries.contains(&key) {
                entries.push(key);
            }
        }
        debug!(entries = entries.len(), "entry points resolved");

        let mut seen: HashSet<ModuleKey> = HashSet::default();
        let mut tasks = JoinSet::new();
        for key in &entries {
            seen.insert(key.clone());
            self.spawn_load(&mut tasks, key.clone());
        }

        let mut loaded: HashMap<ModuleKey, LoadedModule> = HashMap::default();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let output = match joined {
                Ok(output) => output,
                Err(e) => {
                    errors.push(BundleError::Load {
                        path: String::new(),
                        message: format!("load task failed: {e}"),
                    });
                    self.barrier.exit();
                    continue;
                }
            };
            errors.extend(output.errors);
            warnings.extend(output.warnings);
            if let Some(module) = output.module {
                for (_, target) in &module.records {
                    if let Some(Target::Module(child)) = target {
                        if seen.insert(child.clone()) {
                            self.spawn_load(&mut tasks, child.clone());
                        }
                    }
                }
                loaded.insert(output.key, module);
            }
            // Children are entered before the parent leaves, so the barrier never
            // sees a false quiescent point.
            self.barrier.exit();
        }

        warnings.extend(self.resolver.take_warnings());
        warnings.sort_by(|a, b| (&a.path, &a.message).cmp(&(&b.path, &b.message)));
        warnings.dedup();

        if !errors.is_empty() {
            errors.sort_by(|a, b| {
                (a.path().unwrap_or(""), a.to_string()).cmp(&(b.path().unwrap_or(""), b.to_string()))
            });
            errors.dedup();
            return Err(BuildFailure::new(errors, warnings));
        }

        let graph = assemble(&entries, loaded);
        debug!(modules = graph.len(), "module graph built");
        Ok(GraphOutput { graph, warnings })
    }

    fn spawn_load(self: &Arc<Self>, tasks: &mut JoinSet<TaskOutput>, key: ModuleKey) {
        trace!(module = %key, "schedule load");
        self.barrier.enter();
        let ctx = Arc::clone(self);
        tasks.spawn(async move { ctx.load_module(key).await });
    }

    async fn resolve_entry(&self, spec: &str) -> Result<ModuleKey, BundleError> {
        let cwd = self.config.cwd.clone();
        let outcome = self
            .resolve_uncached(spec, ImportKind::EntryPoint, BTreeMap::new(), None, &cwd)
            .await;
        match outcome {
            Ok(Target::Module(key)) => Ok(key),
            Err(e @ BundleError::Plugin { .. }) => Err(e),
            Ok(Target::External(_)) | Err(_) => Err(BundleError::EntryNotFound {
                specifier: spec.to_string(),
            }),
        }
    }

    /// Deduplicated resolution. Errors come back attributed to `importer`.
    async fn resolve_import(
        &self,
        site: &ImportSite,
        importer: &ModuleKey,
        resolve_dir: &Path,
    ) -> ResolveOutcome {
        let key = ResolveKey {
            specifier: site.specifier.clone(),
            resolve_dir: resolve_dir.to_path_buf(),
            namespace: importer.namespace.clone(),
            kind: site.kind,
        };
        let cell = {
            let mut cache = self
                .resolve_cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(cache.entry(key).or_default())
        };
        let outcome = cell
            .get_or_init(|| {
                self.resolve_uncached(
                    &site.specifier,
                    site.kind,
                    site.attributes.clone(),
                    Some(importer),
                    resolve_dir,
                )
            })
            .await;
        outcome.clone().map_err(|e| attribute(e, importer))
    }

    /// Plugins first; the built-in resolver when none answers.
    async fn resolve_uncached(
        &self,
        spec: &str,
        kind: ImportKind,
        with: BTreeMap<String, String>,
        importer: Option<&ModuleKey>,
        resolve_dir: &Path,
    ) -> ResolveOutcome {
        let args = OnResolveArgs {
            path: spec.to_string(),
            importer: importer.map(|k| k.path.clone()).unwrap_or_default(),
            namespace: importer.map_or_else(|| ModuleKey::FILE.to_string(), |k| k.namespace.clone()),
            kind,
            resolve_dir: resolve_dir.to_path_buf(),
            with,
        };
        if let Some(result) = self.pipeline.resolve(&args, None).await? {
            return Ok(plugin_target(result, resolve_dir));
        }

        let importer_path = importer.filter(|k| k.is_file()).map(|k| PathBuf::from(&k.path));
        let mut request = ResolveRequest::new(spec, resolve_dir, kind);
        if let Some(path) = &importer_path {
            request = request.importer(path);
        }
        match self.resolver.resolve(&request) {
            Ok(Resolution::File(path)) => Ok(Target::Module(ModuleKey::file(path.display().to_string()))),
            Ok(Resolution::External(spec)) => Ok(Target::External(spec)),
            Ok(Resolution::Empty(name)) => Ok(Target::Module(ModuleKey::new(EMPTY_NAMESPACE, name))),
            Err(e) => Err(resolve_error(e)),
        }
    }

    async fn load_module(self: Arc<Self>, key: ModuleKey) -> TaskOutput {
        let mut output = TaskOutput {
            key: key.clone(),
            module: None,
            errors: Vec::new(),
            warnings: Vec::new(),
        };
        match self.load_and_parse(&key, &mut output.warnings).await {
            Ok(mut module) => {
                let resolutions = join_all(
                    module
                        .records
                        .iter()
                        .map(|(site, _)| self.resolve_import(site, &key, &module.resolve_dir)),
                )
                .await;
                for ((_, target), outcome) in module.records.iter_mut().zip(resolutions) {
                    match outcome {
                        Ok(resolved) => *target = Some(resolved),
                        Err(e) => output.errors.push(e),
                    }
                }
                output.module = Some(module);
            }
            Err(e) => output.errors.push(e),
        }
        output
    }

    async fn load_and_parse(
        &self,
        key: &ModuleKey,
        warnings: &mut Vec<Warning>,
    ) -> Result<LoadedModule, BundleError> {
        let attribute = key.to_string();
        let plugin_result = self
            .pipeline
            .load(&key.path, &key.namespace, &self.barrier, &attribute)
            .await?;

        let path = Path::new(&key.path);
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let (source, plugin_loader, plugin_dir) = match plugin_result {
            Some(loaded) => (loaded.contents, loaded.loader, loaded.resolve_dir),
            None if key.is_file() => {
                let source = read_to_string_lossy(path).map_err(|e| BundleError::Load {
                    path: attribute.clone(),
                    message: format!("Could not read from file: {} ({e})", key.path),
                })?;
                (source, None, None)
            }
            None if key.namespace == EMPTY_NAMESPACE => (String::new(), Some(Loader::Empty), None),
            None => {
                return Err(BundleError::Load {
                    path: attribute.clone(),
                    message: format!("Do not know how to load path: {attribute}"),
                })
            }
        };

        let loader = match plugin_loader
            .or_else(|| self.config.loader_for_extension(&format!(".{extension}")))
            .or_else(|| Loader::from_extension(extension))
        {
            Some(loader) => loader,
            None if !key.is_file() => Loader::Js,
            None => {
                return Err(BundleError::Load {
                    path: attribute.clone(),
                    message: format!("No loader is configured for \".{extension}\" files: {}", key.path),
                })
            }
        };

        let source = if loader.is_script() {
            apply_defines(&source, &self.config.define)
                .map_err(|e| BundleError::Parse {
                    path: attribute.clone(),
                    message: e.message,
                })?
                .into_owned()
        } else {
            source
        };

        let ast = self
            .parser
            .parse(&source, loader)
            .map_err(|e| BundleError::Parse {
                path: attribute.clone(),
                message: e.message,
            })?;

        let resolve_dir = plugin_dir.unwrap_or_else(|| {
            if key.is_file() {
                path.parent().map_or_else(|| self.config.cwd.clone(), Path::to_path_buf)
            } else {
                self.config.cwd.clone()
            }
        });

        let package = if key.is_file() {
            path.parent().and_then(|dir| self.resolver.packages().nearest(dir))
        } else {
            None
        };
        let node_esm = loader.is_script()
            && match extension {
                "mjs" | "mts" => true,
                "js" | "jsx" | "ts" | "tsx" => {
                    package.as_ref().is_some_and(|p| p.package_type == PackageType::Module)
                }
                _ => false,
            };
        let module_type = classify(loader, extension, node_esm, &ast);

        if module_type == ModuleType::Esm && ast.uses_commonjs {
            let variable = if ast.uses_module_var { "module" } else { "exports" };
            warnings.push(
                Warning::new(
                    codes::COMMONJS_IN_ESM,
                    format!("The CommonJS \"{variable}\" variable is treated as a global variable in an ECMAScript module and may not work as expected"),
                )
                .at(attribute.clone()),
            );
        }

        let has_side_effects = match &package {
            Some(pkg) if loader.is_script() => {
                pkg.side_effects.has_side_effects(&relative_slash(path, &pkg.dir))
            }
            _ => true,
        };

        trace!(module = %attribute, loader = loader.as_str(), ?module_type, node_esm, has_side_effects, "parsed");
        let records = ast.import_sites.iter().map(|s| (s.clone(), None)).collect();
        Ok(LoadedModule {
            key: key.clone(),
            source,
            loader,
            ast,
            module_type,
            node_esm,
            has_side_effects,
            resolve_dir,
            records,
        })
    }
}

/// Loader first, then extension, then syntax.
fn classify(loader: Loader, extension: &str, node_esm: bool, ast: &ModuleAst) -> ModuleType {
    match loader {
        Loader::Json | Loader::Text | Loader::Empty => return ModuleType::Cjs,
        _ => {}
    }
    match extension {
        "mjs" | "mts" => return ModuleType::Esm,
        "cjs" | "cts" => return ModuleType::Cjs,
        _ => {}
    }
    if ast.has_esm_syntax || node_esm {
        ModuleType::Esm
    } else if ast.uses_commonjs {
        ModuleType::Cjs
    } else {
        ModuleType::Unknown
    }
}

fn plugin_target(result: OnResolveResult, resolve_dir: &Path) -> Target {
    if result.external {
        return Target::External(result.path);
    }
    let namespace = result.namespace.unwrap_or_else(|| ModuleKey::FILE.to_string());
    if namespace == ModuleKey::FILE && !Path::new(&result.path).is_absolute() {
        let path = normalize(&resolve_dir.join(&result.path));
        return Target::Module(ModuleKey::file(path.display().to_string()));
    }
    Target::Module(ModuleKey::new(namespace, result.path))
}

fn resolve_error(e: ResolveError) -> BundleError {
    match e.invalid_package {
        Some(manifest) => BundleError::InvalidPackageConfig {
            path: manifest.display().to_string(),
            message: e.message,
        },
        None => BundleError::Resolve {
            specifier: e.specifier,
            importer: None,
            message: e.message,
        },
    }
}

/// Fill in the importer on errors cached without one.
fn attribute(error: BundleError, importer: &ModuleKey) -> BundleError {
    match error {
        BundleError::Resolve {
            specifier,
            importer: None,
            message,
        } => BundleError::Resolve {
            specifier,
            importer: Some(importer.to_string()),
            message,
        },
        BundleError::Plugin {
            plugin,
            hook,
            message,
            path: None,
        } => BundleError::Plugin {
            plugin,
            hook,
            message,
            path: Some(importer.to_string()),
        },
        other => other,
    }
}

/// Give modules their final ids: depth-first from the entries, following import
/// records in source order, so ids never depend on task scheduling.
fn assemble(entries: &[ModuleKey], mut loaded: HashMap<ModuleKey, LoadedModule>) -> ModuleGraph {
    let mut order: Vec<ModuleKey> = Vec::with_capacity(loaded.len());
    let mut ids: HashMap<ModuleKey, usize> = HashMap::default();

    for entry in entries {
        if ids.contains_key(entry) || !loaded.contains_key(entry) {
            continue;
        }
        ids.insert(entry.clone(), order.len());
        order.push(entry.clone());
        let mut stack: Vec<(ModuleKey, usize)> = vec![(entry.clone(), 0)];
        while let Some((key, next)) = stack.pop() {
            let child = loaded.get(&key).and_then(|m| {
                m.records[next..]
                    .iter()
                    .position(|(_, t)| {
                        matches!(t, Some(Target::Module(k)) if !ids.contains_key(k) && loaded.contains_key(k))
                    })
                    .map(|offset| (next + offset, m.records[next + offset].1.clone()))
            });
            if let Some((index, Some(Target::Module(child)))) = child {
                stack.push((key, index + 1));
                ids.insert(child.clone(), order.len());
                order.push(child.clone());
                stack.push((child, 0));
            }
        }
    }

    let mut graph = ModuleGraph::new();
    for key in &order {
        let Some(module) = loaded.remove(key) else { continue };
        let records = module
            .records
            .into_iter()
            .map(|(site, target)| {
                let (target, external) = match target {
                    Some(Target::Module(k)) => (ids.get(&k).copied(), None),
                    Some(Target::External(spec)) => (None, Some(spec)),
                    None => (None, None),
                };
                ImportRecord {
                    specifier: site.specifier,
                    kind: site.kind,
                    attributes: site.attributes,
                    worker: site.worker,
                    stmt: site.stmt,
                    target,
                    external,
                }
            })
            .collect();
        graph.add(ModuleRecord {
            id: 0,
            is_entry: entries.contains(&module.key),
            key: module.key,
            source: module.source,
            loader: module.loader,
            ast: module.ast,
            module_type: module.module_type,
            node_esm: module.node_esm,
            has_side_effects: module.has_side_effects,
            resolve_dir: module.resolve_dir,
            records,
        });
    }
    if !loaded.is_empty() {
        warn!(unreachable = loaded.len(), "loaded modules not reachable from any entry");
    }
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::ModuleAst;

    fn ast(esm: bool, cjs: bool) -> ModuleAst {
        ModuleAst {
            has_esm_syntax: esm,
            uses_commonjs: cjs,
            ..ModuleAst::default()
        }
    }

    #[test]
    fn test_classify_order() {
        assert_eq!(classify(Loader::Json, "json", false, &ast(false, false)), ModuleType::Cjs);
        assert_eq!(classify(Loader::Js, "cjs", false, &ast(true, false)), ModuleType::Cjs);
        assert_eq!(classify(Loader::Js, "mjs", true, &ast(false, true)), ModuleType::Esm);
        assert_eq!(classify(Loader::Js, "js", false, &ast(true, true)), ModuleType::Esm);
        assert_eq!(classify(Loader::Js, "js", false, &ast(false, true)), ModuleType::Cjs);
        assert_eq!(classify(Loader::Js, "js", true, &ast(false, false)), ModuleType::Esm);
        assert_eq!(classify(Loader::Js, "js", true, &ast(false, true)), ModuleType::Esm);
        assert_eq!(classify(Loader::Js, "js", false, &ast(false, false)), ModuleType::Unknown);
    }

    #[test]
    fn test_plugin_target() {
        let dir = Path::new("/src");
        assert_eq!(
            plugin_target(OnResolveResult::path("./a.js"), dir),
            Target::Module(ModuleKey::file("/src/a.js"))
        );
        assert_eq!(
            plugin_target(OnResolveResult::path("x").namespace("virtual"), dir),
            Target::Module(ModuleKey::new("virtual", "x"))
        );
        assert_eq!(
            plugin_target(OnResolveResult::external("react"), dir),
            Target::External("react".into())
        );
    }

    #[test]
    fn test_errors_attributed_to_importer() {
        let err = BundleError::Resolve {
            specifier: "./x".into(),
            importer: None,
            message: "Could not resolve: \"./x\"".into(),
        };
        let attributed = attribute(err, &ModuleKey::file("/src/a.js"));
        assert_eq!(attributed.path(), Some("/src/a.js"));
    }

    fn loaded(key: &str, targets: &[&str]) -> (ModuleKey, LoadedModule) {
        let key = ModuleKey::file(key);
        let records = targets
            .iter()
            .map(|t| {
                (
                    ImportSite {
                        specifier: (*t).to_string(),
                        kind: ImportKind::ImportStatement,
                        attributes: BTreeMap::new(),
                        worker: false,
                        stmt: 0,
                    },
                    Some(Target::Module(ModuleKey::file(*t))),
                )
            })
            .collect();
        let module = LoadedModule {
            key: key.clone(),
            source: String::new(),
            loader: Loader::Js,
            ast: ModuleAst::default(),
            module_type: ModuleType::Esm,
            node_esm: false,
            has_side_effects: true,
            resolve_dir: PathBuf::from("/"),
            records,
        };
        (key, module)
    }

    #[test]
    fn test_assemble_numbers_depth_first() {
        let modules: HashMap<_, _> = [
            loaded("/c.js", &[]),
            loaded("/entry.js", &["/a.js", "/c.js"]),
            loaded("/b.js", &["/entry.js"]),
            loaded("/a.js", &["/b.js"]),
        ]
        .into_iter()
        .collect();
        let graph = assemble(&[ModuleKey::file("/entry.js")], modules);
        let paths: Vec<_> = graph.iter().map(|m| m.key.path.as_str()).collect();
        assert_eq!(paths, ["/entry.js", "/a.js", "/b.js", "/c.js"]);
        assert_eq!(graph.entries(), &[0]);
        assert_eq!(graph.module(2).records[0].target, Some(0));
    }
}
