//! End-to-end builds over on-disk fixtures.

use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::{tempdir, TempDir};
use weld_core::bundler::interop::{default_import, named_import};
use weld_core::bundler::{ChunkKind, Interop, ModuleId, ModuleType, ResolvedBinding, WrapKind};
use weld_core::error::codes;
use weld_core::{
    BuildConfig, BuildFailure, BuildResult, Bundler, HookFilter, Loader, OnLoadResult,
    OnResolveResult, Platform, Plugin, PluginBuild, PluginError, VirtualPlugin,
};

fn fixture(files: &[(&str, &str)]) -> TempDir {
    let dir = tempdir().unwrap();
    for (rel, contents) in files {
        let path = dir.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }
    dir
}

async fn build(config: BuildConfig) -> Result<BuildResult, BuildFailure> {
    Bundler::new(config).build().await
}

fn id_of(result: &BuildResult, suffix: &str) -> ModuleId {
    result
        .graph
        .iter()
        .find(|m| m.key.path.ends_with(suffix))
        .unwrap_or_else(|| panic!("no module ending in {suffix}"))
        .id
}

#[tokio::test]
async fn test_require_of_commonjs() {
    let dir = fixture(&[
        ("a.js", "console.log(require('./b').message);\n"),
        ("b.js", "module.exports = {message: \"Hello, world!\"};\n"),
    ]);
    let result = build(BuildConfig::new(dir.path(), ["./a.js"])).await.unwrap();

    let (a, b) = (id_of(&result, "a.js"), id_of(&result, "b.js"));
    assert_eq!(result.graph.module(b).module_type, ModuleType::Cjs);
    assert_eq!(result.linked.wrap[b], WrapKind::Cjs);
    assert_eq!(result.graph.module(a).records[0].target, Some(b));
    assert!(result.liveness.is_included(b));

    let exports = json!({"message": "Hello, world!"});
    assert_eq!(
        named_import(exports.as_object().unwrap(), "message"),
        json!("Hello, world!")
    );
}

async fn default_of_lib(entry: &str) -> serde_json::Value {
    let source = "import lib from './lib.cjs';\nconsole.log(JSON.stringify(lib));\n";
    let dir = fixture(&[
        (entry, source),
        (
            "lib.cjs",
            "exports.__esModule = true;\nexports.default = {value: 'default export'};\n",
        ),
    ]);
    let result = build(BuildConfig::new(dir.path(), [format!("./{entry}")]))
        .await
        .unwrap();

    let importer = id_of(&result, entry);
    let lib = id_of(&result, "lib.cjs");
    let import = result.linked.import(importer, "lib").unwrap();
    assert!(import.cjs_default);
    assert_eq!(
        import.binding,
        ResolvedBinding::CommonJs {
            module: lib,
            property: Some("default".into())
        }
    );

    let exports = json!({"__esModule": true, "default": {"value": "default export"}});
    default_import(exports.as_object().unwrap(), import.interop)
}

#[tokio::test]
async fn test_es_module_flag_honored_from_plain_js() {
    assert_eq!(default_of_lib("entry.js").await, json!({"value": "default export"}));
}

#[tokio::test]
async fn test_es_module_flag_ignored_from_mjs() {
    assert_eq!(
        default_of_lib("entry.mjs").await,
        json!({"__esModule": true, "default": {"value": "default export"}})
    );
}

#[tokio::test]
async fn test_type_module_importer_uses_node_interop() {
    let dir = fixture(&[
        ("package.json", r#"{"type": "module"}"#),
        ("entry.js", "import lib from './lib.cjs';\nconsole.log(lib);\n"),
        ("lib.cjs", "exports.__esModule = true;\nexports.default = 1;\n"),
    ]);
    let result = build(BuildConfig::new(dir.path(), ["./entry.js"])).await.unwrap();
    let entry = id_of(&result, "entry.js");
    assert!(result.graph.module(entry).node_esm);
    assert_eq!(
        result.linked.import(entry, "lib").unwrap().interop,
        Interop::NodeEsm
    );
}

struct Counter {
    resolves: Arc<AtomicUsize>,
    loads: Arc<AtomicUsize>,
}

impl Plugin for Counter {
    fn name(&self) -> &str {
        "counter"
    }

    fn setup(&self, build: &mut PluginBuild<'_>) -> Result<(), PluginError> {
        let resolves = Arc::clone(&self.resolves);
        build.on_resolve(HookFilter::new(r"shared")?, move |_| {
            resolves.fetch_add(1, Ordering::SeqCst);
            async { Ok(None) }
        });
        let loads = Arc::clone(&self.loads);
        build.on_load(HookFilter::new(r"shared\.js$")?, move |_| {
            loads.fetch_add(1, Ordering::SeqCst);
            async { Ok(None) }
        });
        Ok(())
    }
}

#[tokio::test]
async fn test_shared_module_resolved_and_loaded_once() {
    let dir = fixture(&[
        (
            "entry.js",
            "import './a.js';\nimport './b.js';\nimport './c.js';\nimport { s } from './shared.js';\nconsole.log(s);\n",
        ),
        ("a.js", "import { s } from './shared.js';\nconsole.log('a', s);\n"),
        ("b.js", "import { s } from './shared.js';\nconsole.log('b', s);\n"),
        ("c.js", "import { s } from './shared.js';\nconsole.log('c', s);\n"),
        ("shared.js", "export const s = 'shared';\n"),
    ]);
    let resolves = Arc::new(AtomicUsize::new(0));
    let loads = Arc::new(AtomicUsize::new(0));
    let result = Bundler::new(BuildConfig::new(dir.path(), ["./entry.js"]))
        .plugin(Counter {
            resolves: Arc::clone(&resolves),
            loads: Arc::clone(&loads),
        })
        .build()
        .await
        .unwrap();

    assert_eq!(resolves.load(Ordering::SeqCst), 1);
    assert_eq!(loads.load(Ordering::SeqCst), 1);
    let shared = result
        .graph
        .iter()
        .filter(|m| m.key.path.ends_with("shared.js"))
        .count();
    assert_eq!(shared, 1);
    assert_eq!(result.chunks.chunks()[0].modules.len(), 5);
}

fn cycle_messages(failure: &BuildFailure) -> Vec<String> {
    let mut messages: Vec<String> = failure
        .errors
        .iter()
        .filter(|e| e.code() == codes::EXPORT_CYCLE)
        .map(ToString::to_string)
        .collect();
    messages.sort();
    messages
}

async fn reexport_cycle(len: usize) -> BuildFailure {
    let names: Vec<String> = (0..len).map(|i| format!("v{i:02}")).collect();
    let source: String = (0..len)
        .map(|i| {
            format!(
                "export {{ {} as {} }} from './entry.js';\n",
                names[i],
                names[(i + 1) % len]
            )
        })
        .collect();
    let dir = fixture(&[("entry.js", source.as_str())]);
    build(BuildConfig::new(dir.path(), ["./entry.js"]))
        .await
        .unwrap_err()
}

#[tokio::test]
async fn test_short_reexport_cycle() {
    let failure = reexport_cycle(4).await;
    let messages = cycle_messages(&failure);
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0], "Detected cycle while resolving import \"v00\"");
}

#[tokio::test]
async fn test_long_reexport_cycle() {
    let failure = reexport_cycle(11).await;
    let messages = cycle_messages(&failure);
    assert_eq!(messages.len(), 11);
    assert_eq!(messages[10], "Detected cycle while resolving import \"v10\"");
}

#[tokio::test]
async fn test_deep_reexport_chain_resolves() {
    let mut files: Vec<(String, String)> = vec![(
        "entry.js".into(),
        "import { x } from './m0.js';\nconsole.log(x);\n".into(),
    )];
    for i in 0..8 {
        files.push((format!("m{i}.js"), format!("export {{ x }} from './m{}.js';\n", i + 1)));
    }
    files.push(("m8.js".into(), "export const x = 42;\n".into()));
    let borrowed: Vec<(&str, &str)> = files.iter().map(|(p, s)| (p.as_str(), s.as_str())).collect();
    let dir = fixture(&borrowed);

    let result = build(BuildConfig::new(dir.path(), ["./entry.js"])).await.unwrap();
    let entry = id_of(&result, "entry.js");
    let last = id_of(&result, "m8.js");
    assert_eq!(
        result.linked.import(entry, "x").unwrap().binding,
        ResolvedBinding::Local {
            module: last,
            local: "x".into()
        }
    );
    assert!(result.graph.module(last).source.contains("= 42"));
}

struct DoubleDefer;

impl Plugin for DoubleDefer {
    fn name(&self) -> &str {
        "double-defer"
    }

    fn setup(&self, build: &mut PluginBuild<'_>) -> Result<(), PluginError> {
        build.on_load(HookFilter::new(r"\.js$")?, |args| async move {
            let _first = args.defer();
            args.defer().await?;
            Ok(Some(OnLoadResult::contents("")))
        });
        Ok(())
    }
}

#[tokio::test]
async fn test_defer_twice_fails() {
    let dir = fixture(&[("entry.js", "console.log(1);\n")]);
    let failure = Bundler::new(BuildConfig::new(dir.path(), ["./entry.js"]))
        .plugin(DoubleDefer)
        .build()
        .await
        .unwrap_err();
    assert!(failure.has_message("Can't call .defer() more than once within an onLoad plugin"));
    assert_eq!(failure.errors[0].code(), codes::DEFER_MISUSE);
}

struct DeferLate {
    log: Arc<Mutex<Vec<String>>>,
}

impl Plugin for DeferLate {
    fn name(&self) -> &str {
        "defer-late"
    }

    fn setup(&self, build: &mut PluginBuild<'_>) -> Result<(), PluginError> {
        let log = Arc::clone(&self.log);
        build.on_load(HookFilter::new(r"\.js$")?, move |args| {
            let log = Arc::clone(&log);
            async move {
                let name = Path::new(&args.path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if name == "late.js" {
                    args.defer().await?;
                    log.lock().unwrap().push("late resumed".to_string());
                } else {
                    log.lock().unwrap().push(name);
                }
                Ok(None)
            }
        });
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deferred_load_resumes_after_others() {
    let dir = fixture(&[
        (
            "entry.js",
            "import './late.js';\nimport './a.js';\nimport './b.js';\n",
        ),
        ("late.js", "console.log('late');\n"),
        ("a.js", "import './c.js';\nconsole.log('a');\n"),
        ("b.js", "console.log('b');\n"),
        ("c.js", "import './d.js';\nconsole.log('c');\n"),
        ("d.js", "console.log('d');\n"),
    ]);
    let log = Arc::new(Mutex::new(Vec::new()));
    let result = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        Bundler::new(BuildConfig::new(dir.path(), ["./entry.js"]))
            .plugin(DeferLate {
                log: Arc::clone(&log),
            })
            .build(),
    )
    .await
    .expect("deferred build should not hang")
    .unwrap();

    assert_eq!(result.graph.len(), 6);
    let log = log.lock().unwrap().clone();
    assert_eq!(log.len(), 6);
    assert_eq!(log.last().map(String::as_str), Some("late resumed"));
}

#[tokio::test]
async fn test_cloudflare_prefers_workerd_condition() {
    let variants: &[(&str, &str)] = &[
        (
            r#"{"default": "./default.js", "node": "./node.js", "workerd": "./workerd.js", "browser": "./browser.js", "worker": "./worker.js"}"#,
            "workerd.js",
        ),
        (
            r#"{"browser": "./browser.js", "worker": "./worker.js", "default": "./default.js"}"#,
            "worker.js",
        ),
        (
            r#"{"default": "./default.js", "browser": "./browser.js"}"#,
            "browser.js",
        ),
        (r#"{"import": "./default.js", "default": "./default.js"}"#, "default.js"),
    ];
    for (exports, expected) in variants {
        let package = format!(r#"{{"name": "pkg", "exports": {{".": {exports}}}}}"#);
        let dir = fixture(&[
            ("entry.js", "import 'pkg';\n"),
            ("node_modules/pkg/package.json", package.as_str()),
            ("node_modules/pkg/workerd.js", "console.log('workerd');\n"),
            ("node_modules/pkg/worker.js", "console.log('worker');\n"),
            ("node_modules/pkg/browser.js", "console.log('browser');\n"),
            ("node_modules/pkg/node.js", "console.log('node');\n"),
            ("node_modules/pkg/default.js", "console.log('default');\n"),
        ]);
        let config =
            BuildConfig::new(dir.path(), ["./entry.js"]).with_platform(Platform::Cloudflare);
        let result = build(config).await.unwrap();
        let picked = result
            .graph
            .iter()
            .find(|m| m.key.path.contains("node_modules"))
            .unwrap();
        assert!(
            picked.key.path.ends_with(expected),
            "{exports} picked {}",
            picked.key.path
        );
    }
}

#[tokio::test]
async fn test_side_effect_free_package_dropped_unless_used() {
    let files = |entry: &'static str| {
        fixture(&[
            ("entry.js", entry),
            (
                "node_modules/pkg/package.json",
                r#"{"name": "pkg", "main": "index.js", "sideEffects": false}"#,
            ),
            (
                "node_modules/pkg/index.js",
                "console.log('pkg loaded');\nexport const used = 1;\nexport const unused = 2;\n",
            ),
        ])
    };

    let dir = files("import { unused } from 'pkg';\nconsole.log('entry');\n");
    let result = build(BuildConfig::new(dir.path(), ["./entry.js"])).await.unwrap();
    let pkg = id_of(&result, "index.js");
    assert!(!result.graph.module(pkg).has_side_effects);
    assert!(!result.liveness.is_included(pkg));

    let dir = files("import { used } from 'pkg';\nconsole.log(used);\n");
    let result = build(BuildConfig::new(dir.path(), ["./entry.js"])).await.unwrap();
    let pkg = id_of(&result, "index.js");
    assert!(result.liveness.is_included(pkg));
    assert!(result.liveness.is_live(pkg, 0));
    let chunk = &result.chunks.chunks()[0];
    assert_eq!(chunk.modules.iter().filter(|&&m| m == pkg).count(), 1);
}

#[tokio::test]
async fn test_output_collision() {
    let dir = fixture(&[
        ("a.js", "console.log('js');\n"),
        ("a.ts", "console.log('ts');\n"),
    ]);
    let failure = build(BuildConfig::new(dir.path(), ["./a.js", "./a.ts"]))
        .await
        .unwrap_err();
    assert_eq!(failure.errors[0].code(), codes::OUTPUT_COLLISION);
    assert!(failure.has_message("Multiple files share the same output path: a.js"));
}

#[tokio::test]
async fn test_missing_imports_are_collected() {
    let dir = fixture(&[(
        "entry.js",
        "import './missing.js';\nimport 'left-pad';\n",
    )]);
    let failure = build(BuildConfig::new(dir.path(), ["./entry.js"]))
        .await
        .unwrap_err();
    assert_eq!(failure.errors.len(), 2);
    assert!(failure.has_message("Could not resolve: \"./missing.js\""));
    assert!(failure.has_message("Could not resolve: \"left-pad\". Maybe you need to \"bun install\"?"));
    for error in &failure.errors {
        assert!(error.path().unwrap().ends_with("entry.js"));
    }
}

#[tokio::test]
async fn test_missing_entry_aborts() {
    let dir = fixture(&[("entry.js", "")]);
    let failure = build(BuildConfig::new(dir.path(), ["./entry.js", "./nope.js"]))
        .await
        .unwrap_err();
    assert!(failure.has_message("ModuleNotFound resolving \"./nope.js\" (entry point)"));
}

struct Env {
    name: &'static str,
    answer: bool,
    log: Arc<Mutex<Vec<String>>>,
}

impl Plugin for Env {
    fn name(&self) -> &str {
        self.name
    }

    fn setup(&self, build: &mut PluginBuild<'_>) -> Result<(), PluginError> {
        let (name, answer, log) = (self.name, self.answer, Arc::clone(&self.log));
        build.on_resolve(HookFilter::new("^env$")?, move |args| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(format!("{name} resolve"));
                Ok(answer.then(|| OnResolveResult::path(args.path).namespace("env")))
            }
        });
        let log = Arc::clone(&self.log);
        build.on_load(HookFilter::new(".*")?.namespace("env"), move |_| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(format!("{name} load"));
                if answer {
                    Ok(Some(
                        OnLoadResult::contents(r#"{"mode": "test"}"#).loader(Loader::Json),
                    ))
                } else {
                    Ok(None)
                }
            }
        });
        Ok(())
    }
}

#[tokio::test]
async fn test_plugins_tried_in_registration_order() {
    let dir = fixture(&[("entry.js", "import env from 'env';\nconsole.log(env.mode);\n")]);
    let log = Arc::new(Mutex::new(Vec::new()));
    let plugin = |name, answer| Env {
        name,
        answer,
        log: Arc::clone(&log),
    };
    let result = Bundler::new(BuildConfig::new(dir.path(), ["./entry.js"]))
        .plugin(plugin("first", false))
        .plugin(plugin("second", true))
        .plugin(plugin("third", true))
        .build()
        .await
        .unwrap();

    assert_eq!(
        log.lock().unwrap().clone(),
        ["first resolve", "second resolve", "first load", "second load"]
    );
    let env = result.graph.iter().find(|m| m.key.namespace == "env").unwrap();
    assert_eq!(env.loader, Loader::Json);
    assert_eq!(env.key.to_string(), "env:env");
}

#[tokio::test]
async fn test_load_hook_error_is_attributed() {
    struct Broken;
    impl Plugin for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn setup(&self, build: &mut PluginBuild<'_>) -> Result<(), PluginError> {
            build.on_load(HookFilter::new(r"dep\.js$")?, |_| async {
                Err(PluginError::msg("cannot load this"))
            });
            Ok(())
        }
    }

    let dir = fixture(&[
        ("entry.js", "import './dep.js';\n"),
        ("dep.js", "console.log('dep');\n"),
    ]);
    let failure = Bundler::new(BuildConfig::new(dir.path(), ["./entry.js"]))
        .plugin(Broken)
        .build()
        .await
        .unwrap_err();
    assert_eq!(failure.errors.len(), 1);
    assert_eq!(failure.errors[0].code(), codes::PLUGIN_ERROR);
    assert_eq!(failure.errors[0].to_string(), "cannot load this");
    assert!(failure.errors[0].path().unwrap().ends_with("dep.js"));
}

#[tokio::test]
async fn test_virtual_module() {
    let dir = fixture(&[(
        "entry.js",
        "import { flag } from 'virtual:config';\nconsole.log(flag);\n",
    )]);
    let result = Bundler::new(BuildConfig::new(dir.path(), ["./entry.js"]))
        .plugin(VirtualPlugin::new().module("config", "export const flag = true;\n"))
        .build()
        .await
        .unwrap();
    let config = result
        .graph
        .iter()
        .find(|m| m.key.namespace == "virtual")
        .unwrap();
    assert_eq!(config.key.path, "config");
    assert!(result.liveness.is_included(config.id));
}

#[tokio::test]
async fn test_dynamic_import_splits_with_splitting() {
    let dir = fixture(&[
        ("entry.js", "import('./lazy.js').then((m) => console.log(m));\n"),
        ("lazy.js", "export const lazy = 1;\n"),
    ]);
    let result = build(BuildConfig::new(dir.path(), ["./entry.js"]).with_splitting(true))
        .await
        .unwrap();
    let kinds: Vec<ChunkKind> = result.chunks.chunks().iter().map(|c| c.kind).collect();
    assert_eq!(kinds, [ChunkKind::Entry, ChunkKind::Dynamic]);
    assert_eq!(result.chunks.chunks()[0].dynamic_imports, [1]);

    let result = build(BuildConfig::new(dir.path(), ["./entry.js"])).await.unwrap();
    assert_eq!(result.chunks.chunks().len(), 1);
}

#[tokio::test]
async fn test_metafile_written() {
    let dir = fixture(&[
        ("entry.js", "import { a } from './a.js';\nconsole.log(a);\n"),
        ("a.js", "export const a = 1;\n"),
    ]);
    let config = BuildConfig::new(dir.path(), ["./entry.js"])
        .with_outdir("out")
        .with_metafile("meta.json");
    let result = build(config).await.unwrap();
    assert!(result.metafile.is_some());

    let text = std::fs::read_to_string(dir.path().join("meta.json")).unwrap();
    let meta: serde_json::Value = serde_json::from_str(&text).unwrap();
    let imports = &meta["inputs"]["entry.js"]["imports"];
    assert_eq!(imports[0]["path"], "a.js");
    assert_eq!(imports[0]["kind"], "import-statement");
    assert_eq!(imports[0]["original"], "./a.js");
    let output = &meta["outputs"]["out/entry.js"];
    assert_eq!(output["entryPoint"], "entry.js");
    assert_eq!(output["exports"], json!([]));
}

#[tokio::test]
async fn test_invalid_type_field_warns() {
    let dir = fixture(&[
        ("package.json", r#"{"type": "esm"}"#),
        ("entry.js", "console.log(1);\n"),
    ]);
    let result = build(BuildConfig::new(dir.path(), ["./entry.js"])).await.unwrap();
    assert!(result.warnings.iter().any(|w| w.code == codes::MALFORMED_PACKAGE_JSON
        && w.message == "\"esm\" is not a valid value for the \"type\" field"));
}

#[tokio::test]
async fn test_type_module_file_stays_esm_despite_module_exports() {
    let dir = fixture(&[
        ("package.json", r#"{"type": "module"}"#),
        ("entry.js", "module.exports = null;\n"),
    ]);
    let result = build(BuildConfig::new(dir.path(), ["./entry.js"])).await.unwrap();

    let entry = id_of(&result, "entry.js");
    assert_eq!(result.graph.module(entry).module_type, ModuleType::Esm);
    assert_eq!(result.linked.wrap[entry], WrapKind::None);
    assert!(result.warnings.iter().any(|w| w.code == codes::COMMONJS_IN_ESM
        && w.message.contains("\"module\" variable")));
}

#[tokio::test]
async fn test_exports_in_esm_syntax_file_warns() {
    let dir = fixture(&[(
        "entry.js",
        "export const y = 1;\nexports.x = 1;\n",
    )]);
    let result = build(BuildConfig::new(dir.path(), ["./entry.js"])).await.unwrap();

    let entry = id_of(&result, "entry.js");
    assert_eq!(result.graph.module(entry).module_type, ModuleType::Esm);
    assert!(result.warnings.iter().any(|w| w.code == codes::COMMONJS_IN_ESM
        && w.message.contains("\"exports\" variable")));
}

#[tokio::test]
async fn test_start_hook_error_aborts_build() {
    struct FailsAtStart {
        loads: Arc<AtomicUsize>,
    }
    impl Plugin for FailsAtStart {
        fn name(&self) -> &str {
            "fails-at-start"
        }
        fn setup(&self, build: &mut PluginBuild<'_>) -> Result<(), PluginError> {
            build.on_start(|| async { Err(PluginError::msg("start broke")) });
            let loads = Arc::clone(&self.loads);
            build.on_load(HookFilter::new(r"\.js$")?, move |_| {
                loads.fetch_add(1, Ordering::SeqCst);
                async { Ok(None) }
            });
            Ok(())
        }
    }

    let dir = fixture(&[("entry.js", "console.log(1);\n")]);
    let loads = Arc::new(AtomicUsize::new(0));
    let failure = Bundler::new(BuildConfig::new(dir.path(), ["./entry.js"]))
        .plugin(FailsAtStart {
            loads: Arc::clone(&loads),
        })
        .build()
        .await
        .unwrap_err();
    assert!(failure.has_message("start broke"));
    assert_eq!(failure.errors[0].code(), codes::PLUGIN_ERROR);
    assert_eq!(loads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_error_after_defer_is_attributed() {
    struct FailsAfterDefer;
    impl Plugin for FailsAfterDefer {
        fn name(&self) -> &str {
            "fails-after-defer"
        }
        fn setup(&self, build: &mut PluginBuild<'_>) -> Result<(), PluginError> {
            build.on_load(HookFilter::new(r"late\.js$")?, |args| async move {
                args.defer().await?;
                Err(PluginError::msg("late failure"))
            });
            Ok(())
        }
    }

    let dir = fixture(&[
        ("entry.js", "import './late.js';\nimport './a.js';\n"),
        ("late.js", "console.log('late');\n"),
        ("a.js", "console.log('a');\n"),
    ]);
    let failure = Bundler::new(BuildConfig::new(dir.path(), ["./entry.js"]))
        .plugin(FailsAfterDefer)
        .build()
        .await
        .unwrap_err();
    assert_eq!(failure.errors.len(), 1);
    assert_eq!(failure.errors[0].code(), codes::PLUGIN_ERROR);
    assert_eq!(failure.errors[0].to_string(), "late failure");
    assert!(failure.errors[0].path().unwrap().ends_with("late.js"));
}

#[tokio::test]
async fn test_hooks_skip_other_namespaces() {
    struct VirtualOnly {
        resolves: Arc<Mutex<Vec<String>>>,
        loads: Arc<AtomicUsize>,
    }
    impl Plugin for VirtualOnly {
        fn name(&self) -> &str {
            "virtual-only"
        }
        fn setup(&self, build: &mut PluginBuild<'_>) -> Result<(), PluginError> {
            let resolves = Arc::clone(&self.resolves);
            build.on_resolve(
                HookFilter::new(r"dep\.js$")?.namespace("virtual"),
                move |args| {
                    resolves.lock().unwrap().push(args.namespace.clone());
                    async { Ok(None) }
                },
            );
            let loads = Arc::clone(&self.loads);
            build.on_load(HookFilter::new(".*")?.namespace("other"), move |_| {
                loads.fetch_add(1, Ordering::SeqCst);
                async { Ok(None) }
            });
            Ok(())
        }
    }

    let dir = fixture(&[
        (
            "entry.js",
            "import './dep.js';\nimport { flag } from 'virtual:config';\nconsole.log(flag);\n",
        ),
        ("dep.js", "console.log('dep');\n"),
    ]);
    let resolves = Arc::new(Mutex::new(Vec::new()));
    let loads = Arc::new(AtomicUsize::new(0));
    let result = Bundler::new(BuildConfig::new(dir.path(), ["./entry.js"]))
        .plugin(VirtualPlugin::new().module("config", "import './dep.js';\nexport const flag = true;\n"))
        .plugin(VirtualOnly {
            resolves: Arc::clone(&resolves),
            loads: Arc::clone(&loads),
        })
        .build()
        .await
        .unwrap();

    assert_eq!(resolves.lock().unwrap().clone(), ["virtual"]);
    assert_eq!(loads.load(Ordering::SeqCst), 0);
    assert_eq!(result.graph.len(), 3);
}
