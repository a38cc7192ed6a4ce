//! Linking: binds every import to the declaration that provides it.
//!
//! Re-export chains are followed across modules (`export { a as b } from`,
//! `import { a } ...; export { a }`, `export *`). A chain that comes back to a
//! name it is already resolving is a cycle; each exported name caught in one is
//! reported on its own.

use super::graph::{ModuleGraph, ModuleId, ModuleRecord};
use super::interop::Interop;
use crate::error::BundleError;
use crate::parse::{ExportEntry, ImportBinding, ImportKind};
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;
use weld_util::path::relative_slash;

/// Below this depth the trail is scanned linearly; from it on, a set is kept.
const LINEAR_SCAN_LIMIT: usize = 8;

/// What an imported or exported name finally refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResolvedBinding {
    /// A top-level declaration `local` in `module`.
    Local { module: ModuleId, local: String },
    /// The namespace object of an ESM module.
    Namespace { module: ModuleId },
    /// A property of a CommonJS `exports` object; `None` is the object itself.
    CommonJs {
        module: ModuleId,
        property: Option<String>,
    },
    /// A name imported from a module left out of the bundle.
    External { specifier: String, name: String },
    Missing,
}

/// How a module's body is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WrapKind {
    /// Hoisted into the chunk scope.
    None,
    /// `__commonJS` closure, evaluated on first `require`.
    Cjs,
    /// ESM reached through `require()`: lazy `__esm` init plus `__toCommonJS`.
    Esm,
}

/// One linked import binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedImport {
    pub local: String,
    pub binding: ResolvedBinding,
    /// Only relevant for default imports of CommonJS.
    pub interop: Interop,
    /// Default import of a CommonJS module, whose value depends on `interop`.
    pub cjs_default: bool,
}

/// Linker output, indexed by module id.
#[derive(Debug, Default)]
pub struct LinkedGraph {
    pub wrap: Vec<WrapKind>,
    /// Resolved export table of each ESM module. Empty for CommonJS.
    pub exports: Vec<BTreeMap<String, ResolvedBinding>>,
    pub imports: Vec<Vec<LinkedImport>>,
}

impl LinkedGraph {
    #[must_use]
    pub fn import(&self, module: ModuleId, local: &str) -> Option<&LinkedImport> {
        self.imports.get(module)?.iter().find(|i| i.local == local)
    }

    #[must_use]
    pub fn export(&self, module: ModuleId, name: &str) -> Option<&ResolvedBinding> {
        self.exports.get(module)?.get(name)
    }
}

#[derive(Debug)]
struct Cyclic;

/// `(module, name)` pairs currently being resolved.
#[derive(Debug, Default)]
struct ResolutionTrail {
    path: Vec<(ModuleId, String)>,
    index: Option<HashSet<(ModuleId, String)>>,
}

impl ResolutionTrail {
    fn contains(&self, module: ModuleId, name: &str) -> bool {
        match &self.index {
            Some(set) => set.contains(&(module, name.to_string())),
            None => self.path.iter().any(|(m, n)| *m == module && n == name),
        }
    }

    fn push(&mut self, module: ModuleId, name: &str) {
        self.path.push((module, name.to_string()));
        if let Some(set) = &mut self.index {
            set.insert((module, name.to_string()));
        } else if self.path.len() >= LINEAR_SCAN_LIMIT {
            self.index = Some(self.path.iter().cloned().collect());
        }
    }

    fn pop(&mut self) {
        if let Some(entry) = self.path.pop() {
            if let Some(set) = &mut self.index {
                set.remove(&entry);
            }
        }
    }

    #[cfg(test)]
    fn is_indexed(&self) -> bool {
        self.index.is_some()
    }
}

struct Linker<'g> {
    graph: &'g ModuleGraph,
    cwd: &'g Path,
    memo: HashMap<(ModuleId, String), Option<ResolvedBinding>>,
    errors: Vec<BundleError>,
    reported: HashSet<(ModuleId, String)>,
    /// Bumped whenever an `export *` target is skipped for being on the trail.
    /// A result computed across such a skip depends on the trail and is not memoized.
    star_skips: usize,
}

/// Link `graph`. Cycles and missing exports are returned as errors.
pub fn link(graph: &ModuleGraph, cwd: &Path) -> Result<LinkedGraph, Vec<BundleError>> {
    let mut linker = Linker {
        graph,
        cwd,
        memo: HashMap::default(),
        errors: Vec::new(),
        reported: HashSet::default(),
        star_skips: 0,
    };

    let mut linked = LinkedGraph {
        wrap: wrap_kinds(graph),
        exports: Vec::with_capacity(graph.len()),
        imports: Vec::with_capacity(graph.len()),
    };

    for module in graph.iter() {
        linked.exports.push(linker.export_table(module));
    }
    for module in graph.iter() {
        linked.imports.push(linker.link_imports(module));
    }

    if linker.errors.is_empty() {
        debug!(modules = graph.len(), "linked");
        Ok(linked)
    } else {
        Err(linker.errors)
    }
}

/// CommonJS-shaped modules are wrapped; ESM is wrapped only when something requires it.
fn wrap_kinds(graph: &ModuleGraph) -> Vec<WrapKind> {
    let mut wrap: Vec<WrapKind> = graph
        .iter()
        .map(|m| if m.is_esm() { WrapKind::None } else { WrapKind::Cjs })
        .collect();
    for module in graph.iter() {
        for record in &module.records {
            if record.kind == ImportKind::RequireCall {
                if let Some(target) = record.target {
                    if wrap[target] == WrapKind::None {
                        wrap[target] = WrapKind::Esm;
                    }
                }
            }
        }
    }
    wrap
}

impl Linker<'_> {
    fn display(&self, module: &ModuleRecord) -> String {
        if module.key.is_file() {
            relative_slash(Path::new(&module.key.path), self.cwd)
        } else {
            module.key.to_string()
        }
    }

    fn export_table(&mut self, module: &ModuleRecord) -> BTreeMap<String, ResolvedBinding> {
        let mut table = BTreeMap::new();
        if !module.is_esm() {
            return table;
        }
        for name in self.all_export_names(module.id, &mut HashSet::default()) {
            let mut trail = ResolutionTrail::default();
            let binding = match self.resolve_export(module.id, &name, &mut trail) {
                Ok(binding) => binding,
                Err(Cyclic) => {
                    self.report_cycle(module, &name);
                    ResolvedBinding::Missing
                }
            };
            if binding == ResolvedBinding::Missing {
                if let Some(err) = self.missing_reexport(module, &name) {
                    self.errors.push(err);
                }
            }
            table.insert(name, binding);
        }
        table
    }

    fn report_cycle(&mut self, module: &ModuleRecord, name: &str) {
        if self.reported.insert((module.id, name.to_string())) {
            self.errors.push(BundleError::Cycle {
                name: name.to_string(),
                path: module.key.to_string(),
            });
        }
    }

    /// `export { a } from "x"` where `x` is ESM and has no `a`.
    fn missing_reexport(&self, module: &ModuleRecord, name: &str) -> Option<BundleError> {
        if module.loader.is_typescript() || self.reported.contains(&(module.id, name.to_string())) {
            return None;
        }
        module.ast.exports.iter().find_map(|entry| match entry {
            ExportEntry::ReExport {
                exported,
                imported,
                site,
                ..
            } if exported == name => {
                let target = self.graph.get(module.records.get(*site)?.target?)?;
                target.is_esm().then(|| BundleError::MissingExport {
                    importer: module.key.to_string(),
                    module: self.display(target),
                    name: imported.clone(),
                })
            }
            _ => None,
        })
    }

    /// Every name `module` exports, including those pulled in by `export *`.
    fn all_export_names(&self, module: ModuleId, seen: &mut HashSet<ModuleId>) -> Vec<String> {
        if !seen.insert(module) {
            return Vec::new();
        }
        let record = self.graph.module(module);
        let mut names: Vec<String> = record.ast.export_names().map(str::to_string).collect();
        for entry in &record.ast.exports {
            let ExportEntry::Star { site, .. } = entry else { continue };
            let Some(target) = record.records.get(*site).and_then(|r| r.target) else { continue };
            if !self.graph.module(target).is_esm() {
                continue;
            }
            for name in self.all_export_names(target, seen) {
                if name != "default" && !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    fn resolve_export(
        &mut self,
        module: ModuleId,
        name: &str,
        trail: &mut ResolutionTrail,
    ) -> Result<ResolvedBinding, Cyclic> {
        let key = (module, name.to_string());
        if let Some(done) = self.memo.get(&key) {
            return done.clone().ok_or(Cyclic);
        }
        if trail.contains(module, name) {
            return Err(Cyclic);
        }
        trail.push(module, name);
        let skips = self.star_skips;
        let result = self.resolve_export_uncached(module, name, trail);
        trail.pop();
        if self.star_skips == skips {
            self.memo.insert(key, result.as_ref().ok().cloned());
        }
        result
    }

    fn resolve_export_uncached(
        &mut self,
        module: ModuleId,
        name: &str,
        trail: &mut ResolutionTrail,
    ) -> Result<ResolvedBinding, Cyclic> {
        let graph = self.graph;
        let record = graph.module(module);
        if !record.is_esm() {
            return Ok(ResolvedBinding::CommonJs {
                module,
                property: Some(name.to_string()),
            });
        }

        for entry in &record.ast.exports {
            match entry {
                ExportEntry::Local { exported, local, .. } if exported == name => {
                    return match record.ast.import_binding(local) {
                        Some((decl, binding)) => self.follow_import(record, decl.site, binding, trail),
                        None => Ok(ResolvedBinding::Local {
                            module,
                            local: local.clone(),
                        }),
                    };
                }
                ExportEntry::ReExport {
                    exported,
                    imported,
                    site,
                    ..
                } if exported == name => {
                    return self.follow_site(record, *site, imported, trail);
                }
                ExportEntry::ReExportNamespace { exported, site, .. } if exported == name => {
                    return Ok(namespace_of(record, *site));
                }
                _ => {}
            }
        }

        if name == "default" {
            return Ok(ResolvedBinding::Missing);
        }
        let mut fallback = ResolvedBinding::Missing;
        for entry in &record.ast.exports {
            let ExportEntry::Star { site, .. } = entry else { continue };
            let Some(import) = record.records.get(*site) else { continue };
            let Some(target) = import.target else {
                if let Some(specifier) = &import.external {
                    if fallback == ResolvedBinding::Missing {
                        fallback = ResolvedBinding::External {
                            specifier: specifier.clone(),
                            name: name.to_string(),
                        };
                    }
                }
                continue;
            };
            let target_record = graph.module(target);
            if !target_record.is_esm() {
                if fallback == ResolvedBinding::Missing {
                    fallback = ResolvedBinding::CommonJs {
                        module: target,
                        property: Some(name.to_string()),
                    };
                }
                continue;
            }
            // `export *` loops are legal; they only hide names.
            if trail.contains(target, name) {
                self.star_skips += 1;
                continue;
            }
            let found = self.resolve_export(target, name, trail)?;
            if found != ResolvedBinding::Missing {
                return Ok(found);
            }
        }
        Ok(fallback)
    }

    fn follow_import(
        &mut self,
        record: &ModuleRecord,
        site: usize,
        binding: &ImportBinding,
        trail: &mut ResolutionTrail,
    ) -> Result<ResolvedBinding, Cyclic> {
        match binding {
            ImportBinding::Namespace { .. } => Ok(namespace_of(record, site)),
            ImportBinding::Default { .. } => self.follow_site(record, site, "default", trail),
            ImportBinding::Named { imported, .. } => self.follow_site(record, site, imported, trail),
        }
    }

    fn follow_site(
        &mut self,
        record: &ModuleRecord,
        site: usize,
        name: &str,
        trail: &mut ResolutionTrail,
    ) -> Result<ResolvedBinding, Cyclic> {
        let Some(import) = record.records.get(site) else {
            return Ok(ResolvedBinding::Missing);
        };
        match (import.target, &import.external) {
            (Some(target), _) => self.resolve_export(target, name, trail),
            (None, Some(specifier)) => Ok(ResolvedBinding::External {
                specifier: specifier.clone(),
                name: name.to_string(),
            }),
            (None, None) => Ok(ResolvedBinding::Missing),
        }
    }

    fn link_imports(&mut self, module: &ModuleRecord) -> Vec<LinkedImport> {
        let interop = Interop::for_importer(module.node_esm);
        let mut out = Vec::new();
        for decl in &module.ast.imports {
            let target = module
                .records
                .get(decl.site)
                .and_then(|r| r.target)
                .map(|t| self.graph.module(t));
            for binding in &decl.bindings {
                let mut cjs_default = false;
                let mut trail = ResolutionTrail::default();
                let resolved = match (binding, target) {
                    (ImportBinding::Default { .. }, Some(t)) if !t.is_esm() => {
                        cjs_default = true;
                        Ok(ResolvedBinding::CommonJs {
                            module: t.id,
                            property: Some("default".to_string()),
                        })
                    }
                    (ImportBinding::Namespace { .. }, Some(t)) if !t.is_esm() => {
                        Ok(ResolvedBinding::CommonJs {
                            module: t.id,
                            property: None,
                        })
                    }
                    _ => self.follow_import(module, decl.site, binding, &mut trail),
                };
                let resolved = match resolved {
                    Ok(resolved) => resolved,
                    // Reported against the exporting module already.
                    Err(Cyclic) => ResolvedBinding::Missing,
                };
                if resolved == ResolvedBinding::Missing && !module.loader.is_typescript() {
                    if let (Some(t), ImportBinding::Default { .. } | ImportBinding::Named { .. }) =
                        (target, binding)
                    {
                        let name = match binding {
                            ImportBinding::Named { imported, .. } => imported.as_str(),
                            _ => "default",
                        };
                        if t.is_esm() && !self.reported.contains(&(t.id, name.to_string())) {
                            let error = BundleError::MissingExport {
                                importer: module.key.to_string(),
                                module: self.display(t),
                                name: name.to_string(),
                            };
                            self.errors.push(error);
                        }
                    }
                }
                out.push(LinkedImport {
                    local: binding.local().to_string(),
                    binding: resolved,
                    interop,
                    cjs_default,
                });
            }
        }
        out
    }
}

fn namespace_of(record: &ModuleRecord, site: usize) -> ResolvedBinding {
    match record.records.get(site) {
        Some(import) => match (import.target, &import.external) {
            (Some(module), _) => ResolvedBinding::Namespace { module },
            (None, Some(specifier)) => ResolvedBinding::External {
                specifier: specifier.clone(),
                name: "*".to_string(),
            },
            (None, None) => ResolvedBinding::Missing,
        },
        None => ResolvedBinding::Missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::graph::{ModuleKey, ModuleType};
    use crate::parse::{Loader, ModuleParser, ScanParser};
    use crate::bundler::graph::tests::module;

    /// Build a graph from `(path, source)` pairs; `./x` specifiers target `/x`.
    fn graph(files: &[(&str, &str)]) -> ModuleGraph {
        let mut graph = ModuleGraph::new();
        let index: HashMap<&str, usize> = files.iter().enumerate().map(|(i, (p, _))| (*p, i)).collect();
        for (i, (path, source)) in files.iter().enumerate() {
            let loader = if path.ends_with(".ts") { Loader::Ts } else { Loader::Js };
            let ast = ScanParser.parse(source, loader).unwrap();
            let mut record = module(path, &[]);
            record.key = ModuleKey::file(*path);
            record.loader = loader;
            record.module_type = if ast.has_esm_syntax {
                ModuleType::Esm
            } else if ast.uses_commonjs {
                ModuleType::Cjs
            } else {
                ModuleType::Esm
            };
            record.is_entry = i == 0;
            record.records = ast
                .import_sites
                .iter()
                .map(|site| {
                    let target = format!("/{}", site.specifier.trim_start_matches("./"));
                    let target = index.get(target.as_str()).copied();
                    crate::bundler::graph::ImportRecord {
                        specifier: site.specifier.clone(),
                        kind: site.kind,
                        attributes: site.attributes.clone(),
                        worker: site.worker,
                        stmt: site.stmt,
                        external: target.is_none().then(|| site.specifier.clone()),
                        target,
                    }
                })
                .collect();
            record.ast = ast;
            graph.add(record);
        }
        graph
    }

    fn cycle_names(errors: &[BundleError]) -> Vec<String> {
        let mut names: Vec<String> = errors
            .iter()
            .filter_map(|e| match e {
                BundleError::Cycle { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_trail_switches_to_set() {
        let mut trail = ResolutionTrail::default();
        for i in 0..LINEAR_SCAN_LIMIT - 1 {
            trail.push(i, "x");
        }
        assert!(!trail.is_indexed());
        assert!(trail.contains(3, "x"));
        trail.push(99, "y");
        assert!(trail.is_indexed());
        assert!(trail.contains(3, "x"));
        assert!(trail.contains(99, "y"));
        trail.pop();
        assert!(!trail.contains(99, "y"));
    }

    #[test]
    fn test_local_and_reexport() {
        let g = graph(&[
            ("/entry.js", "import { y } from './a.js';\nconsole.log(y);\n"),
            ("/a.js", "export { x as y } from './b.js';\n"),
            ("/b.js", "export const x = 42;\n"),
        ]);
        let linked = link(&g, Path::new("/")).unwrap();
        let expected = ResolvedBinding::Local {
            module: 2,
            local: "x".into(),
        };
        assert_eq!(linked.import(0, "y").unwrap().binding, expected);
        assert_eq!(linked.export(1, "y"), Some(&expected));
    }

    #[test]
    fn test_shallow_cycle_reports_each_name() {
        let g = graph(&[(
            "/entry.js",
            "export { a as b } from './entry.js';\nexport { b as c } from './entry.js';\nexport { c as d } from './entry.js';\nexport { d as a } from './entry.js';\n",
        )]);
        let errors = link(&g, Path::new("/")).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert_eq!(cycle_names(&errors), ["a", "b", "c", "d"]);
        assert!(errors
            .iter()
            .any(|e| e.to_string() == "Detected cycle while resolving import \"a\""));
    }

    #[test]
    fn test_deep_cycle_reports_each_name() {
        let names: Vec<String> = (0..11).map(|i| format!("n{i:02}")).collect();
        let source: String = (0..11)
            .map(|i| format!("export {{ {} as {} }} from './entry.js';\n", names[i], names[(i + 1) % 11]))
            .collect();
        let g = graph(&[("/entry.js", source.as_str())]);
        let errors = link(&g, Path::new("/")).unwrap_err();
        assert_eq!(errors.len(), 11);
        assert_eq!(cycle_names(&errors), names);
    }

    #[test]
    fn test_deep_chain_without_cycle() {
        let mut files: Vec<(String, String)> = vec![(
            "/entry.js".into(),
            "import { x } from './m0.js';\nconsole.log(x);\n".into(),
        )];
        for i in 0..8 {
            files.push((format!("/m{i}.js"), format!("export {{ x }} from './m{}.js';\n", i + 1)));
        }
        files.push(("/m8.js".into(), "export const x = 42;\n".into()));
        let borrowed: Vec<(&str, &str)> = files.iter().map(|(p, s)| (p.as_str(), s.as_str())).collect();
        let g = graph(&borrowed);
        let linked = link(&g, Path::new("/")).unwrap();
        assert_eq!(
            linked.import(0, "x").unwrap().binding,
            ResolvedBinding::Local {
                module: 9,
                local: "x".into()
            }
        );
    }

    #[test]
    fn test_missing_export_message() {
        let g = graph(&[
            ("/src/entry.js", "import { nope } from './src/lib.js';\nnope();\n"),
            ("/src/lib.js", "export const yes = 1;\n"),
        ]);
        let errors = link(&g, Path::new("/")).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].to_string(),
            "No matching export in \"src/lib.js\" for import \"nope\""
        );
    }

    #[test]
    fn test_typescript_importer_exempt() {
        let g = graph(&[
            ("/entry.ts", "import { Shape } from './types.ts';\nlet s: Shape;\n"),
            ("/types.ts", "export const unrelated = 1;\n"),
        ]);
        let linked = link(&g, Path::new("/")).unwrap();
        assert_eq!(linked.import(0, "Shape").unwrap().binding, ResolvedBinding::Missing);
    }

    #[test]
    fn test_star_exports_and_cjs() {
        let g = graph(&[
            (
                "/entry.js",
                "import lib, { named } from './lib.js';\nimport { z } from './barrel.js';\nconsole.log(lib, named, z);\n",
            ),
            ("/lib.js", "exports.named = 1;\n"),
            ("/barrel.js", "export * from './z.js';\nexport * from './barrel.js';\n"),
            ("/z.js", "export const z = 1;\n"),
        ]);
        let linked = link(&g, Path::new("/")).unwrap();
        let lib = linked.import(0, "lib").unwrap();
        assert!(lib.cjs_default);
        assert_eq!(lib.interop, Interop::Babel);
        assert_eq!(
            linked.import(0, "named").unwrap().binding,
            ResolvedBinding::CommonJs {
                module: 1,
                property: Some("named".into())
            }
        );
        assert_eq!(
            linked.import(0, "z").unwrap().binding,
            ResolvedBinding::Local {
                module: 3,
                local: "z".into()
            }
        );
        assert_eq!(linked.wrap[1], WrapKind::Cjs);
        assert_eq!(linked.wrap[3], WrapKind::None);
    }

    #[test]
    fn test_star_loop_does_not_hide_names() {
        let g = graph(&[
            (
                "/entry.js",
                "import './barrel1.js';\nimport { z } from './barrel2.js';\nconsole.log(z);\n",
            ),
            ("/barrel1.js", "export * from './barrel2.js';\nexport * from './z.js';\n"),
            ("/barrel2.js", "export * from './barrel1.js';\n"),
            ("/z.js", "export const z = 1;\n"),
        ]);
        let linked = link(&g, Path::new("/")).unwrap();
        let expected = ResolvedBinding::Local {
            module: 3,
            local: "z".into(),
        };
        assert_eq!(linked.import(0, "z").unwrap().binding, expected);
        assert_eq!(linked.export(1, "z"), Some(&expected));
        assert_eq!(linked.export(2, "z"), Some(&expected));
    }

    #[test]
    fn test_required_esm_is_wrapped() {
        let g = graph(&[
            ("/entry.js", "const m = require('./m.js');\nconsole.log(m);\n"),
            ("/m.js", "export const v = 1;\n"),
        ]);
        let linked = link(&g, Path::new("/")).unwrap();
        assert_eq!(linked.wrap[1], WrapKind::Esm);
    }
}
