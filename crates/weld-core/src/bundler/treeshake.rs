//! Tree shaking (dead code elimination).
//!
//! Works at top-level statement granularity on the linked graph.
//!
//! ## How it works
//!
//! 1. Every export of an entry point is used (public API).
//! 2. A live statement makes live whatever it references: local declarations,
//!    or through the linker, the declarations its imports bind to.
//! 3. `ns.prop` on a namespace import demands only `prop`.
//! 4. A module is evaluated for its side effects unless its package says
//!    `"sideEffects": false` (or a glob list that misses it); such a module is
//!    dropped entirely when nothing it exports is used.
//! 5. CommonJS is opaque: a reached CommonJS module is kept whole.

use super::graph::{ModuleGraph, ModuleId, ModuleRecord};
use super::link::{LinkedGraph, ResolvedBinding};
use crate::parse::{ImportBinding, ImportKind, StatementKind};
use rustc_hash::FxHashSet as HashSet;
use tracing::debug;

/// Which modules and statements survive.
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    included: Vec<bool>,
    whole: Vec<bool>,
    live: Vec<Vec<bool>>,
}

impl Liveness {
    #[must_use]
    pub fn is_included(&self, module: ModuleId) -> bool {
        self.included.get(module).copied().unwrap_or(false)
    }

    #[must_use]
    pub fn is_live(&self, module: ModuleId, stmt: usize) -> bool {
        self.is_included(module)
            && (self.whole[module] || self.live[module].get(stmt).copied().unwrap_or(false))
    }

    /// Included modules in id order.
    pub fn included(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.included
            .iter()
            .enumerate()
            .filter(|(_, &inc)| inc)
            .map(|(id, _)| id)
    }

    /// Source bytes this module contributes to the output.
    #[must_use]
    pub fn live_bytes(&self, module: &ModuleRecord) -> usize {
        if !self.is_included(module.id) {
            return 0;
        }
        if self.whole[module.id] || !module.loader.is_script() {
            return module.source.len();
        }
        module
            .ast
            .statements
            .iter()
            .enumerate()
            .filter(|(i, s)| s.kind != StatementKind::Type && self.live[module.id][*i])
            .map(|(_, s)| s.len())
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Work {
    /// Evaluate the module: its side effects run.
    Evaluate(ModuleId),
    /// Keep the module whole.
    Whole(ModuleId),
    Stmt(ModuleId, usize),
    Export(ModuleId, String),
    AllExports(ModuleId),
    Binding(ResolvedBinding),
}

struct Shaker<'a> {
    graph: &'a ModuleGraph,
    linked: &'a LinkedGraph,
    out: Liveness,
    done: HashSet<Work>,
    queue: Vec<Work>,
}

/// Compute liveness. With `treeshake` off, every reachable module is kept whole.
pub fn shake(graph: &ModuleGraph, linked: &LinkedGraph, treeshake: bool) -> Liveness {
    let n = graph.len();
    let mut shaker = Shaker {
        graph,
        linked,
        out: Liveness {
            included: vec![false; n],
            whole: vec![false; n],
            live: graph.iter().map(|m| vec![false; m.ast.statements.len()]).collect(),
        },
        done: HashSet::default(),
        queue: Vec::new(),
    };

    for &entry in graph.entries() {
        if treeshake {
            shaker.push(Work::Evaluate(entry));
            shaker.push(Work::AllExports(entry));
        } else {
            shaker.push(Work::Whole(entry));
        }
    }
    shaker.run(treeshake);

    shaker.mark_imports();
    let out = shaker.out;
    debug!(
        included = out.included().count(),
        modules = n,
        "tree shaking done"
    );
    out
}

impl Shaker<'_> {
    fn push(&mut self, work: Work) {
        if !self.done.contains(&work) {
            self.done.insert(work.clone());
            self.queue.push(work);
        }
    }

    fn run(&mut self, treeshake: bool) {
        while let Some(work) = self.queue.pop() {
            match work {
                Work::Evaluate(m) if !treeshake || !self.graph.module(m).is_esm() => {
                    self.push(Work::Whole(m));
                }
                Work::Evaluate(m) => self.evaluate(m),
                Work::Whole(m) => self.whole(m),
                Work::Stmt(m, s) => self.statement(m, s),
                Work::Export(m, name) => self.export(m, &name),
                Work::AllExports(m) => {
                    if !self.graph.module(m).is_esm() {
                        self.push(Work::Whole(m));
                        continue;
                    }
                    let names: Vec<String> = self.linked.exports[m].keys().cloned().collect();
                    for name in names {
                        self.push(Work::Export(m, name));
                    }
                }
                Work::Binding(binding) => self.binding(binding),
            }
        }
    }

    fn include(&mut self, m: ModuleId) {
        if !self.out.included[m] {
            self.out.included[m] = true;
            // Once anything of a module is used, the module runs, side effects and all.
            let module = self.graph.module(m);
            for (i, stmt) in module.ast.statements.iter().enumerate() {
                if stmt.side_effects {
                    self.push(Work::Stmt(m, i));
                }
            }
            for record in &module.records {
                if let Some(target) = record.target {
                    if record.kind == ImportKind::ImportStatement && !record.worker {
                        self.push(Work::Evaluate(target));
                    }
                }
            }
        }
    }

    fn evaluate(&mut self, m: ModuleId) {
        if self.graph.module(m).has_side_effects {
            self.include(m);
        }
    }

    fn whole(&mut self, m: ModuleId) {
        self.out.whole[m] = true;
        self.include(m);
        let module = self.graph.module(m);
        for record in &module.records {
            if let Some(target) = record.target {
                match record.kind {
                    ImportKind::ImportStatement if !record.worker => {
                        self.push(Work::Evaluate(target));
                        if self.graph.module(target).is_esm() {
                            self.push(Work::AllExports(target));
                        }
                    }
                    _ => {
                        self.push(Work::Whole(target));
                        self.push(Work::AllExports(target));
                    }
                }
            }
        }
    }

    fn statement(&mut self, m: ModuleId, s: usize) {
        let module = self.graph.module(m);
        let Some(stmt) = module.ast.statements.get(s) else { return };
        if stmt.kind == StatementKind::Type {
            return;
        }
        self.include(m);
        self.out.live[m][s] = true;

        for reference in &stmt.refs {
            if let Some((_, binding)) = module.ast.import_binding(&reference.name) {
                if let (ImportBinding::Namespace { .. }, Some(property)) = (binding, &reference.property) {
                    if let Some(ResolvedBinding::Namespace { module: target }) =
                        self.linked.import(m, &reference.name).map(|i| &i.binding)
                    {
                        self.push(Work::Export(*target, property.clone()));
                        continue;
                    }
                }
                if let Some(linked) = self.linked.import(m, &reference.name) {
                    self.push(Work::Binding(linked.binding.clone()));
                }
                continue;
            }
            for decl in module.ast.declaring(&reference.name) {
                self.push(Work::Stmt(m, decl));
            }
        }

        // require(), import() and workers inside a live statement pull their target in whole.
        for record in &module.records {
            if record.stmt != s {
                continue;
            }
            if let Some(target) = record.target {
                if record.kind != ImportKind::ImportStatement || record.worker {
                    self.push(Work::Evaluate(target));
                    self.push(Work::Whole(target));
                    self.push(Work::AllExports(target));
                }
            }
        }
    }

    fn export(&mut self, m: ModuleId, name: &str) {
        let module = self.graph.module(m);
        if !module.is_esm() {
            self.push(Work::Whole(m));
            return;
        }
        // the export clause itself (`export { a as b }`, `export const x`)
        for entry in &module.ast.exports {
            if entry.exported() == Some(name)
                && matches!(
                    module.ast.statements.get(entry.stmt()).map(|s| s.kind),
                    Some(StatementKind::Export | StatementKind::Declaration)
                )
            {
                self.push(Work::Stmt(m, entry.stmt()));
            }
        }
        if let Some(binding) = self.linked.export(m, name) {
            self.push(Work::Binding(binding.clone()));
        }
    }

    fn binding(&mut self, binding: ResolvedBinding) {
        match binding {
            ResolvedBinding::Local { module, local } => {
                let decls: Vec<usize> = self.graph.module(module).ast.declaring(&local).collect();
                for decl in decls {
                    self.push(Work::Stmt(module, decl));
                }
            }
            ResolvedBinding::Namespace { module } => {
                self.push(Work::Evaluate(module));
                self.push(Work::AllExports(module));
            }
            ResolvedBinding::CommonJs { module, .. } => self.push(Work::Whole(module)),
            ResolvedBinding::External { .. } | ResolvedBinding::Missing => {}
        }
    }

    /// Import statements survive when the module they import does.
    fn mark_imports(&mut self) {
        for module in self.graph.iter() {
            if !self.out.included[module.id] || self.out.whole[module.id] {
                continue;
            }
            for record in &module.records {
                let keep = match record.target {
                    Some(target) => self.out.included[target],
                    None => record.external.is_some(),
                };
                if keep && record.kind == ImportKind::ImportStatement {
                    if let Some(slot) = self.out.live[module.id].get_mut(record.stmt) {
                        *slot = true;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::graph::{ImportRecord, ModuleKey, ModuleType};
    use crate::bundler::link::link;
    use crate::parse::{Loader, ModuleParser, ScanParser};
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};

    struct Spec<'a> {
        path: &'a str,
        source: &'a str,
        side_effects: bool,
    }

    fn file<'a>(path: &'a str, source: &'a str) -> Spec<'a> {
        Spec {
            path,
            source,
            side_effects: true,
        }
    }

    fn pure<'a>(path: &'a str, source: &'a str) -> Spec<'a> {
        Spec {
            path,
            source,
            side_effects: false,
        }
    }

    fn build(files: &[Spec<'_>]) -> ModuleGraph {
        let mut graph = ModuleGraph::new();
        for (i, spec) in files.iter().enumerate() {
            let ast = ScanParser.parse(spec.source, Loader::Js).unwrap();
            let records = ast
                .import_sites
                .iter()
                .map(|site| {
                    let wanted = format!("/{}", site.specifier.trim_start_matches("./"));
                    ImportRecord {
                        specifier: site.specifier.clone(),
                        kind: site.kind,
                        attributes: BTreeMap::new(),
                        worker: site.worker,
                        stmt: site.stmt,
                        target: files.iter().position(|f| f.path == wanted),
                        external: None,
                    }
                })
                .collect();
            graph.add(ModuleRecord {
                id: 0,
                key: ModuleKey::file(spec.path),
                source: spec.source.to_string(),
                loader: Loader::Js,
                module_type: if ast.uses_commonjs && !ast.has_esm_syntax {
                    ModuleType::Cjs
                } else {
                    ModuleType::Esm
                },
                ast,
                node_esm: false,
                has_side_effects: spec.side_effects,
                resolve_dir: PathBuf::from("/"),
                records,
                is_entry: i == 0,
            });
        }
        graph
    }

    fn shaken(graph: &ModuleGraph) -> Liveness {
        let linked = link(graph, Path::new("/")).unwrap();
        shake(graph, &linked, true)
    }

    #[test]
    fn test_unused_pure_module_dropped() {
        let g = build(&[
            file("/entry.js", "import { used } from './lib.js';\nconsole.log(used);\n"),
            pure("/lib.js", "export { unused } from './unused.js';\nexport const used = 1;\n"),
            pure("/unused.js", "console.log('side effect');\nexport const unused = 2;\n"),
        ]);
        let live = shaken(&g);
        assert!(live.is_included(0));
        assert!(live.is_included(1));
        assert!(!live.is_included(2));
    }

    #[test]
    fn test_used_pure_module_keeps_side_effects() {
        let g = build(&[
            file("/entry.js", "import { unused } from './unused.js';\nconsole.log(unused);\n"),
            pure("/unused.js", "console.log('side effect');\nexport const unused = 2;\n"),
        ]);
        let live = shaken(&g);
        assert!(live.is_included(1));
        assert!(live.is_live(1, 0));
        assert!(live.is_live(1, 1));
    }

    #[test]
    fn test_side_effect_import_kept() {
        let g = build(&[
            file("/entry.js", "import './polyfill.js';\n"),
            file("/polyfill.js", "globalThis.x = 1;\nconst dead = 2;\n"),
        ]);
        let live = shaken(&g);
        assert!(live.is_included(1));
        assert!(live.is_live(1, 0));
        assert!(!live.is_live(1, 1));
        assert!(live.is_live(0, 0));
    }

    #[test]
    fn test_namespace_property_read() {
        let g = build(&[
            file("/entry.js", "import * as ns from './lib.js';\nconsole.log(ns.a);\n"),
            file("/lib.js", "export const a = 1;\nexport const b = 2;\n"),
        ]);
        let live = shaken(&g);
        assert!(live.is_live(1, 0));
        assert!(!live.is_live(1, 1));
    }

    #[test]
    fn test_destructuring_never_dropped() {
        let g = build(&[file(
            "/entry.js",
            "const obj = {};\nconst { a } = obj;\nconst unused = 1;\n",
        )]);
        let live = shaken(&g);
        assert!(live.is_live(0, 1));
        assert!(live.is_live(0, 0));
        assert!(!live.is_live(0, 2));
    }

    #[test]
    fn test_commonjs_kept_whole() {
        let g = build(&[
            file("/entry.js", "const b = require('./b.js');\nconsole.log(b.message);\n"),
            file("/b.js", "module.exports = { message: 'hi' };\nfunction unused() {}\n"),
        ]);
        let live = shaken(&g);
        assert!(live.is_included(1));
        assert_eq!(live.live_bytes(g.module(1)), g.module(1).source.len());
    }

    #[test]
    fn test_treeshake_off_keeps_everything() {
        let g = build(&[
            file("/entry.js", "import { a } from './lib.js';\nconst dead = 1;\n"),
            pure("/lib.js", "export const a = 1;\nexport const b = 2;\n"),
        ]);
        let linked = link(&g, Path::new("/")).unwrap();
        let live = shake(&g, &linked, false);
        assert!(live.is_live(0, 1));
        assert!(live.is_live(1, 1));
    }
}
