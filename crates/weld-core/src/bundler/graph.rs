//! Module dependency graph.
//!
//! An arena of [`ModuleRecord`]s indexed by [`ModuleId`]. Import records point at
//! target ids, so cyclic imports need no shared ownership.

use crate::parse::{ImportKind, Loader, ModuleAst};
use rustc_hash::FxHashMap as HashMap;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::PathBuf;

/// Unique identifier for a module in the graph.
pub type ModuleId = usize;

/// `(namespace, path)`: identity of a loaded module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleKey {
    pub namespace: String,
    pub path: String,
}

impl ModuleKey {
    pub const FILE: &'static str = "file";

    pub fn new(namespace: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            path: path.into(),
        }
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self::new(Self::FILE, path)
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.namespace == Self::FILE
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_file() {
            f.write_str(&self.path)
        } else {
            write!(f, "{}:{}", self.namespace, self.path)
        }
    }
}

/// How a module's exports are shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
    Esm,
    Cjs,
    /// Neither ESM syntax nor CommonJS markers.
    Unknown,
}

/// One edge out of a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    /// The specifier as written.
    pub specifier: String,
    pub kind: ImportKind,
    pub attributes: BTreeMap<String, String>,
    /// `new Worker(...)` target.
    pub worker: bool,
    /// Statement containing the import.
    pub stmt: usize,
    pub target: Option<ModuleId>,
    /// Set for imports left in the output.
    pub external: Option<String>,
}

/// A loaded, parsed module. Immutable once the graph is built.
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    pub id: ModuleId,
    pub key: ModuleKey,
    pub source: String,
    pub loader: Loader,
    pub ast: ModuleAst,
    pub module_type: ModuleType,
    /// `.mjs`/`.mts`, or `.js`/`.ts` under `"type": "module"`: `__esModule` is ignored
    /// when this module default-imports CommonJS.
    pub node_esm: bool,
    /// False when the enclosing package's `sideEffects` rules this file out.
    pub has_side_effects: bool,
    pub resolve_dir: PathBuf,
    pub records: Vec<ImportRecord>,
    pub is_entry: bool,
}

impl ModuleRecord {
    #[must_use]
    pub fn is_esm(&self) -> bool {
        self.module_type == ModuleType::Esm
    }

    /// Targets of static imports and requires (not dynamic imports or workers).
    pub fn static_dependencies(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.records
            .iter()
            .filter(|r| !r.worker && r.kind != ImportKind::DynamicImport)
            .filter_map(|r| r.target)
    }
}

/// The module dependency graph.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    modules: Vec<ModuleRecord>,
    key_to_id: HashMap<ModuleKey, ModuleId>,
    entries: Vec<ModuleId>,
}

impl ModuleGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module, assigning the next id.
    pub fn add(&mut self, mut module: ModuleRecord) -> ModuleId {
        let id = self.modules.len();
        module.id = id;
        if module.is_entry {
            self.entries.push(id);
        }
        self.key_to_id.insert(module.key.clone(), id);
        self.modules.push(module);
        id
    }

    #[must_use]
    pub fn get(&self, id: ModuleId) -> Option<&ModuleRecord> {
        self.modules.get(id)
    }

    /// The module with this id. Ids come from this graph, so this is an arena index.
    #[must_use]
    pub fn module(&self, id: ModuleId) -> &ModuleRecord {
        &self.modules[id]
    }

    #[must_use]
    pub fn id_of(&self, key: &ModuleKey) -> Option<ModuleId> {
        self.key_to_id.get(key).copied()
    }

    #[must_use]
    pub fn entries(&self) -> &[ModuleId] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleRecord> {
        self.modules.iter()
    }

    /// Modules in dependency order (dependencies before dependents).
    ///
    /// Cycles are legal in JavaScript; modules left over by Kahn's algorithm are
    /// appended in id order.
    #[must_use]
    pub fn toposort(&self) -> Vec<ModuleId> {
        let n = self.modules.len();
        let mut in_degree = vec![0usize; n];
        let mut dependents: Vec<Vec<ModuleId>> = vec![Vec::new(); n];

        for module in &self.modules {
            for dep in module.static_dependencies() {
                if dep != module.id {
                    dependents[dep].push(module.id);
                    in_degree[module.id] += 1;
                }
            }
        }

        let mut queue: VecDeque<ModuleId> = (0..n).filter(|&id| in_degree[id] == 0).collect();
        let mut order = Vec::with_capacity(n);
        let mut placed = vec![false; n];
        while let Some(id) = queue.pop_front() {
            order.push(id);
            placed[id] = true;
            for &next in &dependents[id] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        order.extend((0..n).filter(|&id| !placed[id]));
        order
    }
}
