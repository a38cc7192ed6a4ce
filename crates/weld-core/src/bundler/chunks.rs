//! Code splitting and chunk generation.
//!
//! Entry points and `new Worker(...)` targets always root a chunk; with
//! `splitting`, so do `import()` targets. Under splitting, a module reached from
//! more than one root moves into a shared chunk that every one of those roots
//! imports. Without it, each root carries everything it reaches and dynamic
//! imports are inlined.

use super::graph::{ModuleGraph, ModuleId, ModuleRecord};
use super::link::LinkedGraph;
use super::treeshake::Liveness;
use crate::config::BuildConfig;
use crate::error::BundleError;
use crate::parse::ImportKind;
use rustc_hash::FxHashMap as HashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use weld_util::hash::ContentHasher;
use weld_util::path::{common_ancestor, relative_slash};

/// Unique identifier for a chunk.
pub type ChunkId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Entry,
    Worker,
    /// Rooted at an `import()` target.
    Dynamic,
    /// Modules common to several roots.
    Shared,
}

/// A group of modules emitted to one output file.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub kind: ChunkKind,
    /// Human-readable chunk name, the `[name]` placeholder.
    pub name: String,
    /// Root module; `None` for shared chunks.
    pub entry: Option<ModuleId>,
    /// Modules in dependency order.
    pub modules: Vec<ModuleId>,
    /// Chunks that must be loaded first.
    pub imports: Vec<ChunkId>,
    /// Chunks loaded on demand (`import()`, workers).
    pub dynamic_imports: Vec<ChunkId>,
    /// Export names of the root module, for entry chunks.
    pub exports: Vec<String>,
    /// Output path relative to `cwd`, with forward slashes.
    pub output: String,
}

/// Result of code splitting.
#[derive(Debug, Default)]
pub struct ChunkGraph {
    chunks: Vec<Chunk>,
    root_chunk: HashMap<ModuleId, ChunkId>,
}

impl ChunkGraph {
    #[must_use]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// The chunk rooted at `module`, if it is a root.
    #[must_use]
    pub fn chunk_for_root(&self, module: ModuleId) -> Option<&Chunk> {
        self.root_chunk.get(&module).map(|&id| &self.chunks[id])
    }

    /// The chunks a module was placed in. Several without splitting.
    pub fn chunks_containing(&self, module: ModuleId) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter().filter(move |c| c.modules.contains(&module))
    }

    #[must_use]
    pub fn has_splits(&self) -> bool {
        self.chunks.len() > 1
    }
}

/// Split the shaken graph into chunks and name their output files.
pub fn compute_chunks(
    graph: &ModuleGraph,
    linked: &LinkedGraph,
    liveness: &Liveness,
    config: &BuildConfig,
) -> Result<ChunkGraph, BundleError> {
    let roots = find_roots(graph, liveness, config.splitting);
    let order: Vec<usize> = {
        let mut position = vec![0; graph.len()];
        for (i, id) in graph.toposort().into_iter().enumerate() {
            position[id] = i;
        }
        position
    };

    let mut chunk_graph = ChunkGraph::default();
    for &(module, kind) in &roots {
        let id = chunk_graph.chunks.len();
        chunk_graph.root_chunk.insert(module, id);
        chunk_graph.chunks.push(Chunk {
            id,
            kind,
            name: chunk_name(graph.module(module)),
            entry: Some(module),
            modules: Vec::new(),
            imports: Vec::new(),
            dynamic_imports: Vec::new(),
            exports: if kind == ChunkKind::Entry {
                linked.exports[module].keys().cloned().collect()
            } else {
                Vec::new()
            },
            output: String::new(),
        });
    }

    if config.splitting {
        assign_shared(&mut chunk_graph, graph, liveness, &roots);
    } else {
        for &(root, _) in &roots {
            let id = chunk_graph.root_chunk[&root];
            chunk_graph.chunks[id].modules = reachable(graph, liveness, root, false, |_| false);
        }
    }

    for chunk in &mut chunk_graph.chunks {
        chunk.modules.sort_by_key(|&m| order[m]);
        chunk.modules.dedup();
    }
    link_chunks(&mut chunk_graph, graph, config.splitting);
    name_outputs(&mut chunk_graph, graph, liveness, config)?;

    debug!(chunks = chunk_graph.chunks.len(), "chunks computed");
    Ok(chunk_graph)
}

/// Entries first, in entry order, then workers and dynamic targets in id order.
fn find_roots(graph: &ModuleGraph, liveness: &Liveness, splitting: bool) -> Vec<(ModuleId, ChunkKind)> {
    let mut roots: Vec<(ModuleId, ChunkKind)> =
        graph.entries().iter().map(|&e| (e, ChunkKind::Entry)).collect();
    for module in graph.iter() {
        if !liveness.is_included(module.id) {
            continue;
        }
        for record in &module.records {
            let Some(target) = record.target else { continue };
            let kind = if record.worker {
                ChunkKind::Worker
            } else if splitting && record.kind == ImportKind::DynamicImport {
                ChunkKind::Dynamic
            } else {
                continue;
            };
            if !roots.iter().any(|(m, _)| *m == target) {
                roots.push((target, kind));
            }
        }
    }
    roots
}

/// Included modules reachable from `start` without crossing into a worker.
/// `stop` marks other roots the walk must not enter.
fn reachable(
    graph: &ModuleGraph,
    liveness: &Liveness,
    start: ModuleId,
    splitting: bool,
    stop: impl Fn(ModuleId) -> bool,
) -> Vec<ModuleId> {
    let mut seen = vec![false; graph.len()];
    let mut out = Vec::new();
    let mut stack = vec![start];
    while let Some(id) = stack.pop() {
        if seen[id] {
            continue;
        }
        seen[id] = true;
        if id != start && stop(id) {
            continue;
        }
        out.push(id);
        for record in &graph.module(id).records {
            let Some(target) = record.target else { continue };
            if record.worker || (splitting && record.kind == ImportKind::DynamicImport) {
                continue;
            }
            if liveness.is_included(target) && !seen[target] {
                stack.push(target);
            }
        }
    }
    out
}

/// Each module goes to the chunk of the single root that reaches it, or to a
/// shared chunk keyed by the full set of roots that do.
fn assign_shared(
    chunk_graph: &mut ChunkGraph,
    graph: &ModuleGraph,
    liveness: &Liveness,
    roots: &[(ModuleId, ChunkKind)],
) {
    let is_root: Vec<bool> = {
        let mut v = vec![false; graph.len()];
        for &(m, _) in roots {
            v[m] = true;
        }
        v
    };
    let mut reached_by: Vec<Vec<ChunkId>> = vec![Vec::new(); graph.len()];
    for &(root, _) in roots {
        let chunk = chunk_graph.root_chunk[&root];
        for m in reachable(graph, liveness, root, true, |m| is_root[m]) {
            reached_by[m].push(chunk);
        }
    }

    let mut shared: BTreeMap<Vec<ChunkId>, ChunkId> = BTreeMap::new();
    for (module, owners) in reached_by.iter().enumerate() {
        if is_root[module] {
            let chunk = chunk_graph.root_chunk[&module];
            chunk_graph.chunks[chunk].modules.push(module);
            continue;
        }
        match owners.as_slice() {
            [] => {}
            [only] => chunk_graph.chunks[*only].modules.push(module),
            many => {
                let id = *shared.entry(many.to_vec()).or_insert_with(|| {
                    let id = chunk_graph.chunks.len();
                    chunk_graph.chunks.push(Chunk {
                        id,
                        kind: ChunkKind::Shared,
                        name: "chunk".to_string(),
                        entry: None,
                        modules: Vec::new(),
                        imports: Vec::new(),
                        dynamic_imports: Vec::new(),
                        exports: Vec::new(),
                        output: String::new(),
                    });
                    id
                });
                chunk_graph.chunks[id].modules.push(module);
            }
        }
    }
}

/// Fill in static and dynamic chunk edges from module import records.
fn link_chunks(chunk_graph: &mut ChunkGraph, graph: &ModuleGraph, splitting: bool) {
    let mut owner: HashMap<ModuleId, ChunkId> = HashMap::default();
    if splitting {
        for chunk in &chunk_graph.chunks {
            for &m in &chunk.modules {
                owner.insert(m, chunk.id);
            }
        }
    }
    for chunk in &mut chunk_graph.chunks {
        let mut imports = Vec::new();
        let mut dynamic = Vec::new();
        for &m in &chunk.modules {
            for record in &graph.module(m).records {
                let Some(target) = record.target else { continue };
                if record.worker || (splitting && record.kind == ImportKind::DynamicImport) {
                    if let Some(&root) = chunk_graph.root_chunk.get(&target) {
                        dynamic.push(root);
                    }
                } else if let Some(&other) = owner.get(&target) {
                    if other != chunk.id {
                        imports.push(other);
                    }
                }
            }
        }
        imports.sort_unstable();
        imports.dedup();
        dynamic.sort_unstable();
        dynamic.dedup();
        chunk.imports = imports;
        chunk.dynamic_imports = dynamic;
    }
}

fn chunk_name(module: &ModuleRecord) -> String {
    Path::new(&module.key.path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("chunk")
        .to_string()
}

fn name_outputs(
    chunk_graph: &mut ChunkGraph,
    graph: &ModuleGraph,
    liveness: &Liveness,
    config: &BuildConfig,
) -> Result<(), BundleError> {
    let outbase = match &config.outbase {
        Some(base) => config.absolute(base),
        None => {
            let dirs: Vec<PathBuf> = graph
                .entries()
                .iter()
                .map(|&e| graph.module(e))
                .filter(|m| m.key.is_file())
                .filter_map(|m| Path::new(&m.key.path).parent().map(Path::to_path_buf))
                .collect();
            common_ancestor(dirs.iter().map(PathBuf::as_path)).unwrap_or_else(|| config.cwd.clone())
        }
    };
    let outdir = config
        .outdir
        .as_deref()
        .map_or_else(|| config.cwd.clone(), |dir| config.absolute(dir));

    let mut taken: BTreeMap<String, String> = BTreeMap::new();
    for chunk in &mut chunk_graph.chunks {
        let path = match (chunk.kind, &config.outfile) {
            (ChunkKind::Entry, Some(outfile)) => config.absolute(outfile),
            _ => {
                let template = if chunk.kind == ChunkKind::Entry {
                    &config.entry_names
                } else {
                    &config.chunk_names
                };
                let dir = chunk
                    .entry
                    .map(|e| graph.module(e))
                    .filter(|m| m.key.is_file())
                    .and_then(|m| Path::new(&m.key.path).parent().map(|d| relative_slash(d, &outbase)))
                    .unwrap_or_default();
                let hash = content_hash(chunk, graph, liveness);
                outdir.join(render_template(template, &dir, &chunk.name, "js", &hash))
            }
        };
        let output = relative_slash(&path, &config.cwd);
        let input = chunk
            .entry
            .map_or_else(|| chunk.name.clone(), |e| graph.module(e).key.to_string());
        if let Some(previous) = taken.insert(output.clone(), input.clone()) {
            return Err(BundleError::OutputCollision {
                output,
                inputs: vec![previous, input],
            });
        }
        chunk.output = output;
    }
    Ok(())
}

fn content_hash(chunk: &Chunk, graph: &ModuleGraph, liveness: &Liveness) -> String {
    let mut hasher = ContentHasher::new();
    for &m in &chunk.modules {
        let module = graph.module(m);
        hasher
            .part(module.key.to_string().as_bytes())
            .part(&(liveness.live_bytes(module) as u64).to_le_bytes())
            .part(module.source.as_bytes());
    }
    hasher.finish_prefix(8)
}

/// Expand `[dir]`, `[name]`, `[ext]` and `[hash]`, dropping empty segments.
fn render_template(template: &str, dir: &str, name: &str, ext: &str, hash: &str) -> String {
    let rendered = template
        .replace("[dir]", dir)
        .replace("[name]", name)
        .replace("[ext]", ext)
        .replace("[hash]", hash);
    rendered
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}
