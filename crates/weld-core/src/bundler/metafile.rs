//! Build metadata (`--metafile`), in the layout bundle analyzers expect.

use super::chunks::ChunkGraph;
use super::graph::{ModuleGraph, ModuleRecord, ModuleType};
use super::treeshake::Liveness;
use crate::parse::ImportKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use weld_util::path::relative_slash;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metafile {
    pub inputs: BTreeMap<String, MetafileInput>,
    pub outputs: BTreeMap<String, MetafileOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetafileInput {
    pub bytes: usize,
    pub imports: Vec<MetafileImport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetafileImport {
    pub path: String,
    pub kind: ImportKind,
    /// The specifier as written, when it differs from `path`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub with: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub external: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetafileOutput {
    pub bytes: usize,
    pub inputs: BTreeMap<String, OutputInput>,
    pub imports: Vec<MetafileImport>,
    pub exports: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputInput {
    pub bytes_in_output: usize,
}

/// Metafile key of a module: cwd-relative for files, `namespace:path` otherwise.
fn input_key(module: &ModuleRecord, cwd: &Path) -> String {
    if module.key.is_file() {
        relative_slash(Path::new(&module.key.path), cwd)
    } else {
        module.key.to_string()
    }
}

impl Metafile {
    #[must_use]
    pub fn build(graph: &ModuleGraph, liveness: &Liveness, chunks: &ChunkGraph, cwd: &Path) -> Self {
        let mut meta = Self::default();

        for module in graph.iter() {
            let imports = module
                .records
                .iter()
                .filter_map(|record| {
                    let (path, external) = match (record.target, &record.external) {
                        (Some(target), _) => (input_key(graph.module(target), cwd), false),
                        (None, Some(specifier)) => (specifier.clone(), true),
                        (None, None) => return None,
                    };
                    Some(MetafileImport {
                        original: (path != record.specifier).then(|| record.specifier.clone()),
                        path,
                        kind: record.kind,
                        with: record.attributes.clone(),
                        external,
                    })
                })
                .collect();
            let format = match module.module_type {
                ModuleType::Esm => Some("esm".to_string()),
                ModuleType::Cjs => Some("cjs".to_string()),
                ModuleType::Unknown => None,
            };
            meta.inputs.insert(
                input_key(module, cwd),
                MetafileInput {
                    bytes: module.source.len(),
                    imports,
                    format,
                },
            );
        }

        for chunk in chunks.chunks() {
            let mut inputs = BTreeMap::new();
            let mut bytes = 0;
            let mut imports = Vec::new();
            for &m in &chunk.modules {
                let module = graph.module(m);
                let live = liveness.live_bytes(module);
                bytes += live;
                inputs.insert(input_key(module, cwd), OutputInput { bytes_in_output: live });
                for record in &module.records {
                    if let (None, Some(specifier)) = (record.target, &record.external) {
                        imports.push(MetafileImport {
                            path: specifier.clone(),
                            kind: record.kind,
                            original: None,
                            with: BTreeMap::new(),
                            external: true,
                        });
                    }
                }
            }
            for &other in &chunk.imports {
                imports.push(chunk_import(chunks, other, ImportKind::ImportStatement));
            }
            for &other in &chunk.dynamic_imports {
                imports.push(chunk_import(chunks, other, ImportKind::DynamicImport));
            }
            meta.outputs.insert(
                chunk.output.clone(),
                MetafileOutput {
                    bytes,
                    inputs,
                    imports,
                    exports: chunk.exports.clone(),
                    entry_point: chunk
                        .entry
                        .filter(|&e| graph.module(e).is_entry)
                        .map(|e| input_key(graph.module(e), cwd)),
                },
            );
        }
        meta
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn chunk_import(chunks: &ChunkGraph, id: usize, kind: ImportKind) -> MetafileImport {
    MetafileImport {
        path: chunks.chunks()[id].output.clone(),
        kind,
        original: None,
        with: BTreeMap::new(),
        external: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::chunks::compute_chunks;
    use crate::bundler::graph::tests::module;
    use crate::bundler::link::link;
    use crate::bundler::treeshake::shake;
    use crate::config::BuildConfig;

    #[test]
    fn test_metafile_layout() {
        let mut graph = ModuleGraph::new();
        let mut entry = module("/proj/src/index.js", &[1]);
        entry.is_entry = true;
        entry.source = "import './dep.js';\n".to_string();
        entry.records[0].specifier = "./dep.js".to_string();
        entry.records.push(crate::bundler::graph::ImportRecord {
            specifier: "react".to_string(),
            kind: ImportKind::ImportStatement,
            attributes: BTreeMap::new(),
            worker: false,
            stmt: 0,
            target: None,
            external: Some("react".to_string()),
        });
        graph.add(entry);
        let mut dep = module("/proj/src/dep.js", &[]);
        dep.source = "x();\n".to_string();
        graph.add(dep);

        let config = BuildConfig::new("/proj", ["./src/index.js"]).with_outdir("out");
        let linked = link(&graph, &config.cwd).unwrap();
        let liveness = shake(&graph, &linked, false);
        let chunks = compute_chunks(&graph, &linked, &liveness, &config).unwrap();
        let meta = Metafile::build(&graph, &liveness, &chunks, &config.cwd);

        let input = &meta.inputs["src/index.js"];
        assert_eq!(input.bytes, 19);
        assert_eq!(input.imports[0].path, "src/dep.js");
        assert_eq!(input.imports[0].original.as_deref(), Some("./dep.js"));
        assert!(input.imports[1].external);

        let output = &meta.outputs["out/index.js"];
        assert_eq!(output.entry_point.as_deref(), Some("src/index.js"));
        assert_eq!(output.inputs["src/dep.js"].bytes_in_output, 5);
        assert_eq!(output.bytes, 24);

        let json: serde_json::Value = serde_json::from_str(&meta.to_json().unwrap()).unwrap();
        assert_eq!(json["outputs"]["out/index.js"]["entryPoint"], "src/index.js");
        assert_eq!(json["inputs"]["src/index.js"]["imports"][0]["kind"], "import-statement");
        assert!(json["inputs"]["src/dep.js"]["imports"][0].is_null());
    }
}
