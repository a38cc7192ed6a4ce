//! `weld bundle` command implementation.
//!
//! Runs a build up to chunk planning and reports the plan. Code generation is
//! left to downstream tooling, so no JavaScript is written; the metafile is,
//! when asked for.

use miette::{miette, IntoDiagnostic, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use weld_core::bundler::{BuildResult, Chunk, ChunkKind};
use weld_core::{AliasPlugin, BuildConfig, BuildFailure, Bundler, Loader, Warning};
use weld_util::path::relative_slash;

const DEFAULT_CONFIG: &str = "weld.json";

/// Bundle command action.
#[derive(Debug, Clone)]
pub struct BundleAction {
    pub cwd: PathBuf,
    pub entries: Vec<String>,
    pub outdir: Option<PathBuf>,
    pub outfile: Option<PathBuf>,
    pub format: Option<String>,
    pub platform: Option<String>,
    pub splitting: bool,
    pub external: Vec<String>,
    pub conditions: Vec<String>,
    pub main_fields: Option<Vec<String>>,
    /// `KEY=VALUE` replacements.
    pub define: Vec<String>,
    /// `.ext=loader` pairs.
    pub loader: Vec<String>,
    pub metafile: Option<PathBuf>,
    pub treeshake: bool,
    /// `from=to` aliases.
    pub alias: Vec<String>,
    pub config: Option<PathBuf>,
}

#[derive(Serialize)]
struct BundleResultJson {
    ok: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    chunks: Vec<ChunkJson>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<ErrorJson>,
    warnings: Vec<Warning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metafile: Option<String>,
    duration_ms: u64,
}

#[derive(Serialize)]
struct ChunkJson {
    output: String,
    kind: ChunkKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    entry: Option<String>,
    modules: Vec<String>,
    bytes: usize,
    imports: Vec<String>,
    dynamic_imports: Vec<String>,
    exports: Vec<String>,
}

#[derive(Serialize)]
struct ErrorJson {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
}

/// Parse a `key=value` flag.
fn split_pair<'a>(flag: &str, raw: &'a str) -> Result<(&'a str, &'a str)> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim(), v.trim()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| miette!("invalid --{flag} value {raw:?}: expected KEY=VALUE"))
}

/// Config file (explicit, or `weld.json` when present) with CLI flags layered on top.
fn build_config(action: &BundleAction) -> Result<BuildConfig> {
    let file = match &action.config {
        Some(path) => Some(if path.is_absolute() {
            path.clone()
        } else {
            action.cwd.join(path)
        }),
        None => Some(action.cwd.join(DEFAULT_CONFIG)).filter(|p| p.is_file()),
    };
    let mut config = match file {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading config");
            let mut config = BuildConfig::load(&path).into_diagnostic()?;
            if action.config.is_none() {
                config.cwd = action.cwd.clone();
            }
            config
        }
        None => BuildConfig::new(&action.cwd, Vec::<String>::new()),
    };

    if !action.entries.is_empty() {
        config.entry_points = action.entries.clone();
    }
    if config.entry_points.is_empty() {
        return Err(miette!("no entry points given"));
    }
    if let Some(outdir) = &action.outdir {
        config.outdir = Some(outdir.clone());
    }
    if let Some(outfile) = &action.outfile {
        config.outfile = Some(outfile.clone());
    }
    if let Some(format) = &action.format {
        config.format = format.parse().map_err(|e: String| miette!("{e}"))?;
    }
    if let Some(platform) = &action.platform {
        config.platform = platform.parse().map_err(|e: String| miette!("{e}"))?;
    }
    if action.splitting {
        config.splitting = true;
    }
    config.external.extend(action.external.iter().cloned());
    config.conditions.extend(action.conditions.iter().cloned());
    if let Some(fields) = &action.main_fields {
        config.main_fields = Some(fields.clone());
    }
    for raw in &action.define {
        let (key, value) = split_pair("define", raw)?;
        config.define.insert(key.to_string(), value.to_string());
    }
    for raw in &action.loader {
        let (ext, name) = split_pair("loader", raw)?;
        let loader: Loader = name.parse().map_err(|e: String| miette!("{e}"))?;
        let ext = if ext.starts_with('.') {
            ext.to_string()
        } else {
            format!(".{ext}")
        };
        config.loader.insert(ext, loader);
    }
    if let Some(metafile) = &action.metafile {
        config.metafile = Some(metafile.clone());
    }
    if !action.treeshake {
        config.treeshake = false;
    }
    Ok(config)
}

fn chunk_json(chunk: &Chunk, result: &BuildResult, cwd: &Path) -> ChunkJson {
    let name = |id: usize| {
        let module = result.graph.module(id);
        if module.key.is_file() {
            relative_slash(Path::new(&module.key.path), cwd)
        } else {
            module.key.to_string()
        }
    };
    let outputs = |ids: &[usize]| {
        ids.iter()
            .map(|&c| result.chunks.chunks()[c].output.clone())
            .collect::<Vec<_>>()
    };
    ChunkJson {
        output: chunk.output.clone(),
        kind: chunk.kind,
        entry: chunk.entry.map(&name),
        modules: chunk.modules.iter().map(|&m| name(m)).collect(),
        bytes: chunk
            .modules
            .iter()
            .map(|&m| result.liveness.live_bytes(result.graph.module(m)))
            .sum(),
        imports: outputs(&chunk.imports),
        dynamic_imports: outputs(&chunk.dynamic_imports),
        exports: chunk.exports.clone(),
    }
}

fn error_json(failure: &BuildFailure) -> Vec<ErrorJson> {
    failure
        .errors
        .iter()
        .map(|e| ErrorJson {
            code: e.code(),
            message: e.to_string(),
            path: e.path().map(str::to_string),
        })
        .collect()
}

/// Run the bundle command.
pub fn run(action: BundleAction, json: bool) -> Result<()> {
    let start = Instant::now();
    let config = build_config(&action)?;
    let cwd = config.cwd.clone();
    let metafile = config.metafile.clone();

    let mut bundler = Bundler::new(config);
    if !action.alias.is_empty() {
        let mut alias = AliasPlugin::new();
        for raw in &action.alias {
            let (from, to) = split_pair("alias", raw)?;
            alias = alias.alias(from, to);
        }
        bundler = bundler.plugin(alias);
    }

    let result = bundler.build_blocking();
    let duration_ms = start.elapsed().as_millis() as u64;
    let warnings = match &result {
        Ok(result) => &result.warnings,
        Err(failure) => &failure.warnings,
    };
    for warning in warnings {
        tracing::warn!(code = warning.code, "{warning}");
    }

    match result {
        Ok(result) => {
            if json {
                let out = BundleResultJson {
                    ok: true,
                    chunks: result
                        .chunks
                        .chunks()
                        .iter()
                        .map(|c| chunk_json(c, &result, &cwd))
                        .collect(),
                    errors: Vec::new(),
                    warnings: result.warnings.clone(),
                    metafile: metafile.map(|p| p.display().to_string()),
                    duration_ms,
                };
                println!("{}", serde_json::to_string(&out).into_diagnostic()?);
            } else {
                for chunk in result.chunks.chunks() {
                    let info = chunk_json(chunk, &result, &cwd);
                    println!(
                        "  {} ({} modules, {} bytes)",
                        info.output,
                        info.modules.len(),
                        info.bytes
                    );
                    for module in &info.modules {
                        println!("    {module}");
                    }
                }
                if let Some(path) = &metafile {
                    println!("  metafile: {}", path.display());
                }
                println!(
                    "  {} modules, {} chunks, {duration_ms}ms",
                    result.graph.len(),
                    result.chunks.chunks().len()
                );
            }
            Ok(())
        }
        Err(failure) => {
            if json {
                let out = BundleResultJson {
                    ok: false,
                    chunks: Vec::new(),
                    errors: error_json(&failure),
                    warnings: failure.warnings.clone(),
                    metafile: None,
                    duration_ms,
                };
                println!("{}", serde_json::to_string(&out).into_diagnostic()?);
                std::process::exit(1);
            }
            Err(miette!("{failure}"))
        }
    }
}
