//! JavaScript/TypeScript bundler.
//!
//! ## Usage
//!
//! ```ignore
//! use weld_core::{BuildConfig, Bundler};
//!
//! let config = BuildConfig::new("/proj", ["./src/index.ts"]).with_outdir("dist");
//! let result = Bundler::new(config).build().await?;
//! for chunk in result.chunks.chunks() {
//!     println!("{}", chunk.output);
//! }
//! ```
//!
//! ## Architecture
//!
//! 1. **Plugins** - `setup`, then every `on_start` hook
//! 2. **Graph** - resolve and load everything reachable from the entries
//! 3. **Link** - bind imports to exports, pick a wrapper per module
//! 4. **Shake** - statement-level liveness
//! 5. **Chunk** - split into output files, name them, write the metafile
//!
//! Code generation consumes [`BuildResult`] and is not part of this crate.

mod builder;
mod chunks;
mod defer;
mod graph;
pub mod interop;
mod link;
mod metafile;
mod plugin;
mod treeshake;

pub use builder::EMPTY_NAMESPACE;
pub use chunks::{Chunk, ChunkGraph, ChunkId, ChunkKind};
pub use defer::Defer;
pub use graph::{ImportRecord, ModuleGraph, ModuleId, ModuleKey, ModuleRecord, ModuleType};
pub use interop::Interop;
pub use link::{LinkedGraph, LinkedImport, ResolvedBinding, WrapKind};
pub use metafile::{Metafile, MetafileImport, MetafileInput, MetafileOutput, OutputInput};
pub use plugin::{
    AliasPlugin, HookFilter, HookResult, OnLoadArgs, OnLoadResult, OnResolveArgs,
    OnResolveResult, Plugin, PluginBuild, PluginError, VirtualPlugin,
};
pub use treeshake::Liveness;

use crate::config::BuildConfig;
use crate::error::{BuildFailure, BundleError, Warning};
use crate::parse::{ModuleParser, ScanParser};
use crate::resolver::{Resolver, ResolverOptions};
use builder::BuildContext;
use plugin::PluginPipeline;
use std::sync::Arc;
use tracing::{debug, info};
use weld_util::fs::atomic_write;

/// Everything a build produced, ready for code generation.
#[derive(Debug)]
pub struct BuildResult {
    pub graph: ModuleGraph,
    pub linked: LinkedGraph,
    pub liveness: Liveness,
    pub chunks: ChunkGraph,
    /// Present when `metafile` is configured.
    pub metafile: Option<Metafile>,
    pub warnings: Vec<Warning>,
}

/// One configured build. Reusable: every [`Bundler::build`] starts from empty caches.
pub struct Bundler {
    config: Arc<BuildConfig>,
    plugins: Vec<Arc<dyn Plugin>>,
    parser: Arc<dyn ModuleParser>,
}

impl Bundler {
    #[must_use]
    pub fn new(config: BuildConfig) -> Self {
        Self {
            config: Arc::new(config),
            plugins: Vec::new(),
            parser: Arc::new(ScanParser),
        }
    }

    /// Register a plugin. Hooks run in registration order.
    #[must_use]
    pub fn plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    /// Replace the bundled statement scanner.
    #[must_use]
    pub fn with_parser(mut self, parser: Arc<dyn ModuleParser>) -> Self {
        self.parser = parser;
        self
    }

    #[must_use]
    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub async fn build(&self) -> Result<BuildResult, BuildFailure> {
        let config = Arc::clone(&self.config);
        info!(entries = config.entry_points.len(), platform = config.platform.as_str(), "build started");

        let resolver = Arc::new(Resolver::new(ResolverOptions::from_config(&config)));
        let pipeline = PluginPipeline::setup(&self.plugins, &config, &resolver).map_err(fail)?;
        pipeline.run_start().await.map_err(fail)?;

        let ctx = Arc::new(BuildContext::new(
            Arc::clone(&config),
            resolver,
            Arc::new(pipeline),
            Arc::clone(&self.parser),
        ));
        let built = ctx.build_graph().await?;
        let graph = built.graph;
        let warnings = built.warnings;

        let linked = link::link(&graph, &config.cwd)
            .map_err(|errors| BuildFailure::new(errors, warnings.clone()))?;
        let liveness = treeshake::shake(&graph, &linked, config.treeshake);
        let chunks = chunks::compute_chunks(&graph, &linked, &liveness, &config)
            .map_err(|e| BuildFailure::new(vec![e], warnings.clone()))?;

        let metafile = match &config.metafile {
            Some(path) => {
                let meta = Metafile::build(&graph, &liveness, &chunks, &config.cwd);
                let path = config.absolute(path);
                let json = meta.to_json().map_err(|e| metafile_error(&path, &e))?;
                atomic_write(&path, json.as_bytes()).map_err(|e| {
                    BuildFailure::new(vec![metafile_error_io(&path, &e)], warnings.clone())
                })?;
                debug!(path = %path.display(), "metafile written");
                Some(meta)
            }
            None => None,
        };

        info!(
            modules = graph.len(),
            chunks = chunks.chunks().len(),
            warnings = warnings.len(),
            "build finished"
        );
        Ok(BuildResult {
            graph,
            linked,
            liveness,
            chunks,
            metafile,
            warnings,
        })
    }

    /// [`Bundler::build`] on a fresh multi-threaded runtime.
    pub fn build_blocking(&self) -> Result<BuildResult, BuildFailure> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                fail(BundleError::Load {
                    path: String::new(),
                    message: format!("failed to start runtime: {e}"),
                })
            })?;
        runtime.block_on(self.build())
    }
}

fn fail(error: BundleError) -> BuildFailure {
    BuildFailure::new(vec![error], Vec::new())
}

fn metafile_error(path: &std::path::Path, e: &serde_json::Error) -> BuildFailure {
    fail(BundleError::Load {
        path: path.display().to_string(),
        message: format!("Failed to serialize metafile: {e}"),
    })
}

fn metafile_error_io(path: &std::path::Path, e: &std::io::Error) -> BundleError {
    BundleError::Load {
        path: path.display().to_string(),
        message: format!("Failed to write metafile: {e}"),
    }
}
