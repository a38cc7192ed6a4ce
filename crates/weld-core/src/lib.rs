#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! weld core: module resolution, plugin dispatch, graph construction and linking
//! for JavaScript/TypeScript bundles.
//!
//! Parsing is behind the [`parse::ModuleParser`] seam and code generation is left to
//! the caller, which consumes the linked and chunked graph in [`BuildResult`].

pub mod bundler;
pub mod config;
pub mod error;
pub mod parse;
pub mod resolver;

pub use bundler::{
    AliasPlugin, BuildResult, Bundler, HookFilter, OnLoadArgs, OnLoadResult, OnResolveArgs,
    OnResolveResult, Plugin, PluginBuild, PluginError, VirtualPlugin,
};
pub use config::{BuildConfig, Format, Platform};
pub use error::{BuildFailure, BundleError, Error, Warning};
pub use parse::{ImportKind, Loader};
pub use resolver::{Resolution, ResolveRequest, Resolver};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
