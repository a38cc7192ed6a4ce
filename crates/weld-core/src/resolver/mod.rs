//! Module resolver for JavaScript/TypeScript.
//!
//! Maps `(specifier, importer directory, import kind)` to a file, an external
//! import, or an empty stub, following `package.json` the way bundlers targeting
//! browsers, Node, Bun and Cloudflare Workers do.

pub mod builtins;
pub mod conditions;
mod exports;
mod pkg_json;
mod resolve;

pub use builtins::{builtin_action, is_builtin, BuiltinAction};
pub use conditions::{platform_conditions, ConditionSet};
pub use exports::{resolve_exports, resolve_imports, MapOutcome};
pub use pkg_json::{
    BrowserField, BrowserTarget, PackageJson, PackageJsonCache, PackageType, SideEffects,
};
pub use resolve::{
    ExternalMatcher, Resolution, ResolveError, ResolveRequest, Resolver, ResolverOptions,
};
