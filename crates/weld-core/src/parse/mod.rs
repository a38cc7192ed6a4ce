//! Parser seam.
//!
//! The bundler never looks at source text directly: a [`ModuleParser`] turns a
//! module's source into a [`ModuleAst`] summary (import sites, import bindings,
//! export entries and per-statement binding/reference/side-effect data). The
//! bundled [`ScanParser`] does this with a tokenizer and a top-level statement
//! scanner; a full parser can be plugged in through [`crate::Bundler::with_parser`].

mod define;
pub mod lexer;
mod scan;

pub use define::apply_defines;
pub use scan::ScanParser;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// How a module's source is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Loader {
    Js,
    Jsx,
    Ts,
    Tsx,
    Json,
    Text,
    Empty,
}

impl Loader {
    /// Loader implied by a file extension (without the dot).
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "js" | "mjs" | "cjs" => Some(Self::Js),
            "jsx" => Some(Self::Jsx),
            "ts" | "mts" | "cts" => Some(Self::Ts),
            "tsx" => Some(Self::Tsx),
            "json" => Some(Self::Json),
            "txt" => Some(Self::Text),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_typescript(&self) -> bool {
        matches!(self, Self::Ts | Self::Tsx)
    }

    /// Whether the loader produces JavaScript source that needs scanning.
    #[must_use]
    pub fn is_script(&self) -> bool {
        matches!(self, Self::Js | Self::Jsx | Self::Ts | Self::Tsx)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Js => "js",
            Self::Jsx => "jsx",
            Self::Ts => "ts",
            Self::Tsx => "tsx",
            Self::Json => "json",
            Self::Text => "text",
            Self::Empty => "empty",
        }
    }
}

impl std::str::FromStr for Loader {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "js" => Ok(Self::Js),
            "jsx" => Ok(Self::Jsx),
            "ts" => Ok(Self::Ts),
            "tsx" => Ok(Self::Tsx),
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            "empty" => Ok(Self::Empty),
            other => Err(format!("unknown loader: {other}")),
        }
    }
}

/// The syntactic form that introduced an import. Serialized the way metafiles spell it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportKind {
    EntryPoint,
    ImportStatement,
    RequireCall,
    DynamicImport,
}

impl ImportKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EntryPoint => "entry-point",
            Self::ImportStatement => "import-statement",
            Self::RequireCall => "require-call",
            Self::DynamicImport => "dynamic-import",
        }
    }

    /// `require` condition instead of `import` when matching package exports.
    #[must_use]
    pub fn is_require(&self) -> bool {
        matches!(self, Self::RequireCall)
    }
}

impl fmt::Display for ImportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    /// Byte offset into the source.
    pub offset: usize,
}

impl ParseError {
    #[must_use]
    pub fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

/// A place in the source that pulls in another module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSite {
    pub specifier: String,
    pub kind: ImportKind,
    /// `with { type: "json" }` import attributes.
    pub attributes: BTreeMap<String, String>,
    /// `new Worker(...)` target.
    pub worker: bool,
    /// Index of the statement containing the site.
    pub stmt: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportBinding {
    Default { local: String },
    Named { imported: String, local: String },
    Namespace { local: String },
}

impl ImportBinding {
    #[must_use]
    pub fn local(&self) -> &str {
        match self {
            Self::Default { local } | Self::Named { local, .. } | Self::Namespace { local } => {
                local
            }
        }
    }
}

/// An `import ... from` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDecl {
    /// Index into [`ModuleAst::import_sites`].
    pub site: usize,
    pub stmt: usize,
    pub bindings: Vec<ImportBinding>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportEntry {
    /// `export const a`, `export { a as b }`, `export default ...`.
    Local {
        exported: String,
        local: String,
        stmt: usize,
    },
    /// `export { a as b } from "x"`.
    ReExport {
        exported: String,
        imported: String,
        site: usize,
        stmt: usize,
    },
    /// `export * as ns from "x"`.
    ReExportNamespace {
        exported: String,
        site: usize,
        stmt: usize,
    },
    /// `export * from "x"`.
    Star { site: usize, stmt: usize },
}

impl ExportEntry {
    /// Exported name, `None` for star re-exports.
    #[must_use]
    pub fn exported(&self) -> Option<&str> {
        match self {
            Self::Local { exported, .. }
            | Self::ReExport { exported, .. }
            | Self::ReExportNamespace { exported, .. } => Some(exported),
            Self::Star { .. } => None,
        }
    }

    #[must_use]
    pub fn stmt(&self) -> usize {
        match self {
            Self::Local { stmt, .. }
            | Self::ReExport { stmt, .. }
            | Self::ReExportNamespace { stmt, .. }
            | Self::Star { stmt, .. } => *stmt,
        }
    }
}

/// An identifier read, with the property name when it is read as `name.prop`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub name: String,
    pub property: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Import,
    Export,
    Declaration,
    Expression,
    /// TypeScript-only (interface, type alias, declare); erased.
    Type,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub kind: StatementKind,
    pub start: usize,
    pub end: usize,
    pub declares: Vec<String>,
    pub refs: Vec<Reference>,
    /// Evaluating the statement may be observable.
    pub side_effects: bool,
}

impl Statement {
    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// Parser output consumed by the graph builder and linker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleAst {
    pub import_sites: Vec<ImportSite>,
    pub imports: Vec<ImportDecl>,
    pub exports: Vec<ExportEntry>,
    pub statements: Vec<Statement>,
    /// `import`/`export` declarations, `import.meta` or top-level `await`.
    pub has_esm_syntax: bool,
    /// Reads or writes `module.exports` / `exports`.
    pub uses_commonjs: bool,
    /// Touches the free `module` variable at all.
    pub uses_module_var: bool,
}

impl ModuleAst {
    /// Statement indices declaring `name`.
    pub fn declaring(&self, name: &str) -> impl Iterator<Item = usize> + '_ {
        let name = name.to_string();
        self.statements
            .iter()
            .enumerate()
            .filter(move |(_, s)| s.declares.iter().any(|d| *d == name))
            .map(|(i, _)| i)
    }

    /// The import declaration and binding that introduce local `name`.
    #[must_use]
    pub fn import_binding(&self, name: &str) -> Option<(&ImportDecl, &ImportBinding)> {
        self.imports.iter().find_map(|decl| {
            decl.bindings
                .iter()
                .find(|b| b.local() == name)
                .map(|b| (decl, b))
        })
    }

    /// Names exported directly (not through `export *`).
    pub fn export_names(&self) -> impl Iterator<Item = &str> {
        self.exports.iter().filter_map(ExportEntry::exported)
    }
}

/// Turns source text into a [`ModuleAst`].
pub trait ModuleParser: Send + Sync {
    fn parse(&self, source: &str, loader: Loader) -> Result<ModuleAst, ParseError>;
}
