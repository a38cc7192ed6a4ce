//! Parsed `package.json` files, cached per directory.

use crate::error::{codes, Warning};
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, trace};

/// The `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackageType {
    #[default]
    Unset,
    CommonJs,
    Module,
}

/// What a `browser` map entry points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserTarget {
    Path(String),
    /// `false`: replace with an empty module.
    Disabled,
}

/// The `browser` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserField {
    /// `"browser": "./browser.js"` replaces the main entry.
    Replace(String),
    /// `"browser": { ... }`.
    Map {
        /// Package-relative files, keys normalized without `./`.
        files: FxHashMap<String, BrowserTarget>,
        /// Bare module names (`"fs": false`).
        modules: FxHashMap<String, BrowserTarget>,
    },
}

/// The `sideEffects` field.
#[derive(Debug, Clone, Default)]
pub enum SideEffects {
    #[default]
    All,
    None,
    /// Glob patterns matched against package-relative paths.
    Patterns(Vec<glob::Pattern>),
}

impl SideEffects {
    fn parse(value: &Value) -> Self {
        match value {
            Value::Bool(false) => Self::None,
            Value::Array(items) => Self::Patterns(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(|p| {
                        let p = p.strip_prefix("./").unwrap_or(p);
                        let p = if p.contains('/') {
                            p.to_string()
                        } else {
                            format!("**/{p}")
                        };
                        glob::Pattern::new(&p).ok()
                    })
                    .collect(),
            ),
            _ => Self::All,
        }
    }

    /// `rel` is a slash-separated path relative to the package directory.
    #[must_use]
    pub fn has_side_effects(&self, rel: &str) -> bool {
        match self {
            Self::All => true,
            Self::None => false,
            Self::Patterns(patterns) => patterns.iter().any(|p| p.matches(rel)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PackageJson {
    pub dir: PathBuf,
    pub name: Option<String>,
    pub package_type: PackageType,
    pub browser: Option<BrowserField>,
    pub exports: Option<Value>,
    pub imports: Option<Value>,
    pub side_effects: SideEffects,
    fields: Map<String, Value>,
}

impl PackageJson {
    /// Parse `text` as the manifest in `dir`. Non-fatal problems go to `warnings`.
    pub fn parse(dir: &Path, text: &str, warnings: &mut Vec<Warning>) -> Option<Self> {
        let path = dir.join("package.json");
        let fields = match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                warnings.push(
                    Warning::new(codes::MALFORMED_PACKAGE_JSON, "package.json is not an object")
                        .at(path.display().to_string()),
                );
                return None;
            }
            Err(e) => {
                warnings.push(
                    Warning::new(codes::MALFORMED_PACKAGE_JSON, format!("Invalid package.json: {e}"))
                        .at(path.display().to_string()),
                );
                return None;
            }
        };

        let package_type = match fields.get("type") {
            None => PackageType::Unset,
            Some(Value::String(s)) if s == "module" => PackageType::Module,
            Some(Value::String(s)) if s == "commonjs" => PackageType::CommonJs,
            Some(other) => {
                let shown = other.as_str().map_or_else(|| other.to_string(), str::to_string);
                warnings.push(
                    Warning::new(
                        codes::MALFORMED_PACKAGE_JSON,
                        format!("\"{shown}\" is not a valid value for the \"type\" field"),
                    )
                    .at(path.display().to_string()),
                );
                PackageType::Unset
            }
        };

        Some(Self {
            dir: dir.to_path_buf(),
            name: fields.get("name").and_then(Value::as_str).map(str::to_string),
            package_type,
            browser: fields.get("browser").and_then(parse_browser),
            exports: fields.get("exports").cloned(),
            imports: fields.get("imports").cloned(),
            side_effects: fields.get("sideEffects").map(SideEffects::parse).unwrap_or_default(),
            fields,
        })
    }

    /// A main field (`main`, `module`, `browser`, ...) when it holds a string.
    #[must_use]
    pub fn main_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Browser map entry for a package-relative file (`"lib/a.js"`), tried with and
    /// without its extension.
    #[must_use]
    pub fn browser_file(&self, rel: &str) -> Option<&BrowserTarget> {
        let Some(BrowserField::Map { files, .. }) = &self.browser else {
            return None;
        };
        files.get(rel).or_else(|| {
            let stem = Path::new(rel).extension().map(|_| {
                let cut = rel.rfind('.').unwrap_or(rel.len());
                &rel[..cut]
            })?;
            files.get(stem)
        })
    }

    /// Browser map entry for a bare module name.
    #[must_use]
    pub fn browser_module(&self, name: &str) -> Option<&BrowserTarget> {
        match &self.browser {
            Some(BrowserField::Map { modules, .. }) => modules.get(name),
            _ => None,
        }
    }
}

fn parse_browser(value: &Value) -> Option<BrowserField> {
    match value {
        Value::String(s) => Some(BrowserField::Replace(s.clone())),
        Value::Object(map) => {
            let mut files = FxHashMap::default();
            let mut modules = FxHashMap::default();
            for (key, target) in map {
                let target = match target {
                    Value::String(s) => BrowserTarget::Path(s.clone()),
                    Value::Bool(false) => BrowserTarget::Disabled,
                    _ => continue,
                };
                if key.starts_with("./") || key.starts_with("../") || key.starts_with('/') {
                    let rel = key.strip_prefix("./").unwrap_or(key);
                    files.insert(rel.to_string(), target);
                } else {
                    modules.insert(key.clone(), target);
                }
            }
            Some(BrowserField::Map { files, modules })
        }
        _ => None,
    }
}

/// Directory-keyed cache of parsed manifests.
///
/// `None` entries record directories without a (valid) `package.json`.
#[derive(Debug, Default)]
pub struct PackageJsonCache {
    entries: RwLock<FxHashMap<PathBuf, Option<Arc<PackageJson>>>>,
    warnings: Mutex<Vec<Warning>>,
}

impl PackageJsonCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The manifest directly inside `dir`.
    pub fn load(&self, dir: &Path) -> Option<Arc<PackageJson>> {
        if let Ok(entries) = self.entries.read() {
            if let Some(hit) = entries.get(dir) {
                trace!(dir = %dir.display(), "package.json cache hit");
                return hit.clone();
            }
        }

        let path = dir.join("package.json");
        let parsed = match std::fs::read_to_string(&path) {
            Ok(text) => {
                let mut warnings = Vec::new();
                let pkg = PackageJson::parse(dir, &text, &mut warnings).map(Arc::new);
                if !warnings.is_empty() {
                    debug!(path = %path.display(), count = warnings.len(), "package.json warnings");
                    if let Ok(mut all) = self.warnings.lock() {
                        all.extend(warnings);
                    }
                }
                pkg
            }
            Err(_) => None,
        };

        match self.entries.write() {
            // Another thread may have parsed it first; keep theirs.
            Ok(mut entries) => entries.entry(dir.to_path_buf()).or_insert(parsed).clone(),
            Err(_) => parsed,
        }
    }

    /// The closest manifest at or above `dir`.
    pub fn nearest(&self, dir: &Path) -> Option<Arc<PackageJson>> {
        dir.ancestors().find_map(|d| self.load(d))
    }

    pub fn take_warnings(&self) -> Vec<Warning> {
        self.warnings
            .lock()
            .map(|mut w| std::mem::take(&mut *w))
            .unwrap_or_default()
    }
}
