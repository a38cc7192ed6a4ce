//! Specifier to module resolution.
//!
//! Supports:
//! - Relative and absolute specifiers, with extension and `index.*` probing
//! - TypeScript extension rewriting (`./a.js` finds `a.ts`)
//! - Bare specifiers through a `node_modules` walk, then `nodePaths`
//! - `exports`, `imports` (`#x`) and package self-reference
//! - `mainFields` in configured order, `browser` string and map forms
//! - Node builtins per platform, and configured externals

use super::builtins::{builtin_action, BuiltinAction};
use super::conditions::ConditionSet;
use super::exports::{resolve_exports, resolve_imports, MapOutcome};
use super::pkg_json::{BrowserField, BrowserTarget, PackageJson, PackageJsonCache};
use crate::config::{BuildConfig, Platform};
use crate::error::{codes, Warning};
use crate::parse::ImportKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, trace};
use weld_util::fs::exists_with_exact_case;
use weld_util::path::{normalize, relative_slash};

/// `./a.js` may name `a.ts` on disk.
const TS_REWRITES: &[(&str, &[&str])] = &[
    (".js", &[".ts", ".tsx"]),
    (".jsx", &[".ts", ".tsx"]),
    (".mjs", &[".mts"]),
    (".cjs", &[".cts"]),
];

/// Configured externals: exact package names (covering their subpaths) and globs.
#[derive(Debug, Clone, Default)]
pub struct ExternalMatcher {
    names: Vec<String>,
    patterns: Vec<glob::Pattern>,
}

impl ExternalMatcher {
    #[must_use]
    pub fn new(entries: &[String]) -> Self {
        let mut matcher = Self::default();
        for entry in entries {
            if entry.contains('*') {
                match glob::Pattern::new(entry) {
                    Ok(p) => matcher.patterns.push(p),
                    Err(e) => debug!(pattern = %entry, error = %e, "ignoring invalid external pattern"),
                }
            } else {
                matcher.names.push(entry.clone());
            }
        }
        matcher
    }

    #[must_use]
    pub fn matches(&self, specifier: &str) -> bool {
        self.names.iter().any(|name| {
            specifier == name
                || specifier
                    .strip_prefix(name.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        }) || self.patterns.iter().any(|p| p.matches(specifier))
    }
}

/// The resolver's view of the build configuration.
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    pub platform: Platform,
    pub conditions: Vec<String>,
    pub main_fields: Vec<String>,
    pub extensions: Vec<String>,
    pub external: ExternalMatcher,
    pub node_paths: Vec<PathBuf>,
}

impl ResolverOptions {
    #[must_use]
    pub fn from_config(config: &BuildConfig) -> Self {
        Self {
            platform: config.platform,
            conditions: config.conditions.clone(),
            main_fields: config.effective_main_fields(),
            extensions: config.resolve_extensions.clone(),
            external: ExternalMatcher::new(&config.external),
            node_paths: config.node_paths.iter().map(|p| config.absolute(p)).collect(),
        }
    }

    fn browser_enabled(&self) -> bool {
        self.main_fields.iter().any(|f| f == "browser")
    }
}

/// One resolution request.
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub specifier: &'a str,
    /// Directory relative specifiers are joined to.
    pub resolve_dir: &'a Path,
    pub importer: Option<&'a Path>,
    pub kind: ImportKind,
}

impl<'a> ResolveRequest<'a> {
    #[must_use]
    pub fn new(specifier: &'a str, resolve_dir: &'a Path, kind: ImportKind) -> Self {
        Self {
            specifier,
            resolve_dir,
            importer: None,
            kind,
        }
    }

    #[must_use]
    pub fn importer(mut self, importer: &'a Path) -> Self {
        self.importer = Some(importer);
        self
    }

    fn with_specifier(self, specifier: &'a str, resolve_dir: &'a Path) -> Self {
        Self {
            specifier,
            resolve_dir,
            ..self
        }
    }
}

/// Where a specifier ended up.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resolution {
    File(PathBuf),
    /// Left as an import in the output.
    External(String),
    /// Replaced by an empty module (disabled by `browser`, or a stubbed builtin).
    Empty(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ResolveError {
    pub specifier: String,
    pub message: String,
    /// Why, for logs and `weld resolve`.
    pub note: Option<String>,
    /// Set when the failure comes from an invalid `package.json` rather than a missing file.
    pub invalid_package: Option<PathBuf>,
}

impl ResolveError {
    /// The user-facing "Could not resolve" error. Bare package specifiers get the install hint.
    #[must_use]
    pub fn not_found(specifier: &str) -> Self {
        let message = if is_package_specifier(specifier) {
            format!("Could not resolve: \"{specifier}\". Maybe you need to \"bun install\"?")
        } else {
            format!("Could not resolve: \"{specifier}\"")
        };
        Self {
            specifier: specifier.to_string(),
            message,
            note: None,
            invalid_package: None,
        }
    }

    fn invalid_package(specifier: &str, message: String, manifest: PathBuf) -> Self {
        Self {
            specifier: specifier.to_string(),
            message,
            note: None,
            invalid_package: Some(manifest),
        }
    }

    #[must_use]
    fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

fn is_path_specifier(specifier: &str) -> bool {
    specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier == "."
        || specifier == ".."
        || Path::new(specifier).is_absolute()
}

fn is_package_specifier(specifier: &str) -> bool {
    !specifier.is_empty()
        && !is_path_specifier(specifier)
        && !specifier.starts_with('#')
        && !specifier.starts_with("node:")
        && !specifier.starts_with("bun:")
}

/// Split `@scope/pkg/sub/path` into (`@scope/pkg`, `./sub/path`).
fn split_package(specifier: &str) -> Option<(&str, String)> {
    let name_end = if specifier.starts_with('@') {
        let slash = specifier.find('/')?;
        specifier[slash + 1..]
            .find('/')
            .map_or(specifier.len(), |i| slash + 1 + i)
    } else {
        specifier.find('/').unwrap_or(specifier.len())
    };
    let name = &specifier[..name_end];
    if name.is_empty() || name.ends_with('/') {
        return None;
    }
    let subpath = match &specifier[name_end..] {
        "" => ".".to_string(),
        rest => format!(".{rest}"),
    };
    Some((name, subpath))
}

fn describe(outcome: &MapOutcome, field: &str) -> String {
    match outcome {
        MapOutcome::Target(t) => format!("The \"{field}\" target \"{t}\" does not exist"),
        MapOutcome::Excluded => format!("The path is explicitly excluded by \"{field}\""),
        MapOutcome::NotFound => format!("The path is not listed in \"{field}\""),
        MapOutcome::NoCondition => {
            format!("None of the conditions in \"{field}\" match the active conditions")
        }
        MapOutcome::Invalid(t) => format!("The \"{field}\" target \"{t}\" is invalid"),
    }
}

/// Filesystem resolver. Caches `package.json` files; results are cached by the caller.
#[derive(Debug)]
pub struct Resolver {
    options: ResolverOptions,
    packages: PackageJsonCache,
    warnings: Mutex<Vec<Warning>>,
}

impl Resolver {
    #[must_use]
    pub fn new(options: ResolverOptions) -> Self {
        Self {
            options,
            packages: PackageJsonCache::new(),
            warnings: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    #[must_use]
    pub fn packages(&self) -> &PackageJsonCache {
        &self.packages
    }

    /// Drain warnings collected so far (resolver and `package.json` ones).
    pub fn take_warnings(&self) -> Vec<Warning> {
        let mut out = self.packages.take_warnings();
        if let Ok(mut own) = self.warnings.lock() {
            out.append(&mut own);
        }
        out
    }

    fn warn(&self, warning: Warning) {
        if let Ok(mut warnings) = self.warnings.lock() {
            warnings.push(warning);
        }
    }

    pub fn resolve(&self, req: &ResolveRequest<'_>) -> Result<Resolution, ResolveError> {
        let result = self.resolve_inner(req);
        match &result {
            Ok(resolution) => debug!(
                specifier = req.specifier,
                kind = %req.kind,
                ?resolution,
                "resolved"
            ),
            Err(e) => debug!(
                specifier = req.specifier,
                kind = %req.kind,
                error = %e,
                note = e.note.as_deref().unwrap_or(""),
                "resolve failed"
            ),
        }
        result
    }

    fn resolve_inner(&self, req: &ResolveRequest<'_>) -> Result<Resolution, ResolveError> {
        let spec = req.specifier;
        if spec.is_empty() {
            return Err(ResolveError::not_found(spec));
        }

        if self.options.external.matches(spec) {
            return Ok(Resolution::External(spec.to_string()));
        }

        // `weld bundle src/index.ts` means a path, not a package named "src".
        if req.kind == ImportKind::EntryPoint && !is_path_specifier(spec) {
            let candidate = normalize(&req.resolve_dir.join(spec));
            if let Some(found) = self.resolve_path(&candidate, req)? {
                return Ok(found);
            }
        }

        if spec.starts_with("node:") || spec.starts_with("bun:") {
            return match builtin_action(spec, self.options.platform) {
                Some(action) => self.apply_builtin(spec, action, req),
                None => Err(ResolveError::not_found(spec)),
            };
        }

        if spec.starts_with('#') {
            return self.resolve_imports_specifier(req);
        }

        if is_path_specifier(spec) {
            let target = if Path::new(spec).is_absolute() {
                PathBuf::from(spec)
            } else {
                req.resolve_dir.join(spec)
            };
            return self
                .resolve_path(&normalize(&target), req)?
                .ok_or_else(|| ResolveError::not_found(spec));
        }

        self.resolve_bare(req, true)
    }

    /// A file or directory path; `None` when nothing exists there.
    fn resolve_path(
        &self,
        path: &Path,
        req: &ResolveRequest<'_>,
    ) -> Result<Option<Resolution>, ResolveError> {
        match self.load_as_file(path).or_else(|| self.load_as_directory(path)) {
            Some(file) => self.finish_file(file, req).map(Some),
            None => Ok(None),
        }
    }

    /// `is_file`, but a hit that only exists under different letter case is rejected.
    fn is_file(&self, path: &Path) -> bool {
        if !path.is_file() {
            return false;
        }
        if exists_with_exact_case(path) {
            return true;
        }
        self.warn(
            Warning::new(
                codes::CASE_MISMATCH,
                format!(
                    "\"{}\" only exists with different letter case",
                    path.display()
                ),
            )
            .at(path.display().to_string()),
        );
        false
    }

    fn load_as_file(&self, path: &Path) -> Option<PathBuf> {
        trace!(path = %path.display(), "probe file");
        if self.is_file(path) {
            return Some(path.to_path_buf());
        }

        let name = path.file_name()?.to_str()?;
        for ext in &self.options.extensions {
            let candidate = path.with_file_name(format!("{name}{ext}"));
            if self.is_file(&candidate) {
                return Some(candidate);
            }
        }

        for (from, replacements) in TS_REWRITES {
            if let Some(stem) = name.strip_suffix(from) {
                for to in *replacements {
                    let candidate = path.with_file_name(format!("{stem}{to}"));
                    if self.is_file(&candidate) {
                        return Some(candidate);
                    }
                }
            }
        }
        None
    }

    fn load_index(&self, dir: &Path) -> Option<PathBuf> {
        self.options
            .extensions
            .iter()
            .map(|ext| dir.join(format!("index{ext}")))
            .find(|candidate| self.is_file(candidate))
    }

    fn load_as_directory(&self, dir: &Path) -> Option<PathBuf> {
        if !dir.is_dir() {
            return None;
        }
        if let Some(pkg) = self.packages.load(dir) {
            if let Some(main) = self.resolve_main(&pkg) {
                return Some(main);
            }
        }
        self.load_index(dir)
    }

    /// The package entry from `mainFields`, in configured order.
    fn resolve_main(&self, pkg: &PackageJson) -> Option<PathBuf> {
        for field in &self.options.main_fields {
            let value = if field == "browser" {
                match &pkg.browser {
                    Some(BrowserField::Replace(s)) => Some(s.as_str()),
                    _ => None,
                }
            } else {
                pkg.main_field(field)
            };
            let Some(value) = value else { continue };

            let target = normalize(&pkg.dir.join(value));
            // A main pointing at a directory only gets its index, not another package.json.
            if let Some(file) = self.load_as_file(&target).or_else(|| self.load_index(&target)) {
                trace!(field = %field, file = %file.display(), "main field");
                return Some(file);
            }
        }
        None
    }

    /// Apply the enclosing package's `browser` file map, then canonicalize.
    fn finish_file(
        &self,
        file: PathBuf,
        req: &ResolveRequest<'_>,
    ) -> Result<Resolution, ResolveError> {
        if self.options.browser_enabled() {
            if let Some(pkg) = file.parent().and_then(|dir| self.packages.nearest(dir)) {
                let rel = relative_slash(&file, &pkg.dir);
                match pkg.browser_file(&rel) {
                    Some(BrowserTarget::Disabled) => {
                        return Ok(Resolution::Empty(file.display().to_string()));
                    }
                    Some(BrowserTarget::Path(target)) if is_path_specifier(target) => {
                        let mapped = normalize(&pkg.dir.join(target));
                        if let Some(found) =
                            self.load_as_file(&mapped).or_else(|| self.load_index(&mapped))
                        {
                            return Ok(Resolution::File(canonical(found)));
                        }
                        return Err(ResolveError::not_found(req.specifier)
                            .note(format!("browser map target \"{target}\" does not exist")));
                    }
                    Some(BrowserTarget::Path(target)) => {
                        let target = target.clone();
                        let inner = req.with_specifier(&target, &pkg.dir);
                        return self.resolve_bare(&inner, false);
                    }
                    None => {}
                }
            }
        }
        Ok(Resolution::File(canonical(file)))
    }

    /// Bare specifier: browser module map, builtins, self-reference, then `node_modules`.
    fn resolve_bare(
        &self,
        req: &ResolveRequest<'_>,
        remap: bool,
    ) -> Result<Resolution, ResolveError> {
        let spec = req.specifier;

        if remap && self.options.browser_enabled() {
            if let Some(pkg) = self.packages.nearest(req.resolve_dir) {
                match pkg.browser_module(spec) {
                    Some(BrowserTarget::Disabled) => {
                        return Ok(Resolution::Empty(spec.to_string()));
                    }
                    Some(BrowserTarget::Path(target)) if is_path_specifier(target) => {
                        let mapped = normalize(&pkg.dir.join(target));
                        return self
                            .resolve_path(&mapped, req)?
                            .ok_or_else(|| ResolveError::not_found(spec));
                    }
                    Some(BrowserTarget::Path(target)) if target != spec => {
                        let target = target.clone();
                        return self.resolve_bare(&req.with_specifier(&target, req.resolve_dir), false);
                    }
                    _ => {}
                }
            }
        }

        if let Some(action) = builtin_action(spec, self.options.platform) {
            return self.apply_builtin(spec, action, req);
        }

        let Some((name, subpath)) = split_package(spec) else {
            return Err(ResolveError::not_found(spec));
        };

        if let Some(pkg) = self.packages.nearest(req.resolve_dir) {
            if pkg.name.as_deref() == Some(name) && pkg.exports.is_some() {
                trace!(package = name, "self-reference");
                return self.resolve_in_package(&pkg, &subpath, req);
            }
        }

        self.resolve_package(name, &subpath, req)
    }

    /// `node_modules` walk from the importer, then `nodePaths`.
    fn resolve_package(
        &self,
        name: &str,
        subpath: &str,
        req: &ResolveRequest<'_>,
    ) -> Result<Resolution, ResolveError> {
        let walked = req
            .resolve_dir
            .ancestors()
            .filter(|dir| dir.file_name().map_or(true, |n| n != "node_modules"))
            .map(|dir| dir.join("node_modules").join(name));
        let extra = self.options.node_paths.iter().map(|dir| dir.join(name));

        for pkg_dir in walked.chain(extra) {
            if !pkg_dir.is_dir() {
                continue;
            }
            trace!(dir = %pkg_dir.display(), "package directory");
            return match self.packages.load(&pkg_dir) {
                Some(pkg) => self.resolve_in_package(&pkg, subpath, req),
                None => {
                    let target = if subpath == "." {
                        pkg_dir
                    } else {
                        normalize(&pkg_dir.join(subpath))
                    };
                    self.resolve_path(&target, req)?
                        .ok_or_else(|| ResolveError::not_found(req.specifier))
                }
            };
        }
        Err(ResolveError::not_found(req.specifier).note(format!("no \"{name}\" in any node_modules")))
    }

    fn resolve_in_package(
        &self,
        pkg: &Arc<PackageJson>,
        subpath: &str,
        req: &ResolveRequest<'_>,
    ) -> Result<Resolution, ResolveError> {
        let spec = req.specifier;

        // With exports present the map is authoritative: no main fallback, no probing.
        if let Some(exports) = &pkg.exports {
            let conditions = self.conditions(req.kind);
            let outcome = resolve_exports(exports, subpath, &conditions).map_err(|msg| {
                ResolveError::invalid_package(spec, msg, pkg.dir.join("package.json"))
            })?;
            if let MapOutcome::Target(target) = &outcome {
                let file = normalize(&pkg.dir.join(target));
                if self.is_file(&file) {
                    return self.finish_file(file, req);
                }
            }
            return Err(ResolveError::not_found(spec).note(describe(&outcome, "exports")));
        }

        if subpath != "." {
            let target = normalize(&pkg.dir.join(subpath));
            return self
                .resolve_path(&target, req)?
                .ok_or_else(|| ResolveError::not_found(spec));
        }

        match self.resolve_main(pkg).or_else(|| self.load_index(&pkg.dir)) {
            Some(file) => self.finish_file(file, req),
            None => Err(ResolveError::not_found(spec).note("package has no usable entry point")),
        }
    }

    fn resolve_imports_specifier(
        &self,
        req: &ResolveRequest<'_>,
    ) -> Result<Resolution, ResolveError> {
        let spec = req.specifier;
        let pkg = self
            .packages
            .nearest(req.resolve_dir)
            .ok_or_else(|| ResolveError::not_found(spec).note("no enclosing package.json"))?;
        let Some(imports) = &pkg.imports else {
            return Err(ResolveError::not_found(spec).note("package.json has no \"imports\""));
        };

        let conditions = self.conditions(req.kind);
        let outcome = resolve_imports(imports, spec, &conditions).map_err(|msg| {
            ResolveError::invalid_package(spec, msg, pkg.dir.join("package.json"))
        })?;
        match outcome {
            MapOutcome::Target(target) if target.starts_with("./") => {
                let file = normalize(&pkg.dir.join(&target));
                if self.is_file(&file) {
                    self.finish_file(file, req)
                } else {
                    Err(ResolveError::not_found(spec)
                        .note(describe(&MapOutcome::Target(target), "imports")))
                }
            }
            MapOutcome::Target(target) => {
                // Bare targets resolve as packages from the declaring package.
                self.resolve_bare(&req.with_specifier(&target, &pkg.dir), true)
            }
            other => Err(ResolveError::not_found(spec).note(describe(&other, "imports"))),
        }
    }

    fn apply_builtin(
        &self,
        spec: &str,
        action: BuiltinAction,
        req: &ResolveRequest<'_>,
    ) -> Result<Resolution, ResolveError> {
        match action {
            BuiltinAction::External => Ok(Resolution::External(spec.to_string())),
            BuiltinAction::Stub => Ok(Resolution::Empty(spec.to_string())),
            BuiltinAction::Error => Err(ResolveError::not_found(spec)
                .note(format!("\"{spec}\" is not a Node.js builtin available on this platform"))),
            BuiltinAction::Polyfill(polyfill) => {
                let resolved = split_package(polyfill).and_then(|(name, subpath)| {
                    self.resolve_package(name, &subpath, &req.with_specifier(polyfill, req.resolve_dir))
                        .ok()
                });
                if let Some(resolution) = resolved {
                    return Ok(resolution);
                }
                let mut warning = Warning::new(
                    codes::MISSING_POLYFILL,
                    format!(
                        "\"{spec}\" is a Node.js builtin; install \"{polyfill}\" to polyfill it. Using an empty module instead"
                    ),
                );
                if let Some(importer) = req.importer {
                    warning = warning.at(importer.display().to_string());
                }
                self.warn(warning);
                Ok(Resolution::Empty(spec.to_string()))
            }
        }
    }

    fn conditions(&self, kind: ImportKind) -> ConditionSet {
        ConditionSet::new(self.options.platform, kind, &self.options.conditions)
    }
}

fn canonical(file: PathBuf) -> PathBuf {
    dunce::canonicalize(&file).unwrap_or(file)
}
