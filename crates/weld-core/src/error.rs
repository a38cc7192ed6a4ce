use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors loading weld configuration.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to read config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Error codes reported alongside bundle errors (stable, SCREAMING_SNAKE).
pub mod codes {
    pub const RESOLVE_FAILED: &str = "RESOLVE_FAILED";
    pub const ENTRY_NOT_FOUND: &str = "ENTRY_NOT_FOUND";
    pub const EXPORT_CYCLE: &str = "EXPORT_CYCLE";
    pub const PLUGIN_ERROR: &str = "PLUGIN_ERROR";
    pub const DEFER_MISUSE: &str = "DEFER_MISUSE";
    pub const OUTPUT_COLLISION: &str = "OUTPUT_COLLISION";
    pub const LOAD_FAILED: &str = "LOAD_FAILED";
    pub const PARSE_FAILED: &str = "PARSE_FAILED";
    pub const MISSING_EXPORT: &str = "MISSING_EXPORT";
    pub const INVALID_PACKAGE_CONFIG: &str = "INVALID_PACKAGE_CONFIG";

    pub const MALFORMED_PACKAGE_JSON: &str = "MALFORMED_PACKAGE_JSON";
    pub const CASE_MISMATCH: &str = "CASE_MISMATCH";
    pub const COMMONJS_IN_ESM: &str = "COMMONJS_IN_ESM";
    pub const MISSING_POLYFILL: &str = "MISSING_POLYFILL";
}

/// A build error. Display output is the user-facing message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BundleError {
    #[error("{message}")]
    Resolve {
        specifier: String,
        importer: Option<String>,
        message: String,
    },

    #[error("ModuleNotFound resolving \"{specifier}\" (entry point)")]
    EntryNotFound { specifier: String },

    #[error("Detected cycle while resolving import \"{name}\"")]
    Cycle { name: String, path: String },

    #[error("{message}")]
    Plugin {
        plugin: String,
        hook: &'static str,
        message: String,
        path: Option<String>,
    },

    #[error("Can't call .defer() more than once within an onLoad plugin")]
    DeferMisuse { path: String },

    #[error("Multiple files share the same output path: {output}")]
    OutputCollision { output: String, inputs: Vec<String> },

    #[error("{message}")]
    Load { path: String, message: String },

    #[error("{message}")]
    Parse { path: String, message: String },

    #[error("No matching export in \"{module}\" for import \"{name}\"")]
    MissingExport {
        importer: String,
        module: String,
        name: String,
    },

    #[error("{message}")]
    InvalidPackageConfig { path: String, message: String },
}

impl BundleError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Resolve { .. } => codes::RESOLVE_FAILED,
            Self::EntryNotFound { .. } => codes::ENTRY_NOT_FOUND,
            Self::Cycle { .. } => codes::EXPORT_CYCLE,
            Self::Plugin { .. } => codes::PLUGIN_ERROR,
            Self::DeferMisuse { .. } => codes::DEFER_MISUSE,
            Self::OutputCollision { .. } => codes::OUTPUT_COLLISION,
            Self::Load { .. } => codes::LOAD_FAILED,
            Self::Parse { .. } => codes::PARSE_FAILED,
            Self::MissingExport { .. } => codes::MISSING_EXPORT,
            Self::InvalidPackageConfig { .. } => codes::INVALID_PACKAGE_CONFIG,
        }
    }

    /// The file (or `namespace:path`) this error is attributed to.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Resolve { importer, .. } => importer.as_deref(),
            Self::Plugin { path, .. } => path.as_deref(),
            Self::EntryNotFound { .. } => None,
            Self::OutputCollision { output, .. } => Some(output),
            Self::Cycle { path, .. }
            | Self::DeferMisuse { path }
            | Self::Load { path, .. }
            | Self::Parse { path, .. }
            | Self::InvalidPackageConfig { path, .. } => Some(path),
            Self::MissingExport { importer, .. } => Some(importer),
        }
    }
}

/// A non-fatal diagnostic collected during a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Warning {
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: None,
        }
    }

    #[must_use]
    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{path}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// A failed build: every error collected, plus the warnings seen on the way.
#[derive(Debug, Clone, Default)]
pub struct BuildFailure {
    pub errors: Vec<BundleError>,
    pub warnings: Vec<Warning>,
}

impl BuildFailure {
    #[must_use]
    pub fn new(errors: Vec<BundleError>, warnings: Vec<Warning>) -> Self {
        Self { errors, warnings }
    }

    /// Whether any collected error carries `message` as its display text.
    #[must_use]
    pub fn has_message(&self, message: &str) -> bool {
        self.errors.iter().any(|e| e.to_string() == message)
    }
}

impl fmt::Display for BuildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.errors.len();
        write!(f, "Build failed with {n} error{}", if n == 1 { "" } else { "s" })?;
        for err in &self.errors {
            match err.path() {
                Some(path) => write!(f, "\n  {path}: {err}")?,
                None => write!(f, "\n  {err}")?,
            }
        }
        Ok(())
    }
}

impl std::error::Error for BuildFailure {}

impl From<BundleError> for BuildFailure {
    fn from(err: BundleError) -> Self {
        Self::new(vec![err], Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbatim_messages() {
        let err = BundleError::EntryNotFound {
            specifier: "./nope.js".into(),
        };
        assert_eq!(
            err.to_string(),
            "ModuleNotFound resolving \"./nope.js\" (entry point)"
        );

        let err = BundleError::Cycle {
            name: "a".into(),
            path: "/entry.js".into(),
        };
        assert_eq!(err.to_string(), "Detected cycle while resolving import \"a\"");
        assert_eq!(err.path(), Some("/entry.js"));

        let err = BundleError::DeferMisuse {
            path: "/a.js".into(),
        };
        assert_eq!(
            err.to_string(),
            "Can't call .defer() more than once within an onLoad plugin"
        );
    }

    #[test]
    fn test_failure_display_lists_attributed_errors() {
        let failure = BuildFailure::new(
            vec![
                BundleError::Load {
                    path: "/b.js".into(),
                    message: "boom".into(),
                },
                BundleError::EntryNotFound {
                    specifier: "x".into(),
                },
            ],
            vec![],
        );
        let text = failure.to_string();
        assert!(text.starts_with("Build failed with 2 errors"));
        assert!(text.contains("/b.js: boom"));
        assert!(failure.has_message("boom"));
    }

    #[test]
    fn test_codes_are_stable() {
        let err = BundleError::OutputCollision {
            output: "out/a.js".into(),
            inputs: vec!["a.js".into(), "a.ts".into()],
        };
        assert_eq!(err.code(), "OUTPUT_COLLISION");
        assert!(err
            .to_string()
            .starts_with("Multiple files share the same output path"));
    }
}
