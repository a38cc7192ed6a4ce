use crate::error::Error;
use crate::parse::Loader;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Output module format. Orthogonal to interop decisions, which depend only on the importer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Esm,
    Cjs,
    Iife,
}

impl Format {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Esm => "esm",
            Self::Cjs => "cjs",
            Self::Iife => "iife",
        }
    }
}

impl std::str::FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "esm" => Ok(Self::Esm),
            "cjs" => Ok(Self::Cjs),
            "iife" => Ok(Self::Iife),
            other => Err(format!("unknown format: {other}")),
        }
    }
}

/// Target platform. Selects condition priorities, main fields and builtin handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Browser,
    Node,
    Bun,
    Neutral,
    Cloudflare,
}

impl Platform {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Browser => "browser",
            Self::Node => "node",
            Self::Bun => "bun",
            Self::Neutral => "neutral",
            Self::Cloudflare => "cloudflare",
        }
    }

    /// Default `mainFields` order when the config leaves it unset.
    #[must_use]
    pub fn default_main_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Browser | Self::Cloudflare => &["browser", "module", "main"],
            Self::Node | Self::Bun => &["main", "module"],
            Self::Neutral => &[],
        }
    }

    /// Whether this platform runs in a browser-like host (no node builtins).
    #[must_use]
    pub fn is_browser_like(&self) -> bool {
        matches!(self, Self::Browser | Self::Cloudflare)
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "browser" => Ok(Self::Browser),
            "node" => Ok(Self::Node),
            "bun" => Ok(Self::Bun),
            "neutral" => Ok(Self::Neutral),
            "cloudflare" | "workerd" => Ok(Self::Cloudflare),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

pub const DEFAULT_EXTENSIONS: &[&str] = &[
    ".tsx", ".ts", ".jsx", ".js", ".mjs", ".cjs", ".mts", ".cts", ".json",
];

pub const DEFAULT_ENTRY_NAMES: &str = "[dir]/[name].[ext]";
pub const DEFAULT_CHUNK_NAMES: &str = "[name]-[hash].[ext]";

/// Build configuration.
///
/// Deserializes from the same camelCase shape the CLI's `weld.json` uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildConfig {
    pub entry_points: Vec<String>,
    pub cwd: PathBuf,
    pub external: Vec<String>,
    pub format: Format,
    pub platform: Platform,
    pub splitting: bool,
    pub outdir: Option<PathBuf>,
    pub outfile: Option<PathBuf>,
    pub outbase: Option<PathBuf>,
    /// Extra export conditions, checked before the platform's own.
    pub conditions: Vec<String>,
    /// `None` means the platform default.
    pub main_fields: Option<Vec<String>>,
    pub resolve_extensions: Vec<String>,
    pub define: BTreeMap<String, String>,
    /// Extension (with leading dot) to loader.
    pub loader: BTreeMap<String, Loader>,
    pub metafile: Option<PathBuf>,
    pub entry_names: String,
    pub chunk_names: String,
    pub treeshake: bool,
    pub node_paths: Vec<PathBuf>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            entry_points: Vec::new(),
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            external: Vec::new(),
            format: Format::default(),
            platform: Platform::default(),
            splitting: false,
            outdir: None,
            outfile: None,
            outbase: None,
            conditions: Vec::new(),
            main_fields: None,
            resolve_extensions: DEFAULT_EXTENSIONS.iter().map(|s| (*s).to_string()).collect(),
            define: BTreeMap::new(),
            loader: BTreeMap::new(),
            metafile: None,
            entry_names: DEFAULT_ENTRY_NAMES.to_string(),
            chunk_names: DEFAULT_CHUNK_NAMES.to_string(),
            treeshake: true,
            node_paths: Vec::new(),
        }
    }
}

impl BuildConfig {
    /// Create a config rooted at `cwd` with the given entry points.
    #[must_use]
    pub fn new(cwd: impl Into<PathBuf>, entry_points: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            cwd: cwd.into(),
            entry_points: entry_points.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Load a JSON config file. Relative `cwd` values are taken relative to the file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = serde_json::from_str(&text).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        if config.cwd.is_relative() {
            let base = path.parent().unwrap_or(Path::new("."));
            config.cwd = base.join(&config.cwd);
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_splitting(mut self, splitting: bool) -> Self {
        self.splitting = splitting;
        self
    }

    #[must_use]
    pub fn with_outdir(mut self, outdir: impl Into<PathBuf>) -> Self {
        self.outdir = Some(outdir.into());
        self
    }

    #[must_use]
    pub fn with_outfile(mut self, outfile: impl Into<PathBuf>) -> Self {
        self.outfile = Some(outfile.into());
        self
    }

    #[must_use]
    pub fn with_metafile(mut self, metafile: impl Into<PathBuf>) -> Self {
        self.metafile = Some(metafile.into());
        self
    }

    #[must_use]
    pub fn with_loader(mut self, ext: impl Into<String>, loader: Loader) -> Self {
        self.loader.insert(ext.into(), loader);
        self
    }

    #[must_use]
    pub fn with_external(mut self, external: impl Into<String>) -> Self {
        self.external.push(external.into());
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.conditions.push(condition.into());
        self
    }

    #[must_use]
    pub fn with_main_fields(mut self, fields: &[&str]) -> Self {
        self.main_fields = Some(fields.iter().map(|s| (*s).to_string()).collect());
        self
    }

    #[must_use]
    pub fn with_define(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.define.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_treeshake(mut self, treeshake: bool) -> Self {
        self.treeshake = treeshake;
        self
    }

    /// Effective main fields: the configured list, or the platform default.
    #[must_use]
    pub fn effective_main_fields(&self) -> Vec<String> {
        match &self.main_fields {
            Some(fields) => fields.clone(),
            None => self
                .platform
                .default_main_fields()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    /// Resolve a possibly-relative path against `cwd`.
    #[must_use]
    pub fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }

    /// Loader configured for an extension (`".txt"`), if any.
    #[must_use]
    pub fn loader_for_extension(&self, ext: &str) -> Option<Loader> {
        self.loader.get(ext).copied()
    }
}
