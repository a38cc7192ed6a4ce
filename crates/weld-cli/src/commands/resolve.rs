//! `weld resolve` command implementation.

use miette::{miette, IntoDiagnostic, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use weld_core::error::codes;
use weld_core::resolver::ResolverOptions;
use weld_core::{BuildConfig, ImportKind, Platform, Resolution, ResolveRequest, Resolver};

/// Resolve command action.
#[derive(Debug, Clone)]
pub struct ResolveAction {
    pub cwd: PathBuf,
    pub specifier: String,
    /// Importing file; its directory is the resolve dir.
    pub from: Option<PathBuf>,
    pub platform: String,
    pub kind: String,
    pub conditions: Vec<String>,
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum ResolveJson {
    File {
        specifier: String,
        path: String,
    },
    External {
        specifier: String,
        path: String,
    },
    Empty {
        specifier: String,
        path: String,
    },
    Error {
        specifier: String,
        code: &'static str,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
}

fn parse_kind(kind: &str) -> Result<ImportKind> {
    match kind {
        "import" | "import-statement" => Ok(ImportKind::ImportStatement),
        "require" | "require-call" => Ok(ImportKind::RequireCall),
        "dynamic" | "dynamic-import" => Ok(ImportKind::DynamicImport),
        "entry" | "entry-point" => Ok(ImportKind::EntryPoint),
        other => Err(miette!("unknown import kind: {other}")),
    }
}

/// Run the resolve command.
pub fn run(action: ResolveAction, json: bool) -> Result<()> {
    let platform: Platform = action
        .platform
        .parse()
        .map_err(|e: String| miette!("{e}"))?;
    let kind = parse_kind(&action.kind)?;

    let mut config = BuildConfig::new(&action.cwd, Vec::<String>::new()).with_platform(platform);
    config.conditions = action.conditions.clone();
    let resolver = Resolver::new(ResolverOptions::from_config(&config));

    let importer = action.from.as_ref().map(|p| config.absolute(p));
    let resolve_dir = importer
        .as_deref()
        .and_then(Path::parent)
        .map_or_else(|| action.cwd.clone(), Path::to_path_buf);

    let mut request = ResolveRequest::new(&action.specifier, &resolve_dir, kind);
    if let Some(importer) = importer.as_deref() {
        request = request.importer(importer);
    }
    tracing::debug!(specifier = %action.specifier, dir = %resolve_dir.display(), "resolving");

    let outcome = resolver.resolve(&request);
    for warning in resolver.take_warnings() {
        tracing::warn!(code = warning.code, "{warning}");
    }

    let specifier = action.specifier.clone();
    match outcome {
        Ok(resolution) => {
            if json {
                let out = match resolution {
                    Resolution::File(path) => ResolveJson::File {
                        specifier,
                        path: path.display().to_string(),
                    },
                    Resolution::External(path) => ResolveJson::External { specifier, path },
                    Resolution::Empty(path) => ResolveJson::Empty { specifier, path },
                };
                println!("{}", serde_json::to_string(&out).into_diagnostic()?);
            } else {
                match resolution {
                    Resolution::File(path) => println!("{}", path.display()),
                    Resolution::External(path) => println!("{path} (external)"),
                    Resolution::Empty(path) => println!("{path} (empty)"),
                }
            }
            Ok(())
        }
        Err(err) => {
            if json {
                let out = ResolveJson::Error {
                    specifier,
                    code: codes::RESOLVE_FAILED,
                    message: err.message.clone(),
                    note: err.note.clone(),
                };
                println!("{}", serde_json::to_string(&out).into_diagnostic()?);
                std::process::exit(1);
            }
            match &err.note {
                Some(note) => Err(miette!(help = note.clone(), "{}", err.message)),
                None => Err(miette!("{}", err.message)),
            }
        }
    }
}
