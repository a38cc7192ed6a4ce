//! CommonJS to ESM interop.
//!
//! What an ESM importer sees when it imports a CommonJS module. Code generation
//! emits the runtime equivalent of these functions; keeping one definition here
//! fixes the key order and the `__esModule` gating for both.

use serde_json::{Map, Value};

const DEFAULT: &str = "default";
const ES_MODULE: &str = "__esModule";

/// How an importer treats the `__esModule` marker of a CommonJS module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Interop {
    /// Plain `.js`/`.ts` importer: `exports.__esModule === true` means the default
    /// import is `exports.default`.
    Babel,
    /// `.mjs`/`.mts`, or `"type": "module"`: the default import is always the
    /// whole `exports` object.
    NodeEsm,
}

impl Interop {
    #[must_use]
    pub fn for_importer(node_esm: bool) -> Self {
        if node_esm {
            Self::NodeEsm
        } else {
            Self::Babel
        }
    }
}

/// Whether `exports` carries a marker this importer respects. Only the literal
/// boolean `true` counts.
#[must_use]
pub fn respects_es_module(exports: &Map<String, Value>, interop: Interop) -> bool {
    interop == Interop::Babel && exports.get(ES_MODULE) == Some(&Value::Bool(true))
}

/// The value bound by `import x from "cjs"`.
#[must_use]
pub fn default_import(exports: &Map<String, Value>, interop: Interop) -> Value {
    if respects_es_module(exports, interop) {
        exports.get(DEFAULT).cloned().unwrap_or(Value::Null)
    } else {
        Value::Object(exports.clone())
    }
}

/// The value bound by `import { name } from "cjs"`: always read off the raw object.
#[must_use]
pub fn named_import(exports: &Map<String, Value>, name: &str) -> Value {
    exports.get(name).cloned().unwrap_or(Value::Null)
}

/// The object bound by `import * as ns from "cjs"`.
///
/// Original keys keep their order. `default` holds the gated default value and
/// comes after them, then `__esModule` when the module set one.
#[must_use]
pub fn to_esm_namespace(exports: &Map<String, Value>, interop: Interop) -> Map<String, Value> {
    let mut ns: Map<String, Value> = exports
        .iter()
        .filter(|(k, _)| *k != DEFAULT && *k != ES_MODULE)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    ns.insert(DEFAULT.to_string(), default_import(exports, interop));
    if let Some(marker) = exports.get(ES_MODULE) {
        ns.insert(ES_MODULE.to_string(), marker.clone());
    }
    ns
}
