//! Package.json `exports` and `imports` map evaluation.
//!
//! - Exact subpath keys (`"./feature"`)
//! - Pattern keys with one `*` (`"./features/*"`) and directory keys (`"./dir/"`)
//! - Conditional objects, nested to any depth, matched by [`ConditionSet`] priority
//! - Array fallbacks (first syntactically valid target wins)
//! - `null` targets, which block a subpath
//!
//! When several keys match, the most specific wins: the longest prefix before the
//! `*`, then the longest key. JSON key order never matters.

use super::conditions::ConditionSet;
use serde_json::{Map, Value};
use std::borrow::Cow;

/// What a map lookup produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapOutcome {
    /// Package-relative target (`./dist/x.js`), or a bare specifier from an imports map.
    Target(String),
    /// The matched key's target is `null`.
    Excluded,
    /// No key matched.
    NotFound,
    /// A key matched but none of its conditions are active.
    NoCondition,
    /// A key matched but its target is not a valid package path.
    Invalid(String),
}

/// Resolve `subpath` (`"."` or `"./x"`) through an `exports` value.
///
/// `Err` means the field itself is malformed (e.g. `false`, or mixing `.` keys
/// with condition keys).
pub fn resolve_exports(
    exports: &Value,
    subpath: &str,
    conditions: &ConditionSet,
) -> Result<MapOutcome, String> {
    let map = normalize_exports(exports)?;
    Ok(lookup(&map, subpath, conditions, false))
}

/// Resolve a `#name` specifier through an `imports` value.
pub fn resolve_imports(
    imports: &Value,
    specifier: &str,
    conditions: &ConditionSet,
) -> Result<MapOutcome, String> {
    if specifier == "#" || specifier.starts_with("#/") {
        return Ok(MapOutcome::Invalid(specifier.to_string()));
    }
    let Some(map) = imports.as_object() else {
        return Err("The \"imports\" field must be an object".to_string());
    };
    Ok(lookup(map, specifier, conditions, true))
}

/// The `"."` sugar: a string, array or pure-conditions object means `{ ".": exports }`.
fn normalize_exports(exports: &Value) -> Result<Cow<'_, Map<String, Value>>, String> {
    let sugar = |v: &Value| {
        let mut map = Map::new();
        map.insert(".".to_string(), v.clone());
        Cow::Owned(map)
    };
    match exports {
        Value::String(_) | Value::Array(_) | Value::Null => Ok(sugar(exports)),
        Value::Object(obj) => {
            let dotted = obj.keys().filter(|k| k.starts_with('.')).count();
            if dotted == obj.len() {
                Ok(Cow::Borrowed(obj))
            } else if dotted == 0 {
                Ok(sugar(exports))
            } else {
                Err("Invalid package configuration: \"exports\" cannot contain some keys starting with \".\" and some not".to_string())
            }
        }
        Value::Bool(_) | Value::Number(_) => Err(format!(
            "Invalid package configuration: \"exports\" cannot be {exports}"
        )),
    }
}

/// How a key matched: exactly, through a `*`, or through a trailing `/`.
enum KeyMatch<'a> {
    Exact,
    Star(&'a str),
    Directory(&'a str),
}

fn lookup(
    map: &Map<String, Value>,
    key: &str,
    conditions: &ConditionSet,
    allow_bare: bool,
) -> MapOutcome {
    if let Some(target) = map.get(key) {
        if !key.contains('*') && !key.ends_with('/') {
            return resolve_target(target, &KeyMatch::Exact, conditions, allow_bare);
        }
    }

    let mut best: Option<(&str, usize, &Value, KeyMatch<'_>)> = None;
    for (candidate, target) in map {
        let matched = if let Some(star) = candidate.find('*') {
            if candidate[star + 1..].contains('*') {
                continue;
            }
            let (prefix, suffix) = (&candidate[..star], &candidate[star + 1..]);
            if key.len() < candidate.len()
                || !key.starts_with(prefix)
                || !key.ends_with(suffix)
                || key == prefix
            {
                continue;
            }
            (star + 1, KeyMatch::Star(&key[prefix.len()..key.len() - suffix.len()]))
        } else if candidate.ends_with('/') && key.starts_with(candidate.as_str()) {
            (candidate.len(), KeyMatch::Directory(&key[candidate.len()..]))
        } else {
            continue;
        };

        let better = match &best {
            None => true,
            Some((best_key, best_base, _, _)) => {
                matched.0 > *best_base || (matched.0 == *best_base && candidate.len() > best_key.len())
            }
        };
        if better {
            best = Some((candidate, matched.0, target, matched.1));
        }
    }

    match best {
        Some((_, _, target, how)) => resolve_target(target, &how, conditions, allow_bare),
        None => MapOutcome::NotFound,
    }
}

fn resolve_target(
    target: &Value,
    how: &KeyMatch<'_>,
    conditions: &ConditionSet,
    allow_bare: bool,
) -> MapOutcome {
    match target {
        Value::String(s) => string_target(s, how, allow_bare),
        Value::Array(items) => {
            let mut last = MapOutcome::NotFound;
            for item in items {
                match resolve_target(item, how, conditions, allow_bare) {
                    outcome @ MapOutcome::Target(_) => return outcome,
                    other => last = other,
                }
            }
            last
        }
        Value::Object(obj) => {
            for condition in conditions.priority() {
                if let Some(value) = obj.get(condition) {
                    match resolve_target(value, how, conditions, allow_bare) {
                        MapOutcome::NoCondition => continue,
                        other => return other,
                    }
                }
            }
            MapOutcome::NoCondition
        }
        Value::Null => MapOutcome::Excluded,
        Value::Bool(_) | Value::Number(_) => MapOutcome::Invalid(target.to_string()),
    }
}

fn string_target(target: &str, how: &KeyMatch<'_>, allow_bare: bool) -> MapOutcome {
    let substituted = match how {
        KeyMatch::Exact => target.to_string(),
        KeyMatch::Star(m) => target.replace('*', m),
        KeyMatch::Directory(rest) => {
            if !target.ends_with('/') {
                return MapOutcome::Invalid(target.to_string());
            }
            format!("{target}{rest}")
        }
    };

    if !target.starts_with("./") {
        // imports maps may redirect to a package
        let bare = !target.starts_with('/') && !target.starts_with("../") && !target.starts_with('.');
        if allow_bare && bare {
            return MapOutcome::Target(substituted);
        }
        return MapOutcome::Invalid(target.to_string());
    }

    if has_invalid_segment(&substituted[2..]) {
        return MapOutcome::Invalid(substituted);
    }
    MapOutcome::Target(substituted)
}

/// `..`, `.` and `node_modules` segments may not appear after the leading `./`.
fn has_invalid_segment(path: &str) -> bool {
    path.split(['/', '\\']).any(|segment| {
        segment == ".." || segment == "." || segment.eq_ignore_ascii_case("node_modules")
    })
}
