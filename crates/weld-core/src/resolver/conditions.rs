//! Export-condition priority lists.
//!
//! Which key of a conditional `exports`/`imports` object applies is decided by
//! walking a priority list, never by the key order of the JSON object. The
//! per-platform lists are data; everything else (user conditions, `import` or
//! `require`, `module`, `default`) is layered around them.

use crate::config::Platform;
use crate::parse::ImportKind;

pub const BROWSER: &[&str] = &["browser"];
pub const NODE: &[&str] = &["node"];
pub const BUN: &[&str] = &["bun", "node"];
pub const NEUTRAL: &[&str] = &[];
pub const CLOUDFLARE: &[&str] = &["workerd", "worker", "browser", "node"];

#[must_use]
pub fn platform_conditions(platform: Platform) -> &'static [&'static str] {
    match platform {
        Platform::Browser => BROWSER,
        Platform::Node => NODE,
        Platform::Bun => BUN,
        Platform::Neutral => NEUTRAL,
        Platform::Cloudflare => CLOUDFLARE,
    }
}

/// Ordered, de-duplicated condition names; earlier entries win.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConditionSet {
    priority: Vec<String>,
}

impl ConditionSet {
    /// User conditions, then the platform list, then `import`/`require`, `module`, `default`.
    #[must_use]
    pub fn new(platform: Platform, kind: ImportKind, custom: &[String]) -> Self {
        let kind_condition = if kind.is_require() { "require" } else { "import" };
        let names = custom
            .iter()
            .map(String::as_str)
            .chain(platform_conditions(platform).iter().copied())
            .chain([kind_condition, "module", "default"]);
        Self::from_priority(names)
    }

    /// Build from an explicit list. `default` is appended when missing.
    #[must_use]
    pub fn from_priority<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut priority: Vec<String> = Vec::new();
        for name in names {
            if !priority.iter().any(|p| p == name) {
                priority.push(name.to_string());
            }
        }
        if !priority.iter().any(|p| p == "default") {
            priority.push("default".to_string());
        }
        Self { priority }
    }

    #[must_use]
    pub fn priority(&self) -> &[String] {
        &self.priority
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.priority.iter().any(|p| p == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloudflare_order() {
        let set = ConditionSet::new(Platform::Cloudflare, ImportKind::ImportStatement, &[]);
        assert_eq!(
            set.priority(),
            ["workerd", "worker", "browser", "node", "import", "module", "default"]
        );
    }

    #[test]
    fn test_custom_conditions_come_first_and_dedupe() {
        let custom = vec!["development".to_string(), "node".to_string()];
        let set = ConditionSet::new(Platform::Bun, ImportKind::RequireCall, &custom);
        assert_eq!(
            set.priority(),
            ["development", "node", "bun", "require", "module", "default"]
        );
        assert!(!set.contains("import"));
    }

    #[test]
    fn test_from_priority_appends_default() {
        let set = ConditionSet::from_priority(["a", "b"]);
        assert_eq!(set.priority(), ["a", "b", "default"]);
    }
}
