//! Node.js builtin modules and how each platform treats them.

use crate::config::Platform;

/// Builtin module names, without the `node:` prefix.
pub const NODE_BUILTINS: &[&str] = &[
    "assert",
    "assert/strict",
    "async_hooks",
    "buffer",
    "child_process",
    "cluster",
    "console",
    "constants",
    "crypto",
    "dgram",
    "diagnostics_channel",
    "dns",
    "dns/promises",
    "domain",
    "events",
    "fs",
    "fs/promises",
    "http",
    "http2",
    "https",
    "inspector",
    "module",
    "net",
    "os",
    "path",
    "path/posix",
    "path/win32",
    "perf_hooks",
    "process",
    "punycode",
    "querystring",
    "readline",
    "readline/promises",
    "repl",
    "stream",
    "stream/consumers",
    "stream/promises",
    "stream/web",
    "string_decoder",
    "sys",
    "timers",
    "timers/promises",
    "tls",
    "trace_events",
    "tty",
    "url",
    "util",
    "util/types",
    "v8",
    "vm",
    "wasi",
    "worker_threads",
    "zlib",
];

/// Browser polyfill packages for builtins that have a well-known one.
const POLYFILLS: &[(&str, &str)] = &[
    ("assert", "assert"),
    ("buffer", "buffer"),
    ("console", "console-browserify"),
    ("constants", "constants-browserify"),
    ("crypto", "crypto-browserify"),
    ("domain", "domain-browser"),
    ("events", "events"),
    ("http", "stream-http"),
    ("https", "https-browserify"),
    ("os", "os-browserify/browser"),
    ("path", "path-browserify"),
    ("punycode", "punycode"),
    ("process", "process/browser"),
    ("querystring", "querystring-es3"),
    ("stream", "stream-browserify"),
    ("string_decoder", "string_decoder"),
    ("sys", "util"),
    ("timers", "timers-browserify"),
    ("tty", "tty-browserify"),
    ("url", "url"),
    ("util", "util"),
    ("vm", "vm-browserify"),
    ("zlib", "browserify-zlib"),
];

/// What to do with a builtin import on the target platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinAction {
    /// Leave the import in the output.
    External,
    /// Resolve this npm package instead.
    Polyfill(&'static str),
    /// Replace with an empty module.
    Stub,
    /// Not a builtin this platform can satisfy.
    Error,
}

#[must_use]
pub fn is_builtin(name: &str) -> bool {
    NODE_BUILTINS.contains(&name)
}

#[must_use]
pub fn polyfill_for(name: &str) -> Option<&'static str> {
    POLYFILLS.iter().find(|(n, _)| *n == name).map(|(_, p)| *p)
}

/// Decide how `specifier` is handled, or `None` when it is not a builtin at all.
#[must_use]
pub fn builtin_action(specifier: &str, platform: Platform) -> Option<BuiltinAction> {
    if let Some(rest) = specifier.strip_prefix("bun:") {
        return (platform == Platform::Bun && !rest.is_empty()).then_some(BuiltinAction::External);
    }

    let (name, prefixed) = match specifier.strip_prefix("node:") {
        Some(name) => (name, true),
        None => (specifier, false),
    };
    let known = is_builtin(name);
    if !known && !prefixed {
        return None;
    }

    Some(match platform {
        Platform::Node | Platform::Bun | Platform::Neutral => BuiltinAction::External,
        Platform::Cloudflare if prefixed && known => BuiltinAction::External,
        Platform::Browser | Platform::Cloudflare => {
            if !known {
                BuiltinAction::Error
            } else if let Some(pkg) = polyfill_for(name) {
                BuiltinAction::Polyfill(pkg)
            } else {
                BuiltinAction::Stub
            }
        }
    })
}
