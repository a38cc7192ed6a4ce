use std::path::{Component, Path, PathBuf};

/// Lexically normalize a path: drop `.` components and fold `..` into the parent.
///
/// Does not touch the filesystem, so symlinks are not resolved.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Render `path` relative to `base` with forward slashes.
///
/// Falls back to the full path (still slash-separated) when `path` is not under `base`,
/// walking up with `../` where the two share a prefix.
#[must_use]
pub fn relative_slash(path: &Path, base: &Path) -> String {
    if let Ok(rel) = path.strip_prefix(base) {
        return to_slash(rel);
    }

    let path_parts: Vec<_> = path.components().collect();
    let base_parts: Vec<_> = base.components().collect();
    let common = path_parts
        .iter()
        .zip(&base_parts)
        .take_while(|(a, b)| a == b)
        .count();
    if common == 0 {
        return to_slash(path);
    }

    let mut out = PathBuf::new();
    for _ in common..base_parts.len() {
        out.push("..");
    }
    for part in &path_parts[common..] {
        out.push(part.as_os_str());
    }
    to_slash(&out)
}

/// Render a path with `/` separators regardless of platform.
#[must_use]
pub fn to_slash(path: &Path) -> String {
    let s = path.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        s.into_owned()
    } else {
        s.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

/// Lowest common ancestor directory of a set of paths.
#[must_use]
pub fn common_ancestor<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Option<PathBuf> {
    let mut iter = paths.into_iter();
    let mut acc = iter.next()?.to_path_buf();
    for path in iter {
        while !path.starts_with(&acc) {
            if !acc.pop() {
                return None;
            }
        }
    }
    Some(acc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize(Path::new("/a/b/./c/../d.js")),
            PathBuf::from("/a/b/d.js")
        );
        assert_eq!(normalize(Path::new("a/../../b")), PathBuf::from("../b"));
    }

    #[test]
    fn test_relative_slash() {
        assert_eq!(
            relative_slash(Path::new("/proj/src/a.js"), Path::new("/proj")),
            "src/a.js"
        );
        assert_eq!(
            relative_slash(Path::new("/proj/lib/a.js"), Path::new("/proj/src")),
            "../lib/a.js"
        );
    }

    #[test]
    fn test_common_ancestor() {
        let a = Path::new("/proj/src/pages/a.js");
        let b = Path::new("/proj/src/b.js");
        assert_eq!(
            common_ancestor([a.parent().unwrap(), b.parent().unwrap()]),
            Some(PathBuf::from("/proj/src"))
        );
        assert_eq!(common_ancestor(std::iter::empty()), None);
    }
}
