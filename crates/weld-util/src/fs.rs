use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

/// Read a file to string, replacing invalid UTF-8 sequences with the replacement character.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn read_to_string_lossy(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Atomically write bytes to a file: write a sibling temp file, then rename over the target.
///
/// Missing parent directories are created first.
///
/// # Errors
/// Returns an error if the directory cannot be created or the write or rename fails.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("out");
    let temp_path = parent.join(format!(".{file_name}.weld-tmp.{}", std::process::id()));

    {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        // Windows refuses to rename over an existing file.
        if cfg!(windows) {
            fs::copy(&temp_path, path)?;
            let _ = fs::remove_file(&temp_path);
            return Ok(());
        }
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(())
}

/// Check whether every component of `path` exists with exactly the casing given.
///
/// On case-insensitive filesystems `Path::is_file` succeeds for `Src/Foo.js` when only
/// `src/foo.js` exists; this walks each parent listing to tell the two apart.
/// Components whose parent cannot be listed are taken as written.
#[must_use]
pub fn exists_with_exact_case(path: &Path) -> bool {
    let mut dir = PathBuf::new();
    for component in path.components() {
        if let Component::Normal(name) = component {
            let listing = if dir.as_os_str().is_empty() {
                Path::new(".")
            } else {
                dir.as_path()
            };
            if let Ok(entries) = fs::read_dir(listing) {
                if !entries.filter_map(Result::ok).any(|entry| entry.file_name() == name) {
                    return false;
                }
            }
        }
        dir.push(component);
    }
    dir.exists()
}
