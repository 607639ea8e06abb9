//! Canonical watch paths.
//!
//! A watch request is resolved before subscription so that the paths handed
//! to the event source, and the paths it reports back, are stable: absolute,
//! free of `.`/`..`, symlink-resolved, and spelled with the on-disk case of
//! every existing component. Trailing components that do not exist yet are
//! kept verbatim so a directory can be watched before it is created.

use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// A canonical absolute path, produced only by [`canonicalize`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchPath(PathBuf);

impl WatchPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for WatchPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl std::fmt::Display for WatchPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Resolve `input` to a [`WatchPath`].
///
/// Never fails: if nothing can be resolved the absolute, lexically cleaned
/// path is returned instead.
pub fn canonicalize(input: impl AsRef<Path>) -> WatchPath {
    resolve(input.as_ref(), 0)
}

/// Dangling links followed before giving up, as with `SYMLOOP_MAX`.
const MAX_LINK_HOPS: usize = 40;

fn resolve(input: &Path, hops: usize) -> WatchPath {
    let absolute = absolutize(input);

    // Peel non-existent trailing components until an existing ancestor is
    // found. The root always exists, so the loop terminates.
    let components: Vec<Component<'_>> = absolute.components().collect();
    let mut existing = absolute.clone();
    let mut kept = components.len();
    while kept > 1 && !exists(&existing) {
        kept -= 1;
        existing.pop();
    }
    let imaginary = components[kept..].to_vec();

    let mut resolved = match dangling_target(&existing) {
        Some(target) if hops < MAX_LINK_HOPS => resolve(&target, hops + 1).0,
        _ => resolve_existing(&existing),
    };
    crate::debug_event!(
        "paths",
        "resolved",
        "{} -> {} (+{} pending)",
        existing.display(),
        resolved.display(),
        imaginary.len()
    );

    // Re-append the imaginary suffix without touching the disk.
    let mut appended = 0usize;
    let mut rest = imaginary.into_iter();
    while let Some(component) = rest.next() {
        match component {
            Component::Normal(name) => {
                resolved.push(name);
                appended += 1;
            }
            Component::ParentDir if appended > 0 => {
                resolved.pop();
                appended -= 1;
            }
            Component::ParentDir => {
                // `..` climbed above the resolved ancestor, whose parent
                // exists again; resolve the remainder from there.
                resolved.pop();
                let remainder: PathBuf = rest.map(|c| c.as_os_str()).collect();
                return resolve(&resolved.join(remainder), hops);
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    WatchPath(resolved)
}

/// Prefix relative paths with the current working directory.
fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(e) => {
            tracing::warn!("[paths] cannot read working directory: {e}");
            Path::new(std::path::MAIN_SEPARATOR_STR).join(path)
        }
    }
}

/// Whether a directory entry exists, without following a final symlink.
fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Where `path` points when it is a symlink whose target does not exist.
fn dangling_target(path: &Path) -> Option<PathBuf> {
    if fs::metadata(path).is_ok() {
        return None;
    }
    let link = fs::read_link(path).ok()?;
    match path.parent() {
        Some(parent) if link.is_relative() => Some(parent.join(link)),
        _ => Some(link),
    }
}

/// Resolve an existing path through the filesystem.
///
/// Symlinks are resolved by the OS, then each component is re-spelled from
/// the directory entry that has the same file identity, so the result
/// carries the on-disk case even on case-insensitive volumes.
fn resolve_existing(path: &Path) -> PathBuf {
    let real = match fs::canonicalize(path) {
        Ok(real) => real,
        Err(e) => {
            tracing::warn!("[paths] cannot resolve {}: {e}", path.display());
            return lexical_clean(path);
        }
    };

    let mut corrected = PathBuf::new();
    for component in real.components() {
        match component {
            Component::Normal(name) => {
                let spelled = on_disk_name(&corrected, name.to_os_string());
                corrected.push(spelled);
            }
            other => corrected.push(other.as_os_str()),
        }
    }
    corrected
}

/// The directory entry name under `parent` that refers to the same file as
/// `parent/name`, or `name` itself when it already matches or no better
/// spelling can be found.
fn on_disk_name(parent: &Path, name: OsString) -> OsString {
    let Ok(target) = fs::symlink_metadata(parent.join(&name)) else {
        return name;
    };
    let Ok(entries) = fs::read_dir(parent) else {
        return name;
    };

    let mut identity_match = None;
    for entry in entries.flatten() {
        let entry_name = entry.file_name();
        if entry_name == name {
            return name;
        }
        if identity_match.is_none() {
            if let Ok(meta) = entry.metadata() {
                if same_file(&meta, &target) {
                    identity_match = Some(entry_name);
                }
            }
        }
    }
    identity_match.unwrap_or(name)
}

#[cfg(unix)]
fn same_file(a: &fs::Metadata, b: &fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(_a: &fs::Metadata, _b: &fs::Metadata) -> bool {
    false
}

/// Remove `.` and resolve `..` textually.
fn lexical_clean(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}
