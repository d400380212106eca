//! Path helpers
//!
//! Relpaths are `/`-separated strings relative to a segment root, with `""`
//! naming the root itself. Absolute paths are normalized lexically; symlinks
//! are only resolved by [`is_under_root`].

use std::path::{Component, Path, PathBuf};

/// Join two relpaths, treating `""` as the identity
pub fn relpath_join(base: &str, component: &str) -> String {
    match (base.is_empty(), component.is_empty()) {
        (true, _) => component.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{}/{}", base, component),
    }
}

pub fn relpath_dirname(relpath: &str) -> &str {
    match relpath.rfind('/') {
        Some(i) => &relpath[..i],
        None => "",
    }
}

pub fn relpath_basename(relpath: &str) -> &str {
    match relpath.rfind('/') {
        Some(i) => &relpath[i + 1..],
        None => relpath,
    }
}

/// The part of `child` below `parent`, or `None` when `child` is not inside it
pub fn relpath_skip_ancestor<'a>(parent: &str, child: &'a str) -> Option<&'a str> {
    if parent.is_empty() {
        return Some(child);
    }
    let rest = child.strip_prefix(parent)?;
    if rest.is_empty() {
        Some("")
    } else {
        rest.strip_prefix('/')
    }
}

/// Canonical relpath: no empty, `.` or trailing components
pub fn canonicalize_relpath(path: &str) -> String {
    path.split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Lexically normalize an absolute path (`.` removed, `..` folded)
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// `child` expressed relative to `root` as a `/` relpath
pub fn abspath_skip_ancestor(root: &Path, child: &Path) -> Option<String> {
    let rest = child.strip_prefix(root).ok()?;
    let parts: Vec<String> = rest
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// Absolute path of `relpath` below `root`
pub fn join_relpath(root: &Path, relpath: &str) -> PathBuf {
    let mut out = root.to_path_buf();
    for c in relpath.split('/').filter(|c| !c.is_empty()) {
        out.push(c);
    }
    out
}

pub fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Join `relpath` onto `root` and verify that the result cannot escape `root`,
/// neither lexically nor through symlinks in the existing part of the path.
pub fn is_under_root(root: &Path, relpath: &str) -> Option<PathBuf> {
    let root = normalize(root);
    let mut joined = root.clone();
    for c in relpath.split('/') {
        match c {
            "" | "." => {}
            ".." => {
                if !joined.pop() || !joined.starts_with(&root) {
                    return None;
                }
            }
            other => joined.push(other),
        }
    }
    if !joined.starts_with(&root) {
        return None;
    }

    let real_root = std::fs::canonicalize(&root).unwrap_or_else(|_| root.clone());
    // The deepest existing ancestor decides where symlinks lead.
    let mut probe = joined.clone();
    loop {
        match std::fs::canonicalize(&probe) {
            Ok(real) => {
                if !real.starts_with(&real_root) {
                    return None;
                }
                break;
            }
            Err(_) => {
                if !probe.pop() {
                    break;
                }
            }
        }
    }
    Some(joined)
}
