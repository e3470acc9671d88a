use std::path::{Component, Path, PathBuf};

use crate::error::SecurityError;

/// Validate a filename derived from a remote manifest entry.
///
/// Rejects anything that could steer a write outside the cache root:
/// control bytes, path separators, `..`, absolute paths, empty names.
pub fn sanitize_file_name(name: &str) -> Result<&str, SecurityError> {
    if name.is_empty()
        || name.chars().any(|c| c.is_control())
        || name.contains('/')
        || name.contains('\\')
        || name == "."
        || name == ".."
        || name.contains(':')
    {
        return Err(SecurityError::PathEscape(name.to_string()));
    }
    Ok(name)
}

/// Join `name` under `root` and verify containment.
///
/// The name is sanitized first; the joined result is then re-checked
/// component-wise (realpath-style, without requiring the file to exist)
/// so a crafted name can never escape the root.
pub fn contained_join(root: &Path, name: &str) -> Result<PathBuf, SecurityError> {
    let name = sanitize_file_name(name)?;
    let joined = root.join(name);

    let normalized = normalize(&joined);
    let root_normalized = normalize(root);
    if !normalized.starts_with(&root_normalized) {
        return Err(SecurityError::PathEscape(name.to_string()));
    }
    Ok(joined)
}

/// Lexically resolve `.` and `..` components without touching the
/// filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_rejected() {
        assert!(sanitize_file_name("../../etc/passwd").is_err());
        assert!(sanitize_file_name("..").is_err());
        assert!(sanitize_file_name("a/b").is_err());
        assert!(sanitize_file_name("a\\b").is_err());
    }

    #[test]
    fn absolute_and_control_rejected() {
        assert!(sanitize_file_name("/etc/passwd").is_err());
        assert!(sanitize_file_name("file\u{0}name").is_err());
        assert!(sanitize_file_name("").is_err());
    }

    #[test]
    fn plain_names_accepted() {
        assert_eq!(sanitize_file_name("artifact.tar.gz").unwrap(), "artifact.tar.gz");
        assert_eq!(sanitize_file_name("ab12cd.bin").unwrap(), "ab12cd.bin");
    }

    #[test]
    fn contained_join_stays_under_root() {
        let root = Path::new("/var/cache/oneiric");
        let p = contained_join(root, "deadbeef.bin").unwrap();
        assert!(p.starts_with(root));
        assert!(contained_join(root, "../outside").is_err());
    }
}
