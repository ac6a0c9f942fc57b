//! Utility functions for normalizing and validating paths.

use std::path::{Component, Path, PathBuf};

use crate::{GatehostUtilsError, GatehostUtilsResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The kind of path a normalization accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedPathType {
    /// Accept both absolute and relative paths.
    Any,

    /// Accept only absolute paths.
    Absolute,

    /// Accept only relative paths.
    Relative,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Normalizes a path component-wise without touching the filesystem.
///
/// `.` components are removed and `..` components are resolved against the
/// preceding component. A `..` that would climb above the start of the path
/// is rejected, as is a path of the wrong [`SupportedPathType`].
pub fn normalize_path(
    path: impl AsRef<Path>,
    path_type: SupportedPathType,
) -> GatehostUtilsResult<PathBuf> {
    let path = path.as_ref();
    let is_absolute = path.is_absolute();

    match path_type {
        SupportedPathType::Absolute if !is_absolute => {
            return Err(GatehostUtilsError::PathValidation(format!(
                "expected an absolute path, got: {}",
                path.display()
            )));
        }
        SupportedPathType::Relative if is_absolute => {
            return Err(GatehostUtilsError::PathValidation(format!(
                "expected a relative path, got: {}",
                path.display()
            )));
        }
        _ => {}
    }

    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component),
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = match normalized.components().next_back() {
                    Some(Component::Normal(_)) => normalized.pop(),
                    _ => false,
                };
                if !popped {
                    return Err(GatehostUtilsError::PathValidation(format!(
                        "path escapes its root: {}",
                        path.display()
                    )));
                }
            }
            Component::Normal(part) => normalized.push(part),
        }
    }

    Ok(normalized)
}

/// Returns true when `child` is equal to `root` or a descendant of it.
///
/// Both paths are compared component-wise; neither is consulted on disk, so
/// callers must normalize first.
pub fn path_is_within(child: impl AsRef<Path>, root: impl AsRef<Path>) -> bool {
    child.as_ref().starts_with(root.as_ref())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_removes_dot_segments() {
        let normalized = normalize_path("/data/./instances/alpha", SupportedPathType::Absolute)
            .expect("should normalize");
        assert_eq!(normalized, PathBuf::from("/data/instances/alpha"));
    }

    #[test]
    fn test_normalize_path_resolves_parent_segments() {
        let normalized = normalize_path("configs/../world/region", SupportedPathType::Relative)
            .expect("should normalize");
        assert_eq!(normalized, PathBuf::from("world/region"));
    }

    #[test]
    fn test_normalize_path_rejects_escape() {
        assert!(normalize_path("../../etc/passwd", SupportedPathType::Relative).is_err());
        assert!(normalize_path("world/../../other", SupportedPathType::Any).is_err());
    }

    #[test]
    fn test_normalize_path_enforces_path_type() {
        assert!(normalize_path("relative/path", SupportedPathType::Absolute).is_err());
        assert!(normalize_path("/absolute/path", SupportedPathType::Relative).is_err());
        assert!(normalize_path("/absolute/path", SupportedPathType::Any).is_ok());
    }

    #[test]
    fn test_path_is_within() {
        assert!(path_is_within("/data/alpha", "/data/alpha"));
        assert!(path_is_within("/data/alpha/world", "/data/alpha"));
        assert!(!path_is_within("/data/alphabet", "/data/alpha"));
        assert!(!path_is_within("/etc/passwd", "/data/alpha"));
    }
}
