//! Tests for the sandbox path helpers.
//!
//! The mount and pivot sequence itself needs root and a fresh mount
//! namespace, so only the pure parts are exercised here.

use cloister::error::Error;
use cloister::sandbox::contained_path;
use std::path::{Path, PathBuf};

#[test]
fn test_absolute_paths_forced_relative() {
    // A container path of /etc/passwd must land under the new root, not on
    // the host.
    let contained = contained_path(Path::new("/etc/passwd")).unwrap();
    assert_eq!(contained, PathBuf::from("etc/passwd"));
}

#[test]
fn test_relative_paths_kept() {
    let contained = contained_path(Path::new("data/cache")).unwrap();
    assert_eq!(contained, PathBuf::from("data/cache"));
}

#[test]
fn test_current_dir_components_dropped() {
    let contained = contained_path(Path::new("./a/./b")).unwrap();
    assert_eq!(contained, PathBuf::from("a/b"));
}

#[test]
fn test_parent_components_refused() {
    for hostile in ["../escape", "a/../../escape", "/a/../../etc/passwd"] {
        let err = contained_path(Path::new(hostile)).unwrap_err();
        assert!(
            matches!(err, Error::PathTraversal { .. }),
            "{hostile} should be refused"
        );
    }
}

#[test]
fn test_root_path_collapses_to_empty() {
    let contained = contained_path(Path::new("/")).unwrap();
    assert!(contained.as_os_str().is_empty());
}
