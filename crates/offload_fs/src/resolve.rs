// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Turns a caller-supplied path into the real filesystem path an operation
/// acts on.
///
/// Resolution happens when an operation is created, on the calling thread,
/// before any work is dispatched.
pub trait PathResolver: Send + Sync + Debug {
    /// Resolves `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the path is not acceptable to
    /// this resolver.
    fn resolve(&self, path: &Path) -> Result<PathBuf>;
}

/// Uses paths exactly as given. Relative paths are relative to the process
/// working directory.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl PathResolver for Identity {
    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        Ok(path.to_path_buf())
    }
}

/// Confines all paths to a base directory.
///
/// Paths are joined onto the base, and any traversal that would escape it
/// (a leading `/`, a drive prefix, or `..` above the base) is rejected.
///
/// # Limitations
///
/// Validation is purely lexical and does **not** resolve symbolic links. A
/// path such as `symlink_to_parent/../../etc/passwd` passes validation if the
/// symlink component is treated as a normal directory name.
#[derive(Clone, Debug)]
pub struct Sandboxed {
    base: PathBuf,
}

impl Sandboxed {
    /// Creates a resolver confined to `base`.
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// The directory all paths are confined to.
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }
}

impl PathResolver for Sandboxed {
    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        safe_join(&self.base, path)
    }
}

fn safe_join(base: &Path, relative: &Path) -> Result<PathBuf> {
    let mut result = PathBuf::with_capacity(base.as_os_str().len() + 1 + relative.as_os_str().len());
    result.push(base);
    let mut depth: usize = 0;

    for component in relative.components() {
        match component {
            Component::Normal(c) => {
                result.push(c);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(Error::invalid_argument(format!(
                        "{} escapes {}",
                        relative.display(),
                        base.display()
                    )));
                }
                let _ = result.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::invalid_argument(format!(
                    "absolute path {} is not permitted in a sandbox",
                    relative.display()
                )));
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn sandbox() -> Sandboxed {
        Sandboxed::new("/data")
    }

    #[test]
    fn identity_keeps_path() {
        assert_eq!(
            Identity.resolve(Path::new("../x/y")).expect("ok"),
            PathBuf::from("../x/y")
        );
    }

    #[test]
    fn simple_relative() {
        assert_eq!(
            sandbox().resolve(Path::new("foo/bar.txt")).expect("ok"),
            PathBuf::from("/data/foo/bar.txt")
        );
    }

    #[test]
    fn dot_segments() {
        assert_eq!(
            sandbox().resolve(Path::new("./foo/./bar.txt")).expect("ok"),
            PathBuf::from("/data/foo/bar.txt")
        );
    }

    #[test]
    fn inner_dotdot_is_allowed() {
        assert_eq!(
            sandbox().resolve(Path::new("foo/../bar.txt")).expect("ok"),
            PathBuf::from("/data/bar.txt")
        );
    }

    #[test]
    fn escape_rejected() {
        let err = sandbox().resolve(Path::new("foo/../../etc/passwd")).expect_err("escape");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn absolute_rejected() {
        let err = sandbox().resolve(Path::new("/etc/passwd")).expect_err("absolute");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn empty_path_is_base() {
        assert_eq!(sandbox().resolve(Path::new("")).expect("ok"), PathBuf::from("/data"));
    }
}
