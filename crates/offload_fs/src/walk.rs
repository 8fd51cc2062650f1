// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Ordered traversal of directory trees and the recursive operations built
//! on it.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{Level, event};

use crate::error::{Error, NativeResultExt as _, Result};
use crate::native;
use crate::permissions::PermissionSet;

enum Step {
    Visit(PathBuf),
    Leave(PathBuf, Option<DirKey>),
}

/// Identifies a directory independently of the path it was reached by.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct DirKey {
    dev: u64,
    ino: u64,
}

impl DirKey {
    #[cfg(unix)]
    fn of(metadata: &Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt as _;
        Some(Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }

    #[cfg(not(unix))]
    fn of(_metadata: &Metadata) -> Option<Self> {
        None
    }
}

/// Walks the tree rooted at `root` sequentially.
///
/// * `enter_dir` runs for a directory before any of its children.
/// * `visit_file` runs for every entry that is not a directory.
/// * `leave_dir` runs for a directory after all of its children.
///
/// Children are visited in file-name order, regardless of the order the
/// platform lists them in. If `root` is not a directory it is passed to
/// `visit_file` alone.
///
/// When `follow_links` is set, symbolic links are resolved and a link to a
/// directory is descended into; a link back to a directory that is currently
/// being walked fails with [`Error::Io`]. Otherwise links are passed to
/// `visit_file` as they are.
///
/// The first failure from any callback or from listing a directory aborts the
/// walk and is returned.
pub(crate) fn walk<D, F, L>(
    root: &Path,
    follow_links: bool,
    mut enter_dir: D,
    mut visit_file: F,
    mut leave_dir: L,
) -> Result<()>
where
    D: FnMut(&Path, &Metadata) -> Result<()>,
    F: FnMut(&Path, &Metadata) -> Result<()>,
    L: FnMut(&Path) -> Result<()>,
{
    let mut active = HashSet::new();
    let mut stack = vec![Step::Visit(root.to_path_buf())];

    while let Some(step) = stack.pop() {
        match step {
            Step::Visit(path) => {
                let metadata = if follow_links {
                    fs::metadata(&path)
                } else {
                    fs::symlink_metadata(&path)
                }
                .at(&path)?;

                if !metadata.is_dir() {
                    event!(Level::TRACE, path = %path.display(), "visit file");
                    visit_file(&path, &metadata)?;
                    continue;
                }

                let key = if follow_links { DirKey::of(&metadata) } else { None };
                if let Some(key) = key
                    && !active.insert(key)
                {
                    return Err(Error::io(&path, io::Error::other("filesystem loop detected")));
                }

                event!(Level::TRACE, path = %path.display(), "enter directory");
                enter_dir(&path, &metadata)?;

                let mut children = fs::read_dir(&path)
                    .and_then(|entries| entries.map(|entry| entry.map(|e| e.file_name())).collect::<io::Result<Vec<OsString>>>())
                    .at(&path)?;
                children.sort_unstable();

                stack.push(Step::Leave(path.clone(), key));
                stack.extend(children.into_iter().rev().map(|name| Step::Visit(path.join(name))));
            }
            Step::Leave(path, key) => {
                if let Some(key) = key {
                    let _ = active.remove(&key);
                }
                event!(Level::TRACE, path = %path.display(), "leave directory");
                leave_dir(&path)?;
            }
        }
    }

    Ok(())
}

fn ignore_leave(_: &Path) -> Result<()> {
    Ok(())
}

/// Maps `path`, which lies under `source_root`, to the same relative location
/// under `target_root`.
fn relocate(path: &Path, source_root: &Path, target_root: &Path) -> PathBuf {
    match path.strip_prefix(source_root) {
        Ok(relative) if !relative.as_os_str().is_empty() => target_root.join(relative),
        _ => target_root.to_path_buf(),
    }
}

/// Copies the tree at `source` to `target`, following symbolic links.
///
/// Directories are created before their contents are copied. A directory that
/// already exists at the target location is reused; any other existing entry,
/// including a file where a file is to be copied, fails the copy with
/// [`Error::AlreadyExists`]. Entries copied before a failure are left in
/// place.
pub(crate) fn copy_tree(source: &Path, target: &Path) -> Result<()> {
    walk(
        source,
        true,
        |dir, _| native::create_dir_tolerant(&relocate(dir, source, target)),
        |file, metadata| native::copy_file(file, &relocate(file, source, target), metadata),
        ignore_leave,
    )
}

/// Applies `dir_perms` to every directory and `file_perms` to every file in
/// the tree at `root`, parents before children.
///
/// A link at `root` itself is resolved and the tree it points to is changed.
/// Links below `root` are neither followed nor modified.
pub(crate) fn chmod_tree(root: &Path, file_perms: PermissionSet, dir_perms: PermissionSet) -> Result<()> {
    let root = if fs::symlink_metadata(root).at(root)?.file_type().is_symlink() {
        fs::canonicalize(root).at(root)?
    } else {
        root.to_path_buf()
    };

    walk(
        &root,
        false,
        |dir, _| native::set_permissions(dir, dir_perms),
        |file, metadata| {
            if metadata.file_type().is_symlink() {
                Ok(())
            } else {
                native::set_permissions(file, file_perms)
            }
        },
        ignore_leave,
    )
}

/// Deletes the tree at `root`, children before parents.
///
/// Symbolic links are removed, not followed. A failure aborts the deletion;
/// entries removed before it stay removed.
pub(crate) fn delete_tree(root: &Path) -> Result<()> {
    walk(
        root,
        false,
        |_, _| Ok(()),
        |file, _| native::delete_entry(file),
        |dir| fs::remove_dir(dir).at(dir),
    )
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::error::ErrorKind;

    #[derive(Debug, PartialEq, Eq)]
    enum Event {
        Enter(String),
        File(String),
        Leave(String),
    }

    fn name(root: &Path, path: &Path) -> String {
        path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/")
    }

    fn record(root: &Path, follow_links: bool) -> Result<Vec<Event>> {
        let events = core::cell::RefCell::new(Vec::new());
        walk(
            root,
            follow_links,
            |p, _| {
                events.borrow_mut().push(Event::Enter(name(root, p)));
                Ok(())
            },
            |p, _| {
                events.borrow_mut().push(Event::File(name(root, p)));
                Ok(())
            },
            |p| {
                events.borrow_mut().push(Event::Leave(name(root, p)));
                Ok(())
            },
        )?;
        Ok(events.into_inner())
    }

    fn sample_tree() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("b/inner")).unwrap();
        fs::create_dir(root.join("a")).unwrap();
        fs::write(root.join("z.txt"), b"z").unwrap();
        fs::write(root.join("a/one.txt"), b"1").unwrap();
        fs::write(root.join("b/inner/two.txt"), b"2").unwrap();
        fs::write(root.join("b/c.txt"), b"c").unwrap();
        tmp
    }

    #[test]
    fn visits_in_name_order_pre_and_post() {
        let tmp = sample_tree();
        let events = record(tmp.path(), false).unwrap();

        assert_eq!(
            events,
            vec![
                Event::Enter(String::new()),
                Event::Enter("a".into()),
                Event::File("a/one.txt".into()),
                Event::Leave("a".into()),
                Event::Enter("b".into()),
                Event::File("b/c.txt".into()),
                Event::Enter("b/inner".into()),
                Event::File("b/inner/two.txt".into()),
                Event::Leave("b/inner".into()),
                Event::Leave("b".into()),
                Event::File("z.txt".into()),
                Event::Leave(String::new()),
            ]
        );
    }

    #[test]
    fn file_root_is_visited_alone() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("only.txt");
        fs::write(&file, b"x").unwrap();

        let events = record(&file, false).unwrap();
        assert_eq!(events, vec![Event::File(String::new())]);
    }

    #[test]
    fn missing_root_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = record(&tmp.path().join("nope"), false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn first_failure_stops_the_walk() {
        let tmp = sample_tree();
        let mut visited = Vec::new();

        let err = walk(
            tmp.path(),
            false,
            |_, _| Ok(()),
            |p, _| {
                visited.push(p.to_path_buf());
                Err(Error::invalid_argument("stop"))
            },
            |_| panic!("no directory may be left after a failure"),
        )
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(visited, vec![tmp.path().join("a/one.txt")]);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_cycle_is_detected_when_following() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("dir")).unwrap();
        std::os::unix::fs::symlink(tmp.path(), tmp.path().join("dir/loop")).unwrap();

        let err = record(tmp.path(), true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("loop"));

        // Without following, the link is just a leaf.
        let events = record(tmp.path(), false).unwrap();
        assert!(events.contains(&Event::File("dir/loop".into())));
    }

    #[test]
    fn copy_tree_reproduces_structure() {
        let src = sample_tree();
        let dst = TempDir::new().unwrap();
        let target = dst.path().join("copy");

        copy_tree(src.path(), &target).unwrap();

        assert_eq!(fs::read(target.join("z.txt")).unwrap(), b"z");
        assert_eq!(fs::read(target.join("a/one.txt")).unwrap(), b"1");
        assert_eq!(fs::read(target.join("b/inner/two.txt")).unwrap(), b"2");
        assert_eq!(fs::read(target.join("b/c.txt")).unwrap(), b"c");
    }

    #[test]
    fn copy_tree_rejects_existing_file_target() {
        let src = sample_tree();
        let dst = TempDir::new().unwrap();
        let target = dst.path().join("copy");
        fs::create_dir_all(target.join("b")).unwrap();
        fs::write(target.join("b/c.txt"), b"old").unwrap();

        let err = copy_tree(src.path(), &target).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        // Files before the collision were copied; the collision was not overwritten.
        assert_eq!(fs::read(target.join("a/one.txt")).unwrap(), b"1");
        assert_eq!(fs::read(target.join("b/c.txt")).unwrap(), b"old");
    }

    #[test]
    fn copy_tree_rejects_file_where_directory_goes() {
        let src = sample_tree();
        let dst = TempDir::new().unwrap();
        let target = dst.path().join("copy");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("a"), b"not a directory").unwrap();

        let err = copy_tree(src.path(), &target).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn delete_tree_removes_everything() {
        let tmp = sample_tree();
        let root = tmp.path().join("b");

        delete_tree(&root).unwrap();

        assert!(!root.exists());
        assert!(tmp.path().join("a/one.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn delete_tree_removes_links_not_targets() {
        let tmp = sample_tree();
        let victim = tmp.path().join("victim");
        fs::create_dir(&victim).unwrap();
        std::os::unix::fs::symlink(tmp.path().join("a"), victim.join("link")).unwrap();

        delete_tree(&victim).unwrap();

        assert!(!victim.exists());
        assert!(tmp.path().join("a/one.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn chmod_tree_distinguishes_directories_and_files() {
        use std::os::unix::fs::PermissionsExt as _;

        let tmp = sample_tree();
        let file_perms: PermissionSet = "rw-r-----".parse().unwrap();
        let dir_perms: PermissionSet = "rwxr-x---".parse().unwrap();

        chmod_tree(tmp.path(), file_perms, dir_perms).unwrap();

        let mode = |p: &str| fs::metadata(tmp.path().join(p)).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(""), 0o750);
        assert_eq!(mode("b/inner"), 0o750);
        assert_eq!(mode("z.txt"), 0o640);
        assert_eq!(mode("b/inner/two.txt"), 0o640);
    }

    #[cfg(unix)]
    #[test]
    fn chmod_tree_follows_a_linked_root_only() {
        use std::os::unix::fs::PermissionsExt as _;

        let tmp = sample_tree();
        let link = tmp.path().join("root_link");
        std::os::unix::fs::symlink(tmp.path().join("b"), &link).unwrap();
        std::os::unix::fs::symlink(tmp.path().join("z.txt"), tmp.path().join("b/inner/to_z")).unwrap();

        chmod_tree(&link, "rw-------".parse().unwrap(), "rwx------".parse().unwrap()).unwrap();

        let mode = |p: &str| fs::metadata(tmp.path().join(p)).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode("b"), 0o700);
        assert_eq!(mode("b/inner"), 0o700);
        assert_eq!(mode("b/inner/two.txt"), 0o600);
        // Reached only through a link below the root, so left alone.
        assert_ne!(mode("z.txt"), 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn chmod_tree_on_dangling_root_link_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let link = tmp.path().join("dangling");
        std::os::unix::fs::symlink(tmp.path().join("missing"), &link).unwrap();

        let err = chmod_tree(&link, "rw-------".parse().unwrap(), "rwx------".parse().unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn relocate_maps_root_and_children() {
        let source = Path::new("/src");
        let target = Path::new("/dst");
        assert_eq!(relocate(Path::new("/src"), source, target), PathBuf::from("/dst"));
        assert_eq!(
            relocate(Path::new("/src/a/b.txt"), source, target),
            PathBuf::from("/dst/a/b.txt")
        );
    }
}
