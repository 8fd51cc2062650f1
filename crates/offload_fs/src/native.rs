// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Thin wrappers over platform file APIs whose failures are translated at the
//! call site.

use std::fs::{self, File, Metadata};
use std::io;
use std::path::Path;

use tracing::{Level, event};

use crate::error::{Error, NativeResultExt as _, Result, classify, translate};
use crate::permissions::PermissionSet;
use crate::props::FileSystemSpaceInfo;

/// Copies the contents of `source` to a new file at `target`.
///
/// Fails with [`Error::AlreadyExists`] if `target` exists. On unix the new
/// file is created with the permission bits of `source`, subject to the
/// process umask.
pub(crate) fn copy_file(source: &Path, target: &Path, source_metadata: &Metadata) -> Result<()> {
    let mut reader = File::open(source).at(source)?;

    let mut options = fs::OpenOptions::new();
    let _ = options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt as _, PermissionsExt as _};
        let _ = options.mode(source_metadata.permissions().mode());
    }
    #[cfg(not(unix))]
    let _ = source_metadata;

    let mut writer = options.open(target).at(target)?;
    let _ = io::copy(&mut reader, &mut writer).at(target)?;
    Ok(())
}

/// Creates a directory, treating an existing directory at `path` as success.
///
/// An existing entry that is not a directory is still an
/// [`Error::AlreadyExists`] failure.
pub(crate) fn create_dir_tolerant(path: &Path) -> Result<()> {
    match fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(err) => Err(translate(err, path)),
    }
}

/// Creates a directory with optional permissions, optionally creating all
/// missing parents.
pub(crate) fn create_dir(path: &Path, perms: Option<PermissionSet>, create_parents: bool) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    let _ = builder.recursive(create_parents);
    #[cfg(unix)]
    if let Some(perms) = perms {
        use std::os::unix::fs::DirBuilderExt as _;
        let _ = builder.mode(perms.mode());
    }
    #[cfg(not(unix))]
    ignore_permissions(perms);

    builder.create(path).at(path)
}

/// Creates a new, empty file. Fails if anything already exists at `path`.
pub(crate) fn create_file(path: &Path, perms: Option<PermissionSet>) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    let _ = options.write(true).create_new(true);
    #[cfg(unix)]
    if let Some(perms) = perms {
        use std::os::unix::fs::OpenOptionsExt as _;
        let _ = options.mode(perms.mode());
    }
    #[cfg(not(unix))]
    ignore_permissions(perms);

    let _ = options.open(path).at(path)?;
    Ok(())
}

/// Applies a permission set to `path`, following symbolic links.
pub(crate) fn set_permissions(path: &Path, perms: PermissionSet) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        fs::set_permissions(path, fs::Permissions::from_mode(perms.mode())).at(path)
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        ignore_permissions(Some(perms));
        Ok(())
    }
}

/// Removes a file, a symbolic link, or an empty directory.
pub(crate) fn delete_entry(path: &Path) -> Result<()> {
    let metadata = fs::symlink_metadata(path).at(path)?;
    if metadata.is_dir() {
        fs::remove_dir(path).at(path)
    } else {
        fs::remove_file(path).at(path)
    }
}

/// Fails with [`Error::AlreadyExists`] if anything, including a dangling
/// symbolic link, exists at `path`.
pub(crate) fn ensure_absent(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(_) => Err(Error::already_exists(path)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(translate(err, path)),
    }
}

/// Moves `from` to `to`, which must not exist.
///
/// A rename is tried first. When the platform cannot rename across volumes,
/// files and symbolic links are copied and the source removed, and an empty
/// directory is recreated at the target. A non-empty directory on another
/// volume fails with [`Error::Io`].
pub(crate) fn move_entry(from: &Path, to: &Path) -> Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => move_by_copy(from, to, err),
        Err(err) => Err(translate(err, from)),
    }
}

fn move_by_copy(from: &Path, to: &Path, rename_err: io::Error) -> Result<()> {
    let metadata = fs::symlink_metadata(from).at(from)?;
    event!(Level::DEBUG, from = %from.display(), to = %to.display(), "rename crosses volumes; copying");

    if metadata.is_dir() {
        if fs::read_dir(from).at(from)?.next().is_some() {
            return Err(Error::io(from, rename_err));
        }
        fs::create_dir(to).at(to)?;
        copy_dir_permissions(to, &metadata)?;
        return remove_or_roll_back(from, to, fs::remove_dir(from));
    }

    if metadata.file_type().is_symlink() {
        let target = fs::read_link(from).at(from)?;
        create_symlink_like(&target, to).at(to)?;
    } else {
        copy_file(from, to, &metadata)?;
        let times = fs::FileTimes::new()
            .set_accessed(metadata.accessed().at(from)?)
            .set_modified(metadata.modified().at(from)?);
        fs::OpenOptions::new()
            .write(true)
            .open(to)
            .and_then(|file| file.set_times(times))
            .at(to)?;
    }
    remove_or_roll_back(from, to, fs::remove_file(from))
}

/// Undoes the copy half of a move when the source could not be removed, so
/// that a failed move never leaves both entries behind.
fn remove_or_roll_back(from: &Path, to: &Path, removed: io::Result<()>) -> Result<()> {
    removed.map_err(|err| {
        if let Err(cleanup) = delete_entry(to) {
            event!(Level::WARN, path = %to.display(), error = %cleanup, "failed to remove partial move target");
        }
        translate(err, from)
    })
}

#[cfg(unix)]
fn copy_dir_permissions(to: &Path, source_metadata: &Metadata) -> Result<()> {
    fs::set_permissions(to, source_metadata.permissions()).at(to)
}

#[cfg(not(unix))]
fn copy_dir_permissions(_to: &Path, _source_metadata: &Metadata) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn create_symlink_like(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink_like(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

/// Changes the owning user and/or group of `path`, following symbolic links.
///
/// Names are looked up when this is called; an unknown name fails with
/// [`Error::NotFound`].
#[cfg(unix)]
pub(crate) fn chown(path: &Path, user: Option<&str>, group: Option<&str>) -> Result<()> {
    use nix::unistd::{Group, User};

    let gid = group
        .map(|name| match Group::from_name(name) {
            Ok(Some(group)) => Ok(group.gid.as_raw()),
            Ok(None) => Err(Error::NotFound(format!("group {name}"))),
            Err(errno) => Err(classify(errno.into(), format!("group {name}"))),
        })
        .transpose()?;
    let uid = user
        .map(|name| match User::from_name(name) {
            Ok(Some(user)) => Ok(user.uid.as_raw()),
            Ok(None) => Err(Error::NotFound(format!("user {name}"))),
            Err(errno) => Err(classify(errno.into(), format!("user {name}"))),
        })
        .transpose()?;

    std::os::unix::fs::chown(path, uid, gid).at(path)
}

#[cfg(not(unix))]
pub(crate) fn chown(path: &Path, _user: Option<&str>, _group: Option<&str>) -> Result<()> {
    Err(Error::unsupported(format!(
        "changing ownership of {} is not supported on this platform",
        path.display()
    )))
}

/// Queries space accounting for the volume containing `path`.
#[cfg(unix)]
pub(crate) fn space_info(path: &Path) -> Result<FileSystemSpaceInfo> {
    let stat = nix::sys::statvfs::statvfs(path).map_err(|errno| translate(errno.into(), path))?;
    let fragment = widen(stat.fragment_size());
    Ok(FileSystemSpaceInfo::new(
        widen(stat.blocks()).saturating_mul(fragment),
        widen(stat.blocks_free()).saturating_mul(fragment),
        widen(stat.blocks_available()).saturating_mul(fragment),
    ))
}

/// `statvfs` fields are 32 or 64 bits wide depending on the platform.
#[cfg(unix)]
fn widen(value: impl Into<u64>) -> u64 {
    value.into()
}

#[cfg(not(unix))]
pub(crate) fn space_info(path: &Path) -> Result<FileSystemSpaceInfo> {
    Err(Error::unsupported(format!(
        "volume space of {} cannot be queried on this platform",
        path.display()
    )))
}

#[cfg(not(unix))]
fn ignore_permissions(perms: Option<PermissionSet>) {
    if let Some(perms) = perms {
        event!(
            Level::DEBUG,
            perms = %perms,
            "POSIX permissions are not supported on this platform; ignoring"
        );
    }
}
