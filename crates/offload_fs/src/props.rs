// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fs::Metadata;
use std::time::SystemTime;

/// The kind of filesystem entry a [`FileProperties`] snapshot describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// A regular file.
    Regular,
    /// A directory.
    Directory,
    /// A symbolic link. Only reported when the final link was not followed.
    Symlink,
    /// Anything else: sockets, FIFOs, device nodes.
    Other,
}

/// A snapshot of the properties of a filesystem entry.
///
/// The snapshot is taken when the entry is queried and is not kept in sync
/// with the filesystem afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileProperties {
    size: u64,
    created: Option<SystemTime>,
    modified: SystemTime,
    accessed: SystemTime,
    kind: FileKind,
}

impl FileProperties {
    pub(crate) fn from_metadata(metadata: &Metadata) -> std::io::Result<Self> {
        let file_type = metadata.file_type();
        let kind = if file_type.is_symlink() {
            FileKind::Symlink
        } else if file_type.is_dir() {
            FileKind::Directory
        } else if file_type.is_file() {
            FileKind::Regular
        } else {
            FileKind::Other
        };

        Ok(Self {
            size: metadata.len(),
            // Not every platform or filesystem records a birth time.
            created: metadata.created().ok(),
            modified: metadata.modified()?,
            accessed: metadata.accessed()?,
            kind,
        })
    }

    /// The size of the entry in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// The creation time, if the filesystem records one.
    #[must_use]
    pub const fn created(&self) -> Option<SystemTime> {
        self.created
    }

    /// The last modification time.
    #[must_use]
    pub const fn modified(&self) -> SystemTime {
        self.modified
    }

    /// The last access time.
    #[must_use]
    pub const fn accessed(&self) -> SystemTime {
        self.accessed
    }

    /// The kind of entry.
    #[must_use]
    pub const fn kind(&self) -> FileKind {
        self.kind
    }

    /// Returns `true` if the entry is a regular file.
    #[must_use]
    pub fn is_regular_file(&self) -> bool {
        self.kind == FileKind::Regular
    }

    /// Returns `true` if the entry is a directory.
    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// Returns `true` if the entry is a symbolic link.
    #[must_use]
    pub fn is_symbolic_link(&self) -> bool {
        self.kind == FileKind::Symlink
    }

    /// Returns `true` if the entry is neither a regular file, a directory,
    /// nor a symbolic link.
    #[must_use]
    pub fn is_other(&self) -> bool {
        self.kind == FileKind::Other
    }
}

/// A snapshot of the space accounting of the volume containing a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileSystemSpaceInfo {
    total: u64,
    unallocated: u64,
    usable: u64,
}

impl FileSystemSpaceInfo {
    pub(crate) const fn new(total: u64, unallocated: u64, usable: u64) -> Self {
        Self {
            total,
            unallocated,
            usable,
        }
    }

    /// The size of the volume in bytes.
    #[must_use]
    pub const fn total_space(&self) -> u64 {
        self.total
    }

    /// The number of unallocated bytes on the volume.
    #[must_use]
    pub const fn unallocated_space(&self) -> u64 {
        self.unallocated
    }

    /// The number of bytes available to this process. This can be less than
    /// [`unallocated_space`](Self::unallocated_space) when the volume reserves
    /// blocks for privileged users.
    #[must_use]
    pub const fn usable_space(&self) -> u64 {
        self.usable
    }
}
