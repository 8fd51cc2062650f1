// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fs::File;
use std::path::Path;

use crate::error::{NativeResultExt as _, Result};
use crate::permissions::PermissionSet;

/// Options which configure how [`FileSystem::open`](crate::FileSystem::open)
/// opens a file.
///
/// Unlike [`std::fs::OpenOptions`], the defaults open a file for reading and
/// writing and create it if it does not exist.
///
/// ```
/// use offload_fs::OpenOptions;
///
/// let mut options = OpenOptions::new();
/// options.write(false).create(false);
/// # let _ = options;
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[expect(clippy::struct_excessive_bools, reason = "mirrors std::fs::OpenOptions API")]
pub struct OpenOptions {
    read: bool,
    write: bool,
    append: bool,
    truncate: bool,
    create: bool,
    create_new: bool,
    perms: Option<PermissionSet>,
}

impl OpenOptions {
    /// Creates options that read, write, and create the file if missing.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            read: true,
            write: true,
            append: false,
            truncate: false,
            create: true,
            create_new: false,
            perms: None,
        }
    }

    /// Sets the option for read access.
    pub const fn read(&mut self, read: bool) -> &mut Self {
        self.read = read;
        self
    }

    /// Sets the option for write access.
    ///
    /// If the file already exists, writes overwrite its contents in place
    /// without truncating it.
    pub const fn write(&mut self, write: bool) -> &mut Self {
        self.write = write;
        self
    }

    /// Sets the option for append mode: writes go to the end of the file.
    pub const fn append(&mut self, append: bool) -> &mut Self {
        self.append = append;
        self
    }

    /// Sets the option for truncating an existing file to zero length when it
    /// is opened. Requires write access.
    pub const fn truncate(&mut self, truncate: bool) -> &mut Self {
        self.truncate = truncate;
        self
    }

    /// Sets the option to create the file if it does not exist.
    pub const fn create(&mut self, create: bool) -> &mut Self {
        self.create = create;
        self
    }

    /// Sets the option to create a new file, failing with
    /// [`Error::AlreadyExists`](crate::Error::AlreadyExists) if it exists.
    ///
    /// When set, [`create`](Self::create) and [`truncate`](Self::truncate) are
    /// ignored.
    pub const fn create_new(&mut self, create_new: bool) -> &mut Self {
        self.create_new = create_new;
        self
    }

    /// Sets the permissions a newly created file receives, subject to the
    /// process umask. Has no effect on existing files or on platforms without
    /// POSIX permissions.
    pub const fn perms(&mut self, perms: PermissionSet) -> &mut Self {
        self.perms = Some(perms);
        self
    }

    pub(crate) fn open(&self, path: &Path) -> Result<File> {
        let mut options = std::fs::OpenOptions::new();
        let _ = options
            .read(self.read)
            .write(self.write)
            .append(self.append)
            .truncate(self.truncate)
            .create(self.create)
            .create_new(self.create_new);

        #[cfg(unix)]
        if let Some(perms) = self.perms {
            use std::os::unix::fs::OpenOptionsExt as _;
            let _ = options.mode(perms.mode());
        }

        options.open(path).at(path)
    }
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read as _, Write as _};

    use tempfile::TempDir;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn defaults_read_write_create() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("new.txt");

        let mut file = OpenOptions::new().open(&path).unwrap();
        file.write_all(b"hello").unwrap();
        drop(file);

        let mut contents = String::new();
        let _ = OpenOptions::new()
            .write(false)
            .create(false)
            .open(&path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "hello");
    }

    #[test]
    fn create_new_rejects_existing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("exists.txt");
        std::fs::write(&path, b"x").unwrap();

        let err = OpenOptions::new().create_new(true).open(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn missing_file_without_create_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = OpenOptions::new()
            .create(false)
            .open(&tmp.path().join("missing.txt"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn append_writes_at_end() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("log.txt");
        std::fs::write(&path, b"one,").unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"two").unwrap();
        drop(file);

        assert_eq!(std::fs::read(&path).unwrap(), b"one,two");
    }

    #[cfg(unix)]
    #[test]
    fn perms_apply_to_created_file() {
        use std::os::unix::fs::PermissionsExt as _;

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("private.txt");

        let _file = OpenOptions::new()
            .perms("rw-------".parse().unwrap())
            .open(&path)
            .unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
