// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use regex::Regex;

use crate::dispatcher::WorkerPool;
use crate::error::{Error, NativeResultExt as _, Result};
use crate::native;
use crate::open_options::OpenOptions;
use crate::operation::Operation;
use crate::permissions::PermissionSet;
use crate::props::{FileProperties, FileSystemSpaceInfo};
use crate::resolve::{Identity, PathResolver};
use crate::unit::{ExecutionUnit, UnitId};
use crate::walk;

/// The catalog of filesystem operations, each available in a blocking and a
/// non-blocking form.
///
/// * The `*_blocking` methods run the operation on the calling thread and
///   return its result.
/// * The other methods submit the operation to the [`WorkerPool`] and return
///   `&Self` immediately for chaining. The result is passed to the completion
///   callback on the [`ExecutionUnit`] this `FileSystem` is bound to.
///
/// Both forms share one definition per operation, so they have identical
/// semantics apart from where they run. Paths pass through the configured
/// [`PathResolver`], and permission strings and filters are validated, when
/// the call is made; failures there are reported through the same result path
/// as any other failure.
///
/// Operations on the same path are not serialized against each other.
///
/// ```no_run
/// use offload_fs::{EventLoop, FileSystem};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let event_loop = EventLoop::spawn("app")?;
/// let fs = FileSystem::new(event_loop.clone())?;
///
/// fs.mkdirs_blocking("/tmp/app/cache", None)?;
/// fs.write_file("/tmp/app/cache/entry.bin", &b"payload"[..], |result| {
///     // Runs on `event_loop`.
///     if let Err(e) = result {
///         eprintln!("write failed: {e}");
///     }
/// });
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct FileSystem {
    pool: WorkerPool,
    unit: Arc<dyn ExecutionUnit>,
    resolver: Arc<dyn PathResolver>,
}

impl FileSystem {
    /// Creates a facade bound to `unit` that uses the process-wide
    /// [`WorkerPool::shared`] pool and uses paths verbatim.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared pool has to be created and its first
    /// worker thread cannot be spawned.
    pub fn new(unit: impl ExecutionUnit + 'static) -> io::Result<Self> {
        Ok(Self::with_pool(WorkerPool::shared()?, unit))
    }

    /// Creates a facade bound to `unit` that submits work to `pool`.
    #[must_use]
    pub fn with_pool(pool: WorkerPool, unit: impl ExecutionUnit + 'static) -> Self {
        Self {
            pool,
            unit: Arc::new(unit),
            resolver: Arc::new(Identity),
        }
    }

    /// Replaces the path resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: impl PathResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Returns a facade sharing this one's pool and resolver whose callbacks
    /// are delivered to `unit` instead.
    #[must_use]
    pub fn with_unit(&self, unit: impl ExecutionUnit + 'static) -> Self {
        Self {
            pool: self.pool.clone(),
            unit: Arc::new(unit),
            resolver: Arc::clone(&self.resolver),
        }
    }

    /// The execution unit completion callbacks are delivered to.
    #[must_use]
    pub fn unit(&self) -> UnitId {
        self.unit.id()
    }

    /// The pool non-blocking operations are submitted to.
    #[must_use]
    pub const fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Wraps arbitrary blocking work in an [`Operation`] bound to this
    /// facade's pool and execution unit.
    pub fn operation<T: Send + 'static>(
        &self,
        name: &'static str,
        work: impl FnOnce() -> Result<T> + Send + 'static,
    ) -> Operation<T> {
        Operation::new(name, self.pool.clone(), Arc::clone(&self.unit), work)
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        self.resolver.resolve(path)
    }

    fn resolve_pair(&self, a: &Path, b: &Path) -> Result<(PathBuf, PathBuf)> {
        Ok((self.resolve(a)?, self.resolve(b)?))
    }

    // ---------------------------------------------------------------------
    // copy / move
    // ---------------------------------------------------------------------

    fn copy_op(&self, from: &Path, to: &Path, recursive: bool) -> Operation<()> {
        let paths = self.resolve_pair(from, to);
        self.operation("copy", move || {
            let (from, to) = paths?;
            if recursive {
                walk::copy_tree(&from, &to)
            } else {
                let metadata = fs::metadata(&from).at(&from)?;
                if metadata.is_dir() {
                    fs::create_dir(&to).at(&to)
                } else {
                    native::copy_file(&from, &to, &metadata)
                }
            }
        })
    }

    /// Copies a file from `from` to `to`.
    ///
    /// Fails with [`Error::AlreadyExists`] if `to` exists. Copying a
    /// directory creates an empty directory at `to`; use
    /// [`copy_recursive`](Self::copy_recursive) to copy its contents.
    pub fn copy<F>(&self, from: impl AsRef<Path>, to: impl AsRef<Path>, on_complete: F) -> &Self
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.copy_op(from.as_ref(), to.as_ref(), false).run_async(on_complete);
        self
    }

    /// Blocking form of [`copy`](Self::copy).
    ///
    /// # Errors
    ///
    /// See [`copy`](Self::copy).
    pub fn copy_blocking(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<()> {
        self.copy_op(from.as_ref(), to.as_ref(), false).run_blocking()
    }

    /// Copies `from` to `to`, descending into directories if `recursive` is
    /// set.
    ///
    /// A recursive copy creates each directory before copying its contents,
    /// reuses directories that already exist at the target, and fails with
    /// [`Error::AlreadyExists`] on the first file whose target exists.
    /// Symbolic links in the source are followed. Whatever was copied before a
    /// failure is left in place.
    pub fn copy_recursive<F>(&self, from: impl AsRef<Path>, to: impl AsRef<Path>, recursive: bool, on_complete: F) -> &Self
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.copy_op(from.as_ref(), to.as_ref(), recursive).run_async(on_complete);
        self
    }

    /// Blocking form of [`copy_recursive`](Self::copy_recursive).
    ///
    /// # Errors
    ///
    /// See [`copy_recursive`](Self::copy_recursive).
    pub fn copy_recursive_blocking(&self, from: impl AsRef<Path>, to: impl AsRef<Path>, recursive: bool) -> Result<()> {
        self.copy_op(from.as_ref(), to.as_ref(), recursive).run_blocking()
    }

    fn move_op(&self, from: &Path, to: &Path) -> Operation<()> {
        let paths = self.resolve_pair(from, to);
        self.operation("move", move || {
            let (from, to) = paths?;
            native::ensure_absent(&to)?;
            native::move_entry(&from, &to)
        })
    }

    /// Moves a file or directory from `from` to `to`.
    ///
    /// Fails with [`Error::AlreadyExists`] if `to` exists. Across volumes,
    /// files and symbolic links are copied and then removed, and empty
    /// directories are recreated; moving a non-empty directory to another
    /// volume fails with [`Error::Io`].
    pub fn move_path<F>(&self, from: impl AsRef<Path>, to: impl AsRef<Path>, on_complete: F) -> &Self
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.move_op(from.as_ref(), to.as_ref()).run_async(on_complete);
        self
    }

    /// Blocking form of [`move_path`](Self::move_path).
    ///
    /// # Errors
    ///
    /// See [`move_path`](Self::move_path).
    pub fn move_path_blocking(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<()> {
        self.move_op(from.as_ref(), to.as_ref()).run_blocking()
    }

    // ---------------------------------------------------------------------
    // truncate
    // ---------------------------------------------------------------------

    fn truncate_op(&self, path: &Path, len: i64) -> Operation<()> {
        let prepared = u64::try_from(len)
            .map_err(|_| Error::invalid_argument(format!("cannot truncate to negative length {len}")))
            .and_then(|len| Ok((self.resolve(path)?, len)));
        self.operation("truncate", move || {
            let (path, len) = prepared?;
            // Check first so that a missing file is never created.
            let _ = fs::metadata(&path).at(&path)?;
            fs::OpenOptions::new()
                .write(true)
                .open(&path)
                .and_then(|file| file.set_len(len))
                .at(&path)
        })
    }

    /// Truncates or extends the file at `path` to `len` bytes.
    ///
    /// Fails with [`Error::InvalidArgument`] if `len` is negative, without
    /// touching the filesystem, and with [`Error::NotFound`] if the file does
    /// not exist.
    pub fn truncate<F>(&self, path: impl AsRef<Path>, len: i64, on_complete: F) -> &Self
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.truncate_op(path.as_ref(), len).run_async(on_complete);
        self
    }

    /// Blocking form of [`truncate`](Self::truncate).
    ///
    /// # Errors
    ///
    /// See [`truncate`](Self::truncate).
    pub fn truncate_blocking(&self, path: impl AsRef<Path>, len: i64) -> Result<()> {
        self.truncate_op(path.as_ref(), len).run_blocking()
    }

    // ---------------------------------------------------------------------
    // permissions and ownership
    // ---------------------------------------------------------------------

    fn chmod_op(&self, path: &Path, perms: &str, dir_perms: Option<&str>, recursive: bool) -> Operation<()> {
        let prepared = self.resolve(path).and_then(|path| {
            let perms: PermissionSet = perms.parse()?;
            let dir_perms = PermissionSet::parse_optional(dir_perms)?;
            Ok((path, perms, dir_perms))
        });
        self.operation("chmod", move || {
            let (path, perms, dir_perms) = prepared?;
            if recursive {
                walk::chmod_tree(&path, perms, dir_perms.unwrap_or(perms))
            } else {
                native::set_permissions(&path, perms)
            }
        })
    }

    /// Sets the permissions of `path`, given in `rwxrwxrwx` notation.
    ///
    /// Symbolic links are followed. On platforms without POSIX permissions the
    /// string is validated and otherwise ignored.
    pub fn chmod<F>(&self, path: impl AsRef<Path>, perms: &str, on_complete: F) -> &Self
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.chmod_op(path.as_ref(), perms, None, false).run_async(on_complete);
        self
    }

    /// Blocking form of [`chmod`](Self::chmod).
    ///
    /// # Errors
    ///
    /// See [`chmod`](Self::chmod).
    pub fn chmod_blocking(&self, path: impl AsRef<Path>, perms: &str) -> Result<()> {
        self.chmod_op(path.as_ref(), perms, None, false).run_blocking()
    }

    /// Sets permissions on the whole tree at `path`, parents before children.
    ///
    /// Files receive `perms`. Directories receive `dir_perms` if given and
    /// `perms` otherwise; a separate set exists because the execute bit means
    /// "may traverse" on a directory but "may run" on a file. Symbolic links
    /// inside the tree are left alone.
    pub fn chmod_recursive<F>(&self, path: impl AsRef<Path>, perms: &str, dir_perms: Option<&str>, on_complete: F) -> &Self
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.chmod_op(path.as_ref(), perms, dir_perms, true).run_async(on_complete);
        self
    }

    /// Blocking form of [`chmod_recursive`](Self::chmod_recursive).
    ///
    /// # Errors
    ///
    /// See [`chmod_recursive`](Self::chmod_recursive).
    pub fn chmod_recursive_blocking(&self, path: impl AsRef<Path>, perms: &str, dir_perms: Option<&str>) -> Result<()> {
        self.chmod_op(path.as_ref(), perms, dir_perms, true).run_blocking()
    }

    fn chown_op(&self, path: &Path, user: Option<&str>, group: Option<&str>) -> Operation<()> {
        let path = self.resolve(path);
        let user = user.map(str::to_owned);
        let group = group.map(str::to_owned);
        self.operation("chown", move || native::chown(&path?, user.as_deref(), group.as_deref()))
    }

    /// Changes the owning user and/or group of `path`. `None` leaves that
    /// owner unchanged.
    ///
    /// Names are looked up when the operation runs; an unknown name fails
    /// with [`Error::NotFound`]. Fails with [`Error::Unsupported`] on
    /// platforms without POSIX ownership.
    pub fn chown<F>(&self, path: impl AsRef<Path>, user: Option<&str>, group: Option<&str>, on_complete: F) -> &Self
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.chown_op(path.as_ref(), user, group).run_async(on_complete);
        self
    }

    /// Blocking form of [`chown`](Self::chown).
    ///
    /// # Errors
    ///
    /// See [`chown`](Self::chown).
    pub fn chown_blocking(&self, path: impl AsRef<Path>, user: Option<&str>, group: Option<&str>) -> Result<()> {
        self.chown_op(path.as_ref(), user, group).run_blocking()
    }

    // ---------------------------------------------------------------------
    // properties
    // ---------------------------------------------------------------------

    fn props_op(&self, path: &Path, follow_links: bool) -> Operation<FileProperties> {
        let path = self.resolve(path);
        self.operation("props", move || {
            let path = path?;
            let metadata = if follow_links {
                fs::metadata(&path)
            } else {
                fs::symlink_metadata(&path)
            };
            metadata.and_then(|m| FileProperties::from_metadata(&m)).at(&path)
        })
    }

    /// Reads the properties of `path`, following symbolic links.
    pub fn props<F>(&self, path: impl AsRef<Path>, on_complete: F) -> &Self
    where
        F: FnOnce(Result<FileProperties>) + Send + 'static,
    {
        self.props_op(path.as_ref(), true).run_async(on_complete);
        self
    }

    /// Blocking form of [`props`](Self::props).
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotFound`] if `path` does not exist.
    pub fn props_blocking(&self, path: impl AsRef<Path>) -> Result<FileProperties> {
        self.props_op(path.as_ref(), true).run_blocking()
    }

    /// Reads the properties of `path` without following a final symbolic
    /// link, so a link reports itself.
    pub fn lprops<F>(&self, path: impl AsRef<Path>, on_complete: F) -> &Self
    where
        F: FnOnce(Result<FileProperties>) + Send + 'static,
    {
        self.props_op(path.as_ref(), false).run_async(on_complete);
        self
    }

    /// Blocking form of [`lprops`](Self::lprops).
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotFound`] if `path` does not exist.
    pub fn lprops_blocking(&self, path: impl AsRef<Path>) -> Result<FileProperties> {
        self.props_op(path.as_ref(), false).run_blocking()
    }

    // ---------------------------------------------------------------------
    // links
    // ---------------------------------------------------------------------

    fn link_op(&self, link: &Path, existing: &Path, symbolic: bool) -> Operation<()> {
        let paths = self.resolve_pair(link, existing);
        self.operation("link", move || {
            let (link, existing) = paths?;
            if symbolic {
                create_symlink(&existing, &link).at(&link)
            } else {
                fs::hard_link(&existing, &link).at(&link)
            }
        })
    }

    /// Creates a hard link at `link` to the file at `existing`.
    pub fn link<F>(&self, link: impl AsRef<Path>, existing: impl AsRef<Path>, on_complete: F) -> &Self
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.link_op(link.as_ref(), existing.as_ref(), false).run_async(on_complete);
        self
    }

    /// Blocking form of [`link`](Self::link).
    ///
    /// # Errors
    ///
    /// Fails with [`Error::AlreadyExists`] if `link` exists and with
    /// [`Error::NotFound`] if `existing` does not.
    pub fn link_blocking(&self, link: impl AsRef<Path>, existing: impl AsRef<Path>) -> Result<()> {
        self.link_op(link.as_ref(), existing.as_ref(), false).run_blocking()
    }

    /// Creates a symbolic link at `link` pointing to `existing`.
    ///
    /// The target does not need to exist.
    pub fn symlink<F>(&self, link: impl AsRef<Path>, existing: impl AsRef<Path>, on_complete: F) -> &Self
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.link_op(link.as_ref(), existing.as_ref(), true).run_async(on_complete);
        self
    }

    /// Blocking form of [`symlink`](Self::symlink).
    ///
    /// # Errors
    ///
    /// Fails with [`Error::AlreadyExists`] if `link` exists.
    pub fn symlink_blocking(&self, link: impl AsRef<Path>, existing: impl AsRef<Path>) -> Result<()> {
        self.link_op(link.as_ref(), existing.as_ref(), true).run_blocking()
    }

    /// Removes the link at `link`. Equivalent to a non-recursive
    /// [`delete`](Self::delete).
    pub fn unlink<F>(&self, link: impl AsRef<Path>, on_complete: F) -> &Self
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.delete_op(link.as_ref(), false).run_async(on_complete);
        self
    }

    /// Blocking form of [`unlink`](Self::unlink).
    ///
    /// # Errors
    ///
    /// See [`delete`](Self::delete).
    pub fn unlink_blocking(&self, link: impl AsRef<Path>) -> Result<()> {
        self.delete_op(link.as_ref(), false).run_blocking()
    }

    fn read_symlink_op(&self, link: &Path) -> Operation<String> {
        let link = self.resolve(link);
        self.operation("read_symlink", move || {
            let link = link?;
            let target = fs::read_link(&link).at(&link)?;
            Ok(target.to_string_lossy().into_owned())
        })
    }

    /// Reads the target stored in the symbolic link at `link`, without
    /// resolving it.
    pub fn read_symlink<F>(&self, link: impl AsRef<Path>, on_complete: F) -> &Self
    where
        F: FnOnce(Result<String>) + Send + 'static,
    {
        self.read_symlink_op(link.as_ref()).run_async(on_complete);
        self
    }

    /// Blocking form of [`read_symlink`](Self::read_symlink).
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotFound`] if `link` does not exist and with
    /// [`Error::Io`] if it is not a symbolic link.
    pub fn read_symlink_blocking(&self, link: impl AsRef<Path>) -> Result<String> {
        self.read_symlink_op(link.as_ref()).run_blocking()
    }

    // ---------------------------------------------------------------------
    // delete
    // ---------------------------------------------------------------------

    fn delete_op(&self, path: &Path, recursive: bool) -> Operation<()> {
        let path = self.resolve(path);
        self.operation("delete", move || {
            let path = path?;
            if recursive {
                walk::delete_tree(&path)
            } else {
                native::delete_entry(&path)
            }
        })
    }

    /// Deletes the file, symbolic link, or empty directory at `path`.
    pub fn delete<F>(&self, path: impl AsRef<Path>, on_complete: F) -> &Self
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.delete_op(path.as_ref(), false).run_async(on_complete);
        self
    }

    /// Blocking form of [`delete`](Self::delete).
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotFound`] if `path` does not exist and with
    /// [`Error::Io`] if it is a non-empty directory.
    pub fn delete_blocking(&self, path: impl AsRef<Path>) -> Result<()> {
        self.delete_op(path.as_ref(), false).run_blocking()
    }

    /// Deletes `path`, and with `recursive` set everything beneath it,
    /// children before their parent directory.
    ///
    /// Symbolic links are removed rather than followed. The first failure
    /// stops the deletion; whatever was deleted before it stays deleted.
    pub fn delete_recursive<F>(&self, path: impl AsRef<Path>, recursive: bool, on_complete: F) -> &Self
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.delete_op(path.as_ref(), recursive).run_async(on_complete);
        self
    }

    /// Blocking form of [`delete_recursive`](Self::delete_recursive).
    ///
    /// # Errors
    ///
    /// See [`delete_recursive`](Self::delete_recursive).
    pub fn delete_recursive_blocking(&self, path: impl AsRef<Path>, recursive: bool) -> Result<()> {
        self.delete_op(path.as_ref(), recursive).run_blocking()
    }

    // ---------------------------------------------------------------------
    // directories
    // ---------------------------------------------------------------------

    fn mkdir_op(&self, path: &Path, perms: Option<&str>, create_parents: bool) -> Operation<()> {
        let prepared = self
            .resolve(path)
            .and_then(|path| Ok((path, PermissionSet::parse_optional(perms)?)));
        self.operation("mkdir", move || {
            let (path, perms) = prepared?;
            native::create_dir(&path, perms, create_parents)
        })
    }

    /// Creates the directory `path`, optionally with the given permissions.
    ///
    /// Fails with [`Error::AlreadyExists`] if anything exists at `path` and
    /// with [`Error::NotFound`] if its parent does not exist.
    pub fn mkdir<F>(&self, path: impl AsRef<Path>, perms: Option<&str>, on_complete: F) -> &Self
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.mkdir_op(path.as_ref(), perms, false).run_async(on_complete);
        self
    }

    /// Blocking form of [`mkdir`](Self::mkdir).
    ///
    /// # Errors
    ///
    /// See [`mkdir`](Self::mkdir).
    pub fn mkdir_blocking(&self, path: impl AsRef<Path>, perms: Option<&str>) -> Result<()> {
        self.mkdir_op(path.as_ref(), perms, false).run_blocking()
    }

    /// Creates the directory `path` and any missing parents, applying the
    /// given permissions to every directory created.
    ///
    /// An existing directory at `path` is not an error; an existing file is
    /// [`Error::AlreadyExists`].
    pub fn mkdirs<F>(&self, path: impl AsRef<Path>, perms: Option<&str>, on_complete: F) -> &Self
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.mkdir_op(path.as_ref(), perms, true).run_async(on_complete);
        self
    }

    /// Blocking form of [`mkdirs`](Self::mkdirs).
    ///
    /// # Errors
    ///
    /// See [`mkdirs`](Self::mkdirs).
    pub fn mkdirs_blocking(&self, path: impl AsRef<Path>, perms: Option<&str>) -> Result<()> {
        self.mkdir_op(path.as_ref(), perms, true).run_blocking()
    }

    fn read_dir_op(&self, path: &Path, filter: Option<&str>) -> Operation<Vec<PathBuf>> {
        let prepared = self.resolve(path).and_then(|path| Ok((path, compile_filter(filter)?)));
        self.operation("read_dir", move || {
            let (path, filter) = prepared?;
            if !fs::metadata(&path).at(&path)?.is_dir() {
                return Err(Error::io(
                    &path,
                    io::Error::new(io::ErrorKind::NotADirectory, "not a directory"),
                ));
            }

            let dir = fs::canonicalize(&path).at(&path)?;
            let mut names = Vec::new();
            for entry in fs::read_dir(&dir).at(&dir)? {
                let name = entry.at(&dir)?.file_name();
                if filter.as_ref().is_none_or(|re| re.is_match(&name.to_string_lossy())) {
                    names.push(name);
                }
            }
            names.sort_unstable();

            Ok(names.into_iter().map(|name| dir.join(name)).collect())
        })
    }

    /// Lists the entries of the directory at `path` as absolute paths, sorted
    /// by name.
    ///
    /// If `filter` is given, only entries whose bare file name fully matches
    /// it as a regular expression are returned: `.*\.txt` matches `a.txt`,
    /// but `txt` does not. An invalid expression fails with
    /// [`Error::InvalidArgument`].
    pub fn read_dir<F>(&self, path: impl AsRef<Path>, filter: Option<&str>, on_complete: F) -> &Self
    where
        F: FnOnce(Result<Vec<PathBuf>>) + Send + 'static,
    {
        self.read_dir_op(path.as_ref(), filter).run_async(on_complete);
        self
    }

    /// Blocking form of [`read_dir`](Self::read_dir).
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotFound`] if `path` does not exist and with
    /// [`Error::Io`] if it is not a directory.
    pub fn read_dir_blocking(&self, path: impl AsRef<Path>, filter: Option<&str>) -> Result<Vec<PathBuf>> {
        self.read_dir_op(path.as_ref(), filter).run_blocking()
    }

    // ---------------------------------------------------------------------
    // file contents
    // ---------------------------------------------------------------------

    fn read_file_op(&self, path: &Path) -> Operation<Bytes> {
        let path = self.resolve(path);
        self.operation("read_file", move || {
            let path = path?;
            fs::read(&path).map(Bytes::from).at(&path)
        })
    }

    /// Reads the entire contents of the file at `path`.
    pub fn read_file<F>(&self, path: impl AsRef<Path>, on_complete: F) -> &Self
    where
        F: FnOnce(Result<Bytes>) + Send + 'static,
    {
        self.read_file_op(path.as_ref()).run_async(on_complete);
        self
    }

    /// Blocking form of [`read_file`](Self::read_file).
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotFound`] if `path` does not exist.
    pub fn read_file_blocking(&self, path: impl AsRef<Path>) -> Result<Bytes> {
        self.read_file_op(path.as_ref()).run_blocking()
    }

    fn write_file_op(&self, path: &Path, data: Bytes) -> Operation<()> {
        let path = self.resolve(path);
        self.operation("write_file", move || {
            let path = path?;
            fs::write(&path, &data).at(&path)
        })
    }

    /// Replaces the contents of the file at `path` with `data`, creating the
    /// file if needed.
    pub fn write_file<F>(&self, path: impl AsRef<Path>, data: impl Into<Bytes>, on_complete: F) -> &Self
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.write_file_op(path.as_ref(), data.into()).run_async(on_complete);
        self
    }

    /// Blocking form of [`write_file`](Self::write_file).
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotFound`] if the parent directory does not exist.
    pub fn write_file_blocking(&self, path: impl AsRef<Path>, data: impl Into<Bytes>) -> Result<()> {
        self.write_file_op(path.as_ref(), data.into()).run_blocking()
    }

    fn open_op(&self, path: &Path, options: OpenOptions) -> Operation<File> {
        let path = self.resolve(path);
        self.operation("open", move || options.open(&path?))
    }

    /// Opens the file at `path` with `options`.
    pub fn open<F>(&self, path: impl AsRef<Path>, options: OpenOptions, on_complete: F) -> &Self
    where
        F: FnOnce(Result<File>) + Send + 'static,
    {
        self.open_op(path.as_ref(), options).run_async(on_complete);
        self
    }

    /// Blocking form of [`open`](Self::open).
    ///
    /// # Errors
    ///
    /// Depends on `options`; see [`OpenOptions`].
    pub fn open_blocking(&self, path: impl AsRef<Path>, options: OpenOptions) -> Result<File> {
        self.open_op(path.as_ref(), options).run_blocking()
    }

    fn create_file_op(&self, path: &Path, perms: Option<&str>) -> Operation<()> {
        let prepared = self
            .resolve(path)
            .and_then(|path| Ok((path, PermissionSet::parse_optional(perms)?)));
        self.operation("create_file", move || {
            let (path, perms) = prepared?;
            native::create_file(&path, perms)
        })
    }

    /// Creates a new, empty file at `path`, optionally with the given
    /// permissions.
    ///
    /// Fails with [`Error::AlreadyExists`] if anything exists at `path`.
    pub fn create_file<F>(&self, path: impl AsRef<Path>, perms: Option<&str>, on_complete: F) -> &Self
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.create_file_op(path.as_ref(), perms).run_async(on_complete);
        self
    }

    /// Blocking form of [`create_file`](Self::create_file).
    ///
    /// # Errors
    ///
    /// See [`create_file`](Self::create_file).
    pub fn create_file_blocking(&self, path: impl AsRef<Path>, perms: Option<&str>) -> Result<()> {
        self.create_file_op(path.as_ref(), perms).run_blocking()
    }

    // ---------------------------------------------------------------------
    // queries
    // ---------------------------------------------------------------------

    fn exists_op(&self, path: &Path) -> Operation<bool> {
        let path = self.resolve(path);
        self.operation("exists", move || {
            Ok(path.is_ok_and(|path| path.try_exists().unwrap_or(false)))
        })
    }

    /// Checks whether anything exists at `path`, following symbolic links.
    ///
    /// Never fails: a dangling link, an unreadable ancestor, or a path the
    /// resolver rejects all report `false`. The callback only receives an
    /// error if the check itself panicked.
    pub fn exists<F>(&self, path: impl AsRef<Path>, on_complete: F) -> &Self
    where
        F: FnOnce(Result<bool>) + Send + 'static,
    {
        self.exists_op(path.as_ref()).run_async(on_complete);
        self
    }

    /// Blocking form of [`exists`](Self::exists).
    #[must_use]
    pub fn exists_blocking(&self, path: impl AsRef<Path>) -> bool {
        self.exists_op(path.as_ref()).run_blocking().unwrap_or(false)
    }

    fn fs_props_op(&self, path: &Path) -> Operation<FileSystemSpaceInfo> {
        let path = self.resolve(path);
        self.operation("fs_props", move || native::space_info(&path?))
    }

    /// Reads the space accounting of the volume containing `path`.
    pub fn fs_props<F>(&self, path: impl AsRef<Path>, on_complete: F) -> &Self
    where
        F: FnOnce(Result<FileSystemSpaceInfo>) + Send + 'static,
    {
        self.fs_props_op(path.as_ref()).run_async(on_complete);
        self
    }

    /// Blocking form of [`fs_props`](Self::fs_props).
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotFound`] if `path` does not exist and with
    /// [`Error::Unsupported`] on platforms where volume space cannot be
    /// queried.
    pub fn fs_props_blocking(&self, path: impl AsRef<Path>) -> Result<FileSystemSpaceInfo> {
        self.fs_props_op(path.as_ref()).run_blocking()
    }
}

fn compile_filter(filter: Option<&str>) -> Result<Option<Regex>> {
    filter
        .map(|pattern| {
            Regex::new(&format!("^(?:{pattern})$"))
                .map_err(|e| Error::invalid_argument(format!("invalid filter {pattern:?}: {e}")))
        })
        .transpose()
}

fn create_symlink(original: &Path, link: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(original, link)
    }
    #[cfg(windows)]
    {
        // Pick the link flavor from the target; a missing target gets a file link.
        if fs::metadata(original).is_ok_and(|m| m.is_dir()) {
            std::os::windows::fs::symlink_dir(original, link)
        } else {
            std::os::windows::fs::symlink_file(original, link)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn filter_is_anchored() {
        let re = compile_filter(Some(r".*\.txt")).unwrap().unwrap();
        assert!(re.is_match("notes.txt"));
        assert!(!re.is_match("notes.txt.bak"));

        let re = compile_filter(Some("txt")).unwrap().unwrap();
        assert!(!re.is_match("notes.txt"));
        assert!(re.is_match("txt"));
    }

    #[test]
    fn filter_alternation_is_anchored_as_a_whole() {
        let re = compile_filter(Some("a|b")).unwrap().unwrap();
        assert!(re.is_match("a"));
        assert!(re.is_match("b"));
        assert!(!re.is_match("ab"));
    }

    #[test]
    fn invalid_filter_is_invalid_argument() {
        let err = compile_filter(Some("(unclosed")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn no_filter_compiles_to_none() {
        assert!(compile_filter(None).unwrap().is_none());
    }
}
