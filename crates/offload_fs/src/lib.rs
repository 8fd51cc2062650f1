// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Filesystem operations for single-threaded execution units.
//!
//! Code that lives on an event loop must never block it, yet filesystem calls
//! block. This crate provides a catalog of filesystem operations, each of which
//! can be run two ways:
//!
//! * **Blocking.** `*_blocking` methods run the operation on the calling thread
//!   and return its result. Use them from worker threads or at startup.
//! * **Non-blocking.** The other methods submit the operation to a
//!   [`WorkerPool`] and return immediately. When the operation completes, its
//!   result is handed to a callback that runs on the [`ExecutionUnit`] the
//!   [`FileSystem`] was bound to, so callback code never needs to synchronize
//!   with the loop it belongs to.
//!
//! Both forms of an operation share one definition, so they behave the same in
//! every respect other than where they run.
//!
//! # Quick start
//!
//! ```no_run
//! use offload_fs::{EventLoop, FileSystem, OpenOptions};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let event_loop = EventLoop::spawn("app")?;
//! let fs = FileSystem::new(event_loop.clone())?;
//!
//! // Blocking forms return their result directly.
//! fs.mkdirs_blocking("/var/data/app", Some("rwxr-x---"))?;
//! fs.write_file_blocking("/var/data/app/config.toml", "answer = 42")?;
//!
//! // Non-blocking forms deliver the result on `event_loop`.
//! fs.read_file("/var/data/app/config.toml", |result| match result {
//!     Ok(bytes) => println!("read {} bytes", bytes.len()),
//!     Err(e) => eprintln!("read failed: {e}"),
//! })
//! .read_dir("/var/data/app", Some(r".*\.toml"), |result| {
//!     for path in result.unwrap_or_default() {
//!         println!("{}", path.display());
//!     }
//! });
//!
//! let file = fs.open_blocking("/var/data/app/log.txt", OpenOptions::new())?;
//! # drop(file);
//! # Ok(())
//! # }
//! ```
//!
//! # Errors
//!
//! Every failure is reported as an [`Error`], whose variant classifies it:
//! missing targets are [`Error::NotFound`], collisions are
//! [`Error::AlreadyExists`], privilege failures are [`Error::AccessDenied`],
//! and arguments rejected before any filesystem access (such as malformed
//! permission strings) are [`Error::InvalidArgument`]. Anything else is
//! [`Error::Io`], which keeps the native error as its source.
//!
//! Failures are never silently dropped. Blocking forms return them and
//! non-blocking forms pass them to the callback. The one exception is
//! [`FileSystem::exists`], which reports `false` instead of failing.
//!
//! # Permissions
//!
//! Permissions are written as nine characters in `rwxrwxrwx` form, owner then
//! group then others, with `-` for an absent right. See [`PermissionSet`].
//! On platforms without POSIX permissions they are validated and then ignored.
//!
//! # Paths
//!
//! Every path passes through a [`PathResolver`] before use. The default,
//! [`Identity`], uses paths as given; [`Sandboxed`] confines them to a base
//! directory.
//!
//! # Threads
//!
//! [`WorkerPool`] starts one worker and grows to
//! [`WorkerPoolConfig::max_threads`] while work is queued. Workers idle for
//! longer than [`WorkerPoolConfig::idle_timeout`] exit, down to a single
//! worker. [`FileSystem::new`] uses a process-wide pool; pass your own to
//! [`FileSystem::with_pool`] to size it differently.
//!
//! Operations are not serialized per path. Two operations submitted on the
//! same path may run concurrently on different workers, and their callbacks
//! are delivered in completion order rather than submission order.

pub use crate::dispatcher::{WorkerPool, WorkerPoolConfig};
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::file_system::FileSystem;
pub use crate::open_options::OpenOptions;
pub use crate::operation::Operation;
pub use crate::permissions::PermissionSet;
pub use crate::props::{FileKind, FileProperties, FileSystemSpaceInfo};
pub use crate::resolve::{Identity, PathResolver, Sandboxed};
pub use crate::unit::{EnterGuard, EventLoop, ExecutionUnit, Task, UnitId};

mod dispatcher;
mod error;
mod file_system;
mod native;
mod open_options;
mod operation;
mod permissions;
mod props;
mod resolve;
mod unit;
mod walk;
