#![cfg_attr(docsrs, feature(doc_cfg))]

//! # closewake - asynchronous close for blocking I/O
//!
//! Closing a descriptor should unblock every thread currently parked in a
//! blocking call on it. The kernel does not guarantee that on its own, so
//! closewake keeps a registry of which threads are blocked on which
//! descriptor and forces their calls to return early when asked.
//!
//! ## Platform support
//!
//! | Platform | Wake mechanism                                             |
//! |----------|------------------------------------------------------------|
//! | Unix     | Dedicated signal via `tgkill`/`pthread_kill`, no `SA_RESTART` |
//! | Windows  | Per-thread wake channel + APC that closes the socket       |
//!
//! Both mechanisms are available as [`Interruptor`] implementations; the one
//! used by the process-wide registry is [`PlatformInterruptor`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! # #[cfg(unix)]
//! # fn example(fd: std::os::fd::RawFd) -> std::io::Result<()> {
//! closewake::init().expect("closewake already initialized");
//!
//! // Blocking side: surround the call with a guard.
//! let mut buf = [0u8; 64];
//! let res = {
//!   let guard = closewake::guard(fd);
//!   let res = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
//!   if res == -1 && guard.was_signaled() {
//!     // Interrupted because someone closed `fd`.
//!   }
//!   res
//! };
//!
//! // Closing side, from any thread.
//! closewake::signal_blocked_threads(fd);
//! # let _ = res;
//! # Ok(())
//! # }
//! ```
//!
//! [`BlockRegistry::run`] wraps the check-and-retry loop for callers that
//! just want an [`std::io::Result`].
//!
//! ## Isolated registries
//!
//! The process-wide registry is a convenience. Every operation is available
//! on [`BlockRegistry`] directly, so tests and embedders can construct their
//! own instance with any [`Interruptor`].

#[cfg(unix)]
macro_rules! syscall {
  ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
      #[allow(unused_unsafe)]
      let res = unsafe { libc::$fn($($arg, )*) };
      if res == -1 {
          Err(std::io::Error::last_os_error())
      } else {
          Ok(res)
      }
  }};
}

mod config;
mod error;
mod guard;
pub mod interrupt;
mod registry;
mod thread;

#[cfg(test)]
pub(crate) mod test_utils;

use std::sync::OnceLock;

pub use config::{Config, DEFAULT_CAPACITY};
pub use error::{Error, Result, is_closed};
pub use guard::BlockGuard;
pub use interrupt::{Interruptor, PlatformInterruptor};
pub use registry::{BlockRegistry, Blocked, GuardId};
pub use thread::{Descriptor, ThreadHandle};

static REGISTRY: OnceLock<BlockRegistry<PlatformInterruptor>> = OnceLock::new();

/// Initializes the process-wide registry with the default [`Config`].
///
/// Must run once, before the first guard is created.
///
/// # Errors
///
/// [`Error::AlreadyInit`] on a second call, [`Error::InstallHandler`] if the
/// platform interrupt machinery could not be installed.
pub fn init() -> Result<&'static BlockRegistry<PlatformInterruptor>> {
  init_with(Config::default())
}

/// Initializes the process-wide registry with `config`.
pub fn init_with(
  config: Config,
) -> Result<&'static BlockRegistry<PlatformInterruptor>> {
  if REGISTRY.get().is_some() {
    return Err(Error::AlreadyInit);
  }

  let interruptor = interrupt::platform(&config);
  interruptor.install().map_err(Error::InstallHandler)?;

  let mut created = false;
  let registry = REGISTRY.get_or_init(|| {
    created = true;
    BlockRegistry::with_capacity(config.capacity(), interruptor)
  });

  if !created {
    return Err(Error::AlreadyInit);
  }

  tracing::debug!(capacity = config.capacity(), "closewake initialized");
  Ok(registry)
}

/// Returns the process-wide registry.
///
/// # Panics
///
/// Panics if [`init`] has not been called.
pub fn registry() -> &'static BlockRegistry<PlatformInterruptor> {
  REGISTRY
    .get()
    .expect("closewake not initialized. Call closewake::init() first.")
}

/// Returns the process-wide registry, if initialized.
pub fn try_registry() -> Option<&'static BlockRegistry<PlatformInterruptor>> {
  REGISTRY.get()
}

/// Marks the current thread as blocked on `fd` in the process-wide registry.
///
/// # Panics
///
/// Panics if [`init`] has not been called.
pub fn guard(fd: Descriptor) -> BlockGuard<'static, PlatformInterruptor> {
  BlockGuard::new(registry(), fd)
}

/// Wakes every thread blocked on `fd` in the process-wide registry.
///
/// Returns the number of wake attempts. Does nothing and returns 0 when the
/// registry has not been initialized, since nothing can be blocked then.
pub fn signal_blocked_threads(fd: Descriptor) -> usize {
  try_registry().map_or(0, |registry| registry.wake_all(fd))
}
