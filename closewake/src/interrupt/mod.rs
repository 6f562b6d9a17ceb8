//! Platform mechanisms that force a blocked thread's syscall to return.
//!
//! | Interruptor                       | Wake                                    |
//! |-----------------------------------|-----------------------------------------|
//! | [`SignalInterruptor`] (unix)      | `tgkill`/`pthread_kill`, no-op handler  |
//! | [`ChannelInterruptor`]            | wake channel byte + forced close        |
//!
//! The registry only ever talks to the [`Interruptor`] trait.

use std::io;

use crate::{Config, Descriptor, ThreadHandle};

mod channel;
mod close;
#[cfg(unix)]
mod signal;

pub use channel::{ChannelInterruptor, WakePair};
#[cfg(windows)]
pub use close::ApcClose;
pub use close::CloseScheduler;
#[cfg(unix)]
pub use close::ShutdownClose;
#[cfg(unix)]
pub use signal::{SignalInterruptor, default_signal};

/// Forcibly wakes one OS thread blocked in a syscall.
///
/// `enter` and `leave` bracket every blocking episode of a thread and run on
/// that thread, outside the registry lock. `wake` runs on the waking thread
/// while the registry lock is held, so it must be short and must not block.
pub trait Interruptor: Send + Sync {
  /// Process-wide setup, run once before the first guard.
  fn install(&self) -> io::Result<()> {
    Ok(())
  }

  /// `thread` is about to block.
  fn enter(&self, _thread: ThreadHandle) {}

  /// Make `thread`, blocked on `fd`, return from its blocking call.
  fn wake(&self, thread: ThreadHandle, fd: Descriptor) -> io::Result<()>;

  /// `thread` is done blocking.
  fn leave(&self, _thread: ThreadHandle) {}

  /// Descriptor that becomes readable when `thread` is woken, if any.
  fn wake_source(&self, _thread: ThreadHandle) -> Option<Descriptor> {
    None
  }
}

/// The interruptor used by the process-wide registry.
#[cfg(unix)]
pub type PlatformInterruptor = SignalInterruptor;

/// The interruptor used by the process-wide registry.
#[cfg(windows)]
pub type PlatformInterruptor = ChannelInterruptor<ApcClose>;

#[cfg(unix)]
pub(crate) fn platform(config: &Config) -> PlatformInterruptor {
  SignalInterruptor::with_signal(config.signal())
}

#[cfg(windows)]
pub(crate) fn platform(_config: &Config) -> PlatformInterruptor {
  ChannelInterruptor::new(ApcClose)
}
