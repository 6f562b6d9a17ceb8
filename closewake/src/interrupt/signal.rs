//! Wake blocked threads by signalling them.
//!
//! A dedicated signal gets a handler that does nothing, installed without
//! `SA_RESTART`. Delivering it to a thread blocked in a syscall makes that
//! syscall fail with `EINTR` instead of restarting, and the handler existing
//! at all keeps the default action from killing the process.

use std::{io, mem::MaybeUninit, ptr};

use libc::c_int;
use tracing::debug;

use super::Interruptor;
use crate::{Descriptor, ThreadHandle};

extern "C" fn blocked_thread_signal_handler(_signal: c_int) {
  // Sent only for its side effect of interrupting syscalls.
}

/// Signal used when none is configured.
///
/// `SIGRTMIN() + 2` on Linux and Android, `SIGUSR2` elsewhere.
pub fn default_signal() -> c_int {
  #[cfg(linux_like)]
  {
    libc::SIGRTMIN() + 2
  }
  #[cfg(not(linux_like))]
  {
    libc::SIGUSR2
  }
}

/// Interrupts blocked threads with `tgkill` on Linux and Android,
/// `pthread_kill` elsewhere.
///
/// The signal alone cannot say why a call was interrupted; callers tell an
/// asynchronous close apart from any other signal with
/// [`crate::BlockGuard::was_signaled`].
#[derive(Debug, Clone, Copy)]
pub struct SignalInterruptor {
  signal: c_int,
}

impl Default for SignalInterruptor {
  fn default() -> Self {
    Self::with_signal(default_signal())
  }
}

impl SignalInterruptor {
  pub fn new() -> Self {
    Self::default()
  }

  /// Uses `signal`, which the process must reserve for this purpose.
  pub fn with_signal(signal: c_int) -> Self {
    Self { signal }
  }

  pub fn signal(&self) -> c_int {
    self.signal
  }
}

impl Interruptor for SignalInterruptor {
  fn install(&self) -> io::Result<()> {
    // SAFETY: all-zero is a valid `sigaction`: no flags, empty mask.
    let mut action: libc::sigaction =
      unsafe { MaybeUninit::zeroed().assume_init() };
    action.sa_sigaction =
      blocked_thread_signal_handler as extern "C" fn(c_int) as usize;
    // No SA_RESTART: unblocking the syscall is the whole point.
    action.sa_flags = 0;
    syscall!(sigemptyset(&mut action.sa_mask))?;
    syscall!(sigaction(self.signal, &action, ptr::null_mut()))?;

    debug!(signal = self.signal, "installed blocked thread signal handler");
    Ok(())
  }

  #[cfg(linux_like)]
  fn wake(&self, thread: ThreadHandle, _fd: Descriptor) -> io::Result<()> {
    // An exited thread yields ESRCH, even if its pthread_t was reused.
    syscall!(syscall(
      libc::SYS_tgkill,
      libc::getpid() as libc::c_long,
      thread.as_raw() as libc::c_long,
      self.signal as libc::c_long
    ))?;
    Ok(())
  }

  #[cfg(not(linux_like))]
  fn wake(&self, thread: ThreadHandle, _fd: Descriptor) -> io::Result<()> {
    // pthread_kill reports failure through its return value, not errno.
    let errno = unsafe { libc::pthread_kill(thread.as_raw(), self.signal) };
    if errno != 0 {
      return Err(io::Error::from_raw_os_error(errno));
    }
    Ok(())
  }
}
