//! Thread and descriptor identities.

use std::fmt;

/// The descriptor a thread blocks on.
#[cfg(unix)]
pub type Descriptor = std::os::fd::RawFd;

/// The descriptor a thread blocks on.
#[cfg(windows)]
pub type Descriptor = std::os::windows::io::RawSocket;

/// Opaque identity of an OS thread.
///
/// - Linux and Android: the kernel thread id. Signalling an exited thread
///   fails with `ESRCH` instead of reaching whoever reused its `pthread_t`.
/// - Other unix: `pthread_t`, only meaningful while the thread is alive.
/// - Windows: the numeric thread id.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadHandle(
  #[cfg(linux_like)] libc::pid_t,
  #[cfg(all(unix, not(linux_like)))] libc::pthread_t,
  #[cfg(windows)] u32,
);

// `pthread_t` is a raw pointer on some targets. It is only ever used as an
// identity and as the target of `pthread_kill`.
unsafe impl Send for ThreadHandle {}
unsafe impl Sync for ThreadHandle {}

impl ThreadHandle {
  /// Identity of the calling thread.
  #[cfg(linux_like)]
  pub fn current() -> Self {
    Self(unsafe { libc::syscall(libc::SYS_gettid) } as libc::pid_t)
  }

  /// Identity of the calling thread.
  #[cfg(all(unix, not(linux_like)))]
  pub fn current() -> Self {
    Self(unsafe { libc::pthread_self() })
  }

  /// Identity of the calling thread.
  #[cfg(windows)]
  pub fn current() -> Self {
    Self(unsafe { windows_sys::Win32::System::Threading::GetCurrentThreadId() })
  }

  #[cfg(linux_like)]
  pub fn as_raw(&self) -> libc::pid_t {
    self.0
  }

  #[cfg(all(unix, not(linux_like)))]
  pub fn as_raw(&self) -> libc::pthread_t {
    self.0
  }

  #[cfg(windows)]
  pub fn as_raw(&self) -> u32 {
    self.0
  }
}

impl fmt::Debug for ThreadHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("ThreadHandle").field(&self.0).finish()
  }
}
