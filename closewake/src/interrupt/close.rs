//! Forced invalidation of the descriptor a woken thread is blocked on.

use std::io;

use crate::{Descriptor, ThreadHandle};

/// Makes the descriptor `thread` is blocked on unusable, so that a blocking
/// call that ignored its wake channel fails instead of blocking again.
pub trait CloseScheduler: Send + Sync {
  fn schedule_close(&self, thread: ThreadHandle, fd: Descriptor)
  -> io::Result<()>;
}

/// Shuts the socket down in both directions.
///
/// Runs on the waking thread. A blocked `recv` returns end-of-stream and a
/// blocked `accept` fails; the descriptor itself stays open for its owner to
/// close.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ShutdownClose;

#[cfg(unix)]
impl CloseScheduler for ShutdownClose {
  fn schedule_close(
    &self,
    _thread: ThreadHandle,
    fd: Descriptor,
  ) -> io::Result<()> {
    match syscall!(shutdown(fd, libc::SHUT_RDWR)) {
      Ok(_) => Ok(()),
      // Never connected: nothing can be blocked on the stream.
      Err(err) if err.raw_os_error() == Some(libc::ENOTCONN) => Ok(()),
      Err(err) => Err(err),
    }
  }
}

/// Queues an asynchronous procedure call on the blocked thread that closes
/// the socket.
///
/// The call only runs once the thread enters an alertable wait; the wake
/// channel covers the time until then.
#[cfg(windows)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ApcClose;

#[cfg(windows)]
unsafe extern "system" fn close_socket_apc(socket: usize) {
  unsafe {
    windows_sys::Win32::Networking::WinSock::closesocket(socket);
  }
}

#[cfg(windows)]
impl CloseScheduler for ApcClose {
  fn schedule_close(
    &self,
    thread: ThreadHandle,
    fd: Descriptor,
  ) -> io::Result<()> {
    use windows_sys::Win32::{
      Foundation::{CloseHandle, FALSE},
      System::Threading::{OpenThread, QueueUserAPC, THREAD_SET_CONTEXT},
    };

    let handle = unsafe { OpenThread(THREAD_SET_CONTEXT, FALSE, thread.as_raw()) };
    if handle.is_null() {
      return Err(io::Error::last_os_error());
    }

    let queued =
      unsafe { QueueUserAPC(Some(close_socket_apc), handle, fd as usize) };
    let result =
      if queued == 0 { Err(io::Error::last_os_error()) } else { Ok(()) };

    unsafe { CloseHandle(handle) };
    result
  }
}
