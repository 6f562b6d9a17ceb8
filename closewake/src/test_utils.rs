//! Test utilities shared by unit tests.

use std::io;

use parking_lot::Mutex;

use crate::{Descriptor, Interruptor, ThreadHandle};

/// Interruptor that records every call instead of touching the OS.
#[derive(Default)]
pub struct Recorder {
  fail: bool,
  wakes: Mutex<Vec<(ThreadHandle, Descriptor)>>,
  events: Mutex<Vec<&'static str>>,
}

impl Recorder {
  /// A recorder whose wakes all fail.
  pub fn failing() -> Self {
    Self { fail: true, ..Self::default() }
  }

  pub fn wakes(&self) -> Vec<(ThreadHandle, Descriptor)> {
    self.wakes.lock().clone()
  }

  pub fn events(&self) -> Vec<&'static str> {
    self.events.lock().clone()
  }
}

impl Interruptor for Recorder {
  fn install(&self) -> io::Result<()> {
    self.events.lock().push("install");
    Ok(())
  }

  fn enter(&self, _thread: ThreadHandle) {
    self.events.lock().push("enter");
  }

  fn wake(&self, thread: ThreadHandle, fd: Descriptor) -> io::Result<()> {
    self.events.lock().push("wake");
    self.wakes.lock().push((thread, fd));

    if self.fail {
      return Err(io::Error::from_raw_os_error(3));
    }
    Ok(())
  }

  fn leave(&self, _thread: ThreadHandle) {
    self.events.lock().push("leave");
  }
}
