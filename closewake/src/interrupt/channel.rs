//! Wake blocked threads through a per-thread wake channel.
//!
//! Used where signals cannot interrupt blocking socket calls. Every thread
//! that blocks gets a connected stream pair:
//! - On unix: `UnixStream::pair`
//! - On Windows: a loopback TCP connection
//!
//! The blocking call is expected to include the receiving end in its wait
//! set. Waking pushes one byte into the pair and, independently, asks a
//! [`CloseScheduler`] to invalidate the real descriptor so a call that never
//! looked at the channel fails on its next attempt.

use std::{
  collections::HashMap,
  io::{self, Read, Write},
  sync::Arc,
};

use parking_lot::Mutex;
use tracing::{trace, warn};

use super::{CloseScheduler, Interruptor};
use crate::{Descriptor, ThreadHandle};

#[cfg(unix)]
type Stream = std::os::unix::net::UnixStream;

#[cfg(windows)]
type Stream = std::net::TcpStream;

const WAKE_BYTE: u8 = 1;

/// Two ends of a connected local stream and whether a wake byte is pending.
///
/// At most one byte is ever pending: [`WakePair::push`] is a no-op while a
/// byte is unconsumed, and [`WakePair::pop`] re-arms the pair.
pub struct WakePair {
  /// Written by wakers. Nonblocking, since wakers hold the registry lock.
  tx: Stream,
  /// Watched and drained by the blocked thread.
  rx: Stream,
  pushed: Mutex<bool>,
}

impl WakePair {
  pub fn new() -> io::Result<Self> {
    let (tx, rx) = connected_pair()?;
    tx.set_nonblocking(true)?;

    Ok(Self { tx, rx, pushed: Mutex::new(false) })
  }

  /// Receiving end, readable while a wake byte is pending.
  pub fn source(&self) -> Descriptor {
    #[cfg(unix)]
    {
      std::os::fd::AsRawFd::as_raw_fd(&self.rx)
    }
    #[cfg(windows)]
    {
      std::os::windows::io::AsRawSocket::as_raw_socket(&self.rx)
    }
  }

  pub fn is_pushed(&self) -> bool {
    *self.pushed.lock()
  }

  /// Makes [`WakePair::source`] readable, unless a byte is already pending.
  ///
  /// On failure the pair stays "not pushed" so the next wake retries.
  pub fn push(&self) {
    let mut pushed = self.pushed.lock();
    if *pushed {
      return;
    }

    match (&self.tx).write(&[WAKE_BYTE]) {
      Ok(1) => {
        *pushed = true;
        trace!(source = self.source(), "pushed wake byte");
      }
      Ok(_) => warn!("wake channel accepted no bytes"),
      Err(err) => warn!(%err, "can't send a byte to the wake channel"),
    }
  }

  /// Drains the pending wake byte, if any.
  ///
  /// Blocks only until an in-flight byte arrives; a pushed byte was already
  /// written.
  pub fn pop(&self) {
    let mut pushed = self.pushed.lock();
    if !*pushed {
      return;
    }

    let mut byte = [0u8; 1];
    match (&self.rx).read(&mut byte) {
      Ok(1) => {
        *pushed = false;
        trace!(source = self.source(), "popped wake byte");
      }
      Ok(_) => warn!("wake channel closed with a byte pending"),
      Err(err) => warn!(%err, "can't receive a byte from the wake channel"),
    }
  }
}

#[cfg(unix)]
fn connected_pair() -> io::Result<(Stream, Stream)> {
  Stream::pair()
}

#[cfg(windows)]
fn connected_pair() -> io::Result<(Stream, Stream)> {
  use std::net::{Ipv4Addr, TcpListener};

  let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
  let tx = Stream::connect(listener.local_addr()?)?;
  let (rx, _) = listener.accept()?;
  tx.set_nodelay(true)?;
  Ok((tx, rx))
}

struct WakeChannel {
  pair: Arc<WakePair>,
  /// Live guards of the owning thread. Nested guards share one pair.
  depth: usize,
}

/// Interrupts blocked threads with a wake channel plus a forced close.
///
/// Both mechanisms are attempted on every wake; neither depends on the
/// other succeeding.
pub struct ChannelInterruptor<C> {
  channels: Mutex<HashMap<ThreadHandle, WakeChannel>>,
  closer: C,
}

impl<C: CloseScheduler + Default> Default for ChannelInterruptor<C> {
  fn default() -> Self {
    Self::new(C::default())
  }
}

impl<C: CloseScheduler> ChannelInterruptor<C> {
  pub fn new(closer: C) -> Self {
    Self { channels: Mutex::new(HashMap::new()), closer }
  }

  pub fn closer(&self) -> &C {
    &self.closer
  }

  /// The wake pair of `thread`, if it is currently blocked.
  pub fn pair(&self, thread: ThreadHandle) -> Option<Arc<WakePair>> {
    self.channels.lock().get(&thread).map(|channel| Arc::clone(&channel.pair))
  }

  /// Number of threads that currently own a wake channel.
  pub fn channel_count(&self) -> usize {
    self.channels.lock().len()
  }
}

impl<C: CloseScheduler> Interruptor for ChannelInterruptor<C> {
  fn enter(&self, thread: ThreadHandle) {
    if let Some(channel) = self.channels.lock().get_mut(&thread) {
      channel.depth += 1;
      return;
    }

    // Only `thread` itself enters for `thread`, so no entry can appear while
    // the pair is created without the map lock.
    match WakePair::new() {
      Ok(pair) => {
        trace!(?thread, source = pair.source(), "created wake channel");
        let channel = WakeChannel { pair: Arc::new(pair), depth: 1 };
        self.channels.lock().insert(thread, channel);
      }
      // The forced close still reaches this thread.
      Err(err) => warn!(?thread, %err, "can't create wake channel"),
    }
  }

  fn wake(&self, thread: ThreadHandle, fd: Descriptor) -> io::Result<()> {
    if let Some(pair) = self.pair(thread) {
      pair.push();
    }
    self.closer.schedule_close(thread, fd)
  }

  fn leave(&self, thread: ThreadHandle) {
    let Some(pair) = self.pair(thread) else {
      return;
    };
    pair.pop();

    let mut channels = self.channels.lock();
    let Some(channel) = channels.get_mut(&thread) else {
      return;
    };
    channel.depth -= 1;
    if channel.depth == 0 {
      channels.remove(&thread);
      trace!(?thread, "destroyed wake channel");
    }
  }

  fn wake_source(&self, thread: ThreadHandle) -> Option<Descriptor> {
    self.channels.lock().get(&thread).map(|channel| channel.pair.source())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{
    sync::{
      Barrier,
      atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
  };

  #[derive(Default)]
  struct CountingClose {
    calls: AtomicUsize,
  }

  impl CloseScheduler for CountingClose {
    fn schedule_close(
      &self,
      _thread: ThreadHandle,
      _fd: Descriptor,
    ) -> io::Result<()> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }
  }

  /// Bytes currently waiting on the receiving end.
  #[cfg(unix)]
  fn pending(pair: &WakePair) -> usize {
    let mut buf = [0u8; 8];
    let peeked = syscall!(recv(
      pair.source(),
      buf.as_mut_ptr().cast(),
      buf.len(),
      libc::MSG_PEEK | libc::MSG_DONTWAIT
    ));
    match peeked {
      Ok(n) => n as usize,
      Err(err) if err.kind() == io::ErrorKind::WouldBlock => 0,
      Err(err) => panic!("peek failed: {err}"),
    }
  }

  /// Bytes currently waiting on the receiving end.
  #[cfg(windows)]
  fn pending(pair: &WakePair) -> usize {
    let mut buf = [0u8; 8];
    pair.rx.set_nonblocking(true).unwrap();
    let n = match pair.rx.peek(&mut buf) {
      Ok(n) => n,
      Err(err) if err.kind() == io::ErrorKind::WouldBlock => 0,
      Err(err) => panic!("peek failed: {err}"),
    };
    pair.rx.set_nonblocking(false).unwrap();
    n
  }

  #[test]
  fn test_push_is_idempotent() {
    let pair = WakePair::new().unwrap();
    assert!(!pair.is_pushed());

    pair.push();
    pair.push();
    pair.push();

    assert!(pair.is_pushed());
    assert_eq!(pending(&pair), 1);
  }

  #[test]
  fn test_pop_rearms() {
    let pair = WakePair::new().unwrap();

    pair.pop(); // Nothing pending, nothing to read
    assert!(!pair.is_pushed());

    pair.push();
    pair.pop();
    assert!(!pair.is_pushed());
    assert_eq!(pending(&pair), 0);

    pair.push();
    assert!(pair.is_pushed());
    assert_eq!(pending(&pair), 1);
  }

  #[test]
  fn test_concurrent_push_single_byte() {
    let pair = WakePair::new().unwrap();
    let barrier = Barrier::new(8);

    thread::scope(|s| {
      for _ in 0..8 {
        s.spawn(|| {
          barrier.wait();
          for _ in 0..100 {
            pair.push();
          }
        });
      }
    });

    assert_eq!(pending(&pair), 1);
  }

  #[cfg(unix)]
  #[test]
  fn test_failed_push_is_retried() {
    let pair = WakePair::new().unwrap();

    // Fill the channel so the nonblocking write fails.
    let chunk = [0u8; 4096];
    for len in [chunk.len(), 1] {
      loop {
        match (&pair.tx).write(&chunk[..len]) {
          Ok(_) => {}
          Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
          Err(err) => panic!("fill failed: {err}"),
        }
      }
    }

    pair.push();
    assert!(!pair.is_pushed());

    pair.rx.set_nonblocking(true).unwrap();
    let mut buf = [0u8; 4096];
    loop {
      match (&pair.rx).read(&mut buf) {
        Ok(0) => panic!("wake channel closed"),
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
        Err(err) => panic!("drain failed: {err}"),
      }
    }
    pair.rx.set_nonblocking(false).unwrap();

    pair.push();
    assert!(pair.is_pushed());
    assert_eq!(pending(&pair), 1);
  }

  #[test]
  fn test_pop_does_not_hold_channel_map() {
    let interruptor = ChannelInterruptor::new(CountingClose::default());
    let me = ThreadHandle::current();
    interruptor.enter(me);
    let pair = interruptor.pair(me).unwrap();

    // Marked pushed with the byte still in flight: pop blocks until it lands.
    *pair.pushed.lock() = true;

    thread::scope(|s| {
      let leaving = s.spawn(|| interruptor.leave(me));
      thread::sleep(Duration::from_millis(20));

      assert!(interruptor.channels.try_lock().is_some());
      assert_eq!(interruptor.wake_source(me), Some(pair.source()));

      (&pair.tx).write_all(&[WAKE_BYTE]).unwrap();
      leaving.join().unwrap();
    });

    assert_eq!(interruptor.channel_count(), 0);
    assert!(!pair.is_pushed());
    assert_eq!(pending(&pair), 0);
  }

  #[test]
  fn test_channel_lifecycle() {
    let interruptor = ChannelInterruptor::new(CountingClose::default());
    let me = ThreadHandle::current();

    assert!(interruptor.wake_source(me).is_none());
    interruptor.enter(me);
    let source = interruptor.wake_source(me).unwrap();
    assert_eq!(interruptor.channel_count(), 1);

    // Nested guard shares the pair.
    interruptor.enter(me);
    assert_eq!(interruptor.wake_source(me), Some(source));
    interruptor.leave(me);
    assert_eq!(interruptor.channel_count(), 1);

    interruptor.leave(me);
    assert_eq!(interruptor.channel_count(), 0);
    assert!(interruptor.pair(me).is_none());

    // Stray leave is harmless.
    interruptor.leave(me);
  }

  #[test]
  fn test_wake_pushes_and_closes() {
    let interruptor = ChannelInterruptor::new(CountingClose::default());
    let me = ThreadHandle::current();
    interruptor.enter(me);

    interruptor.wake(me, 9).unwrap();
    interruptor.wake(me, 9).unwrap();

    let pair = interruptor.pair(me).unwrap();
    assert!(pair.is_pushed());
    assert_eq!(pending(&pair), 1);
    assert_eq!(interruptor.closer().calls.load(Ordering::SeqCst), 2);

    interruptor.leave(me);
    assert!(!pair.is_pushed());
  }

  #[test]
  fn test_wake_without_channel_still_closes() {
    let interruptor = ChannelInterruptor::new(CountingClose::default());
    let stranger = thread::spawn(ThreadHandle::current).join().unwrap();

    interruptor.wake(stranger, 9).unwrap();
    assert_eq!(interruptor.closer().calls.load(Ordering::SeqCst), 1);
  }
}
