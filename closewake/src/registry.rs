//! Registry of threads currently blocked on a descriptor.
//!
//! # Design
//!
//! Every live [`BlockGuard`] owns one slot in the guard store. Its
//! [`GuardId`] is a generational index:
//! - **Slot**: position in the slot vector (low 32 bits)
//! - **Generation**: bumped each time the slot is released (high 32 bits)
//!
//! A stale id never matches a reused slot. Slots are pre-allocated, freed
//! slots are reused LIFO, so registering and unregistering are O(1) and do
//! not allocate until the pre-allocated capacity is exhausted.
//!
//! A single mutex protects the store. Registration, removal and the
//! scan-and-wake in [`BlockRegistry::wake_all`] all take it, so a guard can
//! never be released while a scan is looking at it.

use std::{fmt, io};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::{
  BlockGuard, Error, Result,
  config::DEFAULT_CAPACITY,
  interrupt::Interruptor,
  thread::{Descriptor, ThreadHandle},
};

/// Identifies one registered blocking episode.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct GuardId(u64);

impl GuardId {
  fn new(slot: u32, generation: u32) -> Self {
    Self(((generation as u64) << 32) | (slot as u64))
  }

  pub fn slot(&self) -> u32 {
    (self.0 & 0xFFFF_FFFF) as u32
  }

  pub fn generation(&self) -> u32 {
    (self.0 >> 32) as u32
  }

  pub fn as_u64(&self) -> u64 {
    self.0
  }
}

impl fmt::Debug for GuardId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "GuardId({}v{})", self.slot(), self.generation())
  }
}

/// A live registry entry, as reported by [`BlockRegistry::snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blocked {
  pub id: GuardId,
  pub fd: Descriptor,
  pub thread: ThreadHandle,
  pub signaled: bool,
}

struct Entry {
  fd: Descriptor,
  thread: ThreadHandle,
  /// Only ever goes false -> true while the entry lives.
  signaled: bool,
}

struct Slot {
  generation: u32,
  entry: Option<Entry>,
}

struct GuardStore {
  slots: Vec<Slot>,
  /// Released slot indices, reused last-in first-out.
  free: Vec<u32>,
  /// Slots below this index have been handed out at least once.
  next_slot: u32,
  live: usize,
}

impl GuardStore {
  fn with_capacity(cap: usize) -> Self {
    let cap = cap.clamp(1, u32::MAX as usize);
    let slots =
      (0..cap).map(|_| Slot { generation: 0, entry: None }).collect();

    Self { slots, free: Vec::with_capacity(cap), next_slot: 0, live: 0 }
  }

  fn next_slot(&mut self) -> u32 {
    if let Some(slot) = self.free.pop() {
      return slot;
    }

    if self.next_slot as usize == self.slots.len() {
      self.slots.push(Slot { generation: 0, entry: None });
      // Keep room for every slot on the free list so release never allocates.
      self.free.reserve(self.slots.len() - self.free.len());
    }

    let slot = self.next_slot;
    self.next_slot += 1;
    slot
  }

  fn insert(&mut self, entry: Entry) -> GuardId {
    let index = self.next_slot();
    let slot = &mut self.slots[index as usize];
    debug_assert!(slot.entry.is_none(), "GuardStore: slot {index} in use");

    slot.entry = Some(entry);
    self.live += 1;
    GuardId::new(index, slot.generation)
  }

  fn remove(&mut self, id: GuardId) -> Option<Entry> {
    let slot = self.slots.get_mut(id.slot() as usize)?;

    if slot.generation != id.generation() {
      return None;
    }

    let entry = slot.entry.take()?;
    slot.generation = slot.generation.wrapping_add(1);
    self.free.push(id.slot());
    self.live -= 1;
    Some(entry)
  }

  fn get(&self, id: GuardId) -> Option<&Entry> {
    let slot = self.slots.get(id.slot() as usize)?;
    if slot.generation == id.generation() { slot.entry.as_ref() } else { None }
  }

  fn iter(&self) -> impl Iterator<Item = (GuardId, &Entry)> {
    self.slots.iter().enumerate().filter_map(|(index, slot)| {
      let entry = slot.entry.as_ref()?;
      Some((GuardId::new(index as u32, slot.generation), entry))
    })
  }

  fn iter_mut(&mut self) -> impl Iterator<Item = (GuardId, &mut Entry)> {
    self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
      let generation = slot.generation;
      let entry = slot.entry.as_mut()?;
      Some((GuardId::new(index as u32, generation), entry))
    })
  }
}

/// Tracks which threads are blocked on which descriptor and wakes them.
///
/// The registry is platform neutral: the actual wake is delegated to `I`.
pub struct BlockRegistry<I> {
  store: Mutex<GuardStore>,
  interruptor: I,
}

impl<I: Interruptor> BlockRegistry<I> {
  /// Creates a registry with [`DEFAULT_CAPACITY`] pre-allocated slots.
  ///
  /// The interruptor is not installed; call [`BlockRegistry::install`]
  /// before the first guard if it needs process-wide setup.
  pub fn new(interruptor: I) -> Self {
    Self::with_capacity(DEFAULT_CAPACITY, interruptor)
  }

  pub fn with_capacity(cap: usize, interruptor: I) -> Self {
    Self { store: Mutex::new(GuardStore::with_capacity(cap)), interruptor }
  }

  /// Installs the interruptor's process-wide machinery.
  pub fn install(&self) -> Result<()> {
    self.interruptor.install().map_err(Error::InstallHandler)
  }

  pub fn interruptor(&self) -> &I {
    &self.interruptor
  }

  pub(crate) fn register(
    &self,
    fd: Descriptor,
    thread: ThreadHandle,
  ) -> GuardId {
    let id = self.store.lock().insert(Entry { fd, thread, signaled: false });
    trace!(fd, ?id, ?thread, "registered blocked thread");
    id
  }

  pub(crate) fn unregister(&self, id: GuardId) -> bool {
    let removed = self.store.lock().remove(id).is_some();
    trace!(?id, removed, "unregistered blocked thread");
    removed
  }

  /// Wakes every thread currently blocked on `fd`.
  ///
  /// Each matching guard is marked signaled before its thread is woken.
  /// Several threads may block on one descriptor (think `accept` on a shared
  /// listener); all of them are woken, in no particular order. Returns the
  /// number of wake attempts.
  ///
  /// Never waits for the woken threads. A failed wake is logged and
  /// otherwise ignored: the thread stays blocked.
  pub fn wake_all(&self, fd: Descriptor) -> usize {
    let mut store = self.store.lock();
    let mut woken = 0;

    for (id, entry) in store.iter_mut().filter(|(_, entry)| entry.fd == fd) {
      entry.signaled = true;
      woken += 1;

      debug!(fd, ?id, thread = ?entry.thread, "waking blocked thread");
      if let Err(err) = self.interruptor.wake(entry.thread, fd) {
        warn!(fd, thread = ?entry.thread, %err, "failed to wake blocked thread");
      }
    }

    woken
  }

  /// Whether [`BlockRegistry::wake_all`] targeted the guard `id`.
  ///
  /// `false` for ids that are no longer registered.
  pub fn is_signaled(&self, id: GuardId) -> bool {
    self.store.lock().get(id).is_some_and(|entry| entry.signaled)
  }

  /// Number of currently blocked guards.
  pub fn len(&self) -> usize {
    self.store.lock().live
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Every live guard, in slot order.
  pub fn snapshot(&self) -> Vec<Blocked> {
    self
      .store
      .lock()
      .iter()
      .map(|(id, entry)| Blocked {
        id,
        fd: entry.fd,
        thread: entry.thread,
        signaled: entry.signaled,
      })
      .collect()
  }

  /// Runs the blocking call `op` on `fd` with asynchronous close semantics.
  ///
  /// `op` runs under a fresh [`BlockGuard`], which it can use to find the
  /// guard's wake source. If the guard was signaled, the result is replaced
  /// by [`Error::Closed`]. An [`io::ErrorKind::Interrupted`] failure without
  /// a close request was some unrelated signal, so `op` is retried.
  ///
  /// ```rust
  /// # struct Noop;
  /// # impl closewake::Interruptor for Noop {
  /// #   fn wake(&self, _: closewake::ThreadHandle, _: closewake::Descriptor) -> std::io::Result<()> { Ok(()) }
  /// # }
  /// let registry = closewake::BlockRegistry::new(Noop);
  /// let n = registry.run(3, |_guard| Ok(42)).unwrap();
  /// assert_eq!(n, 42);
  /// ```
  pub fn run<T, F>(&self, fd: Descriptor, mut op: F) -> io::Result<T>
  where
    F: FnMut(&BlockGuard<'_, I>) -> io::Result<T>,
  {
    loop {
      let guard = BlockGuard::new(self, fd);
      let result = op(&guard);

      if guard.was_signaled() {
        return Err(Error::Closed.into());
      }

      match result {
        Err(err) if err.kind() == io::ErrorKind::Interrupted => {
          trace!(fd, "interrupted without close request, retrying");
        }
        result => return result,
      }
    }
  }
}

impl<I> fmt::Debug for BlockRegistry<I> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BlockRegistry")
      .field("live", &self.store.lock().live)
      .finish_non_exhaustive()
  }
}
