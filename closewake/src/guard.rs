use std::{fmt, marker::PhantomData};

use crate::{
  BlockRegistry, GuardId,
  interrupt::Interruptor,
  thread::{Descriptor, ThreadHandle},
};

/// Marks the calling thread as blocked on a descriptor.
///
/// Create it immediately before the blocking call and drop it immediately
/// after, whatever the outcome:
///
/// ```rust,ignore
/// let guard = BlockGuard::new(&registry, fd);
/// let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
/// if n == -1 && guard.was_signaled() {
///   // `fd` was closed under us.
/// }
/// drop(guard);
/// ```
///
/// A guard is tied to the thread that created it and cannot be sent to
/// another one. Dropping it always takes the registry lock, so it can never
/// race a concurrent [`BlockRegistry::wake_all`].
pub struct BlockGuard<'r, I: Interruptor> {
  registry: &'r BlockRegistry<I>,
  id: GuardId,
  fd: Descriptor,
  thread: ThreadHandle,
  _not_send: PhantomData<*const ()>,
}

impl<'r, I: Interruptor> BlockGuard<'r, I> {
  pub fn new(registry: &'r BlockRegistry<I>, fd: Descriptor) -> Self {
    let thread = ThreadHandle::current();
    // The wake channel must exist before a wake can target this thread.
    registry.interruptor().enter(thread);
    let id = registry.register(fd, thread);

    Self { registry, id, fd, thread, _not_send: PhantomData }
  }

  /// Whether the descriptor was closed while this guard was live.
  ///
  /// Check this after any early return from the blocking call: an
  /// interrupted call with `was_signaled() == false` was hit by some
  /// unrelated signal and should be retried.
  pub fn was_signaled(&self) -> bool {
    self.registry.is_signaled(self.id)
  }

  pub fn descriptor(&self) -> Descriptor {
    self.fd
  }

  pub fn id(&self) -> GuardId {
    self.id
  }

  /// Descriptor that becomes readable when this thread is woken, for
  /// interruptors that use a wake channel. Add it to the wait set of the
  /// blocking call.
  pub fn wake_source(&self) -> Option<Descriptor> {
    self.registry.interruptor().wake_source(self.thread)
  }
}

impl<I: Interruptor> Drop for BlockGuard<'_, I> {
  fn drop(&mut self) {
    self.registry.unregister(self.id);
    self.registry.interruptor().leave(self.thread);
  }
}

impl<I: Interruptor> fmt::Debug for BlockGuard<'_, I> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BlockGuard")
      .field("id", &self.id)
      .field("fd", &self.fd)
      .field("thread", &self.thread)
      .finish()
  }
}
