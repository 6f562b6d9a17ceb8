use std::io;

/// Errors produced by closewake.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// [`crate::init`] was called more than once.
  #[error("closewake is already initialized")]
  AlreadyInit,

  /// The platform interrupt machinery could not be installed.
  #[error("setting blocked thread signal handler failed: {0}")]
  InstallHandler(#[source] io::Error),

  /// An I/O error from the guarded call itself.
  #[error(transparent)]
  Io(#[from] io::Error),

  /// The descriptor was closed while the calling thread was blocked on it.
  #[error("descriptor closed while blocked on it")]
  Closed,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<Error> for io::Error {
  fn from(err: Error) -> Self {
    match err {
      Error::Io(err) => err,
      other => io::Error::other(other),
    }
  }
}

/// Returns `true` if `err` reports an asynchronous close, as produced by
/// [`crate::BlockRegistry::run`].
pub fn is_closed(err: &io::Error) -> bool {
  err
    .get_ref()
    .and_then(|inner| inner.downcast_ref::<Error>())
    .is_some_and(|inner| matches!(inner, Error::Closed))
}
