/// Number of guard slots pre-allocated by default.
pub const DEFAULT_CAPACITY: usize = 64;

/// Configuration for the process-wide registry.
///
/// ```rust
/// let config = closewake::Config::new().with_capacity(256);
/// assert_eq!(config.capacity(), 256);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
  capacity: usize,
  #[cfg(unix)]
  signal: Option<libc::c_int>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      capacity: DEFAULT_CAPACITY,
      #[cfg(unix)]
      signal: None,
    }
  }
}

impl Config {
  pub fn new() -> Self {
    Self::default()
  }

  /// Guard slots allocated up front. The registry grows past this if more
  /// threads block at once; registration never fails.
  pub fn with_capacity(mut self, capacity: usize) -> Self {
    self.capacity = capacity;
    self
  }

  /// Signal used to interrupt blocked threads.
  ///
  /// The embedding process must not use this signal for anything else.
  /// Defaults to [`crate::interrupt::default_signal`].
  #[cfg(unix)]
  pub fn with_signal(mut self, signal: libc::c_int) -> Self {
    self.signal = Some(signal);
    self
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  #[cfg(unix)]
  pub fn signal(&self) -> libc::c_int {
    self.signal.unwrap_or_else(crate::interrupt::default_signal)
  }
}
