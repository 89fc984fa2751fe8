//! Readiness multiplexing.
//!
//! A [`Poller`] tracks descriptors of interest and answers "who is ready" with
//! a bounded wait. Two backends implement the same contract:
//!
//! - [`ScanPoller`]: a dynamic bitmap scanned on every poll (`poll(2)`), O(n)
//!   in the highest watched descriptor.
//! - [`QueuePoller`]: event-queue registration (epoll/kqueue through the
//!   `polling` crate), O(1) watch/unwatch and O(ready) collection.
//!
//! Any descriptor carrying a pending socket error is reported in
//! [`Readiness::exception`] regardless of the interest it was watched with.

mod queue;
mod scan;

pub use queue::QueuePoller;
pub use scan::ScanPoller;

use std::io;
use std::ops::BitOr;
use std::os::fd::{BorrowedFd, RawFd};
use std::time::Duration;

use socket2::SockRef;
use tracing::trace;

use crate::config::PollerBackend;
use crate::error::{Error, Result};

/// Interest flags indicating which readiness events to watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Interest(u8);

impl Interest {
    /// No interest.
    pub const NONE: Interest = Interest(0b000);
    /// Readable (or end of stream).
    pub const READ: Interest = Interest(0b001);
    /// Writable (or connect completed).
    pub const WRITE: Interest = Interest(0b010);
    /// Exceptional condition.
    pub const EXCEPTION: Interest = Interest(0b100);

    /// Returns true if read interest is set.
    #[inline]
    #[must_use]
    pub const fn is_read(self) -> bool {
        self.0 & Self::READ.0 != 0
    }

    /// Returns true if write interest is set.
    #[inline]
    #[must_use]
    pub const fn is_write(self) -> bool {
        self.0 & Self::WRITE.0 != 0
    }

    /// Returns true if exception interest is set.
    #[inline]
    #[must_use]
    pub const fn is_exception(self) -> bool {
        self.0 & Self::EXCEPTION.0 != 0
    }

    /// Returns true if no interest is set.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Combines interests.
    #[must_use]
    pub const fn add(self, other: Interest) -> Self {
        Interest(self.0 | other.0)
    }

    /// Removes interest.
    #[must_use]
    pub const fn remove(self, other: Interest) -> Self {
        Interest(self.0 & !other.0)
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        self.add(rhs)
    }
}

/// Snapshot produced by a single [`Poller::poll`] call.
///
/// Valid only for the call that produced it; every poll clears and
/// repopulates it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Readiness {
    /// Descriptors ready for reading.
    pub read: Vec<RawFd>,
    /// Descriptors ready for writing.
    pub write: Vec<RawFd>,
    /// Descriptors with an exceptional condition or pending socket error.
    pub exception: Vec<RawFd>,
    /// Socket error code for every descriptor inspected, `0` when clean.
    pub errors: Vec<(RawFd, i32)>,
}

impl Readiness {
    /// Create an empty result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all lists.
    pub fn clear(&mut self) {
        self.read.clear();
        self.write.clear();
        self.exception.clear();
        self.errors.clear();
    }

    /// Returns true if nothing was reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty() && self.exception.is_empty()
    }

    /// Whether `fd` was reported readable.
    #[must_use]
    pub fn is_readable(&self, fd: RawFd) -> bool {
        self.read.contains(&fd)
    }

    /// Whether `fd` was reported writable.
    #[must_use]
    pub fn is_writable(&self, fd: RawFd) -> bool {
        self.write.contains(&fd)
    }

    /// Whether `fd` was reported in the exception list.
    #[must_use]
    pub fn is_exceptional(&self, fd: RawFd) -> bool {
        self.exception.contains(&fd)
    }

    /// Socket error recorded for `fd` during the last poll.
    #[must_use]
    pub fn error_for(&self, fd: RawFd) -> Option<i32> {
        self.errors
            .iter()
            .find(|(candidate, _)| *candidate == fd)
            .map(|(_, code)| *code)
    }

    /// Sort `fd` into the result lists.
    ///
    /// `error` wins over every readiness flag.
    pub(crate) fn record(
        &mut self,
        fd: RawFd,
        error: i32,
        readable: bool,
        writable: bool,
        exceptional: bool,
    ) {
        self.errors.push((fd, error));
        if error != 0 {
            self.exception.push(fd);
            return;
        }
        if readable {
            self.read.push(fd);
        }
        if writable {
            self.write.push(fd);
        }
        if exceptional {
            self.exception.push(fd);
        }
    }
}

/// A readiness multiplexer.
///
/// Callers must stay agnostic to which backend is in use.
pub trait Poller: Send {
    /// Add `interest` for `fd`, merging with any interest already watched.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the backend rejects the descriptor.
    fn watch(&mut self, fd: RawFd, interest: Interest) -> io::Result<()>;

    /// Drop `interest` for `fd`. The descriptor stops being tracked once no
    /// interest remains.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the backend fails to update the registration.
    fn unwatch(&mut self, fd: RawFd, interest: Interest) -> io::Result<()>;

    /// Whether `fd` is currently watched with all of `interest`.
    fn contains(&self, fd: RawFd, interest: Interest) -> bool;

    /// Number of tracked descriptors.
    fn len(&self) -> usize;

    /// Returns true if no descriptor is tracked.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for readiness, at most `timeout` (`None` waits indefinitely).
    ///
    /// `result` is cleared first. Returns the number of descriptors reported;
    /// a timeout with no events yields `Ok(0)`, not an error.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the wait itself fails.
    fn poll(&mut self, result: &mut Readiness, timeout: Option<Duration>) -> io::Result<usize>;
}

/// Create a poller for the configured backend.
///
/// # Errors
///
/// Returns the OS error if the event queue cannot be created.
pub fn new_poller(backend: PollerBackend, capacity_hint: usize) -> io::Result<Box<dyn Poller>> {
    Ok(match backend {
        PollerBackend::Scan => Box::new(ScanPoller::with_capacity(capacity_hint)),
        PollerBackend::Queue => Box::new(QueuePoller::with_capacity(capacity_hint)?),
    })
}

/// Take the pending socket error of `fd` (`SO_ERROR`).
///
/// Returns `Ok(None)` when the socket is clean.
///
/// # Errors
///
/// Returns the OS error if `fd` is not a socket or the query fails.
pub fn socket_error(fd: RawFd) -> io::Result<Option<io::Error>> {
    // SAFETY: the descriptor is only borrowed for the duration of the
    // getsockopt call; callers pass descriptors they are watching.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    SockRef::from(&borrowed).take_error()
}

/// Pending error code for `fd`; a failed query counts as an error.
pub(crate) fn pending_error_code(fd: RawFd) -> i32 {
    match socket_error(fd) {
        Ok(None) => 0,
        Ok(Some(err)) | Err(err) => err.raw_os_error().unwrap_or(libc::EIO),
    }
}

/// A poller paired with its reusable result buffer.
///
/// Owns the wait-then-classify sequence used by connect and receive paths.
pub struct Multiplexer {
    poller: Box<dyn Poller>,
    readiness: Readiness,
}

impl Multiplexer {
    /// Create a multiplexer over the configured backend.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the backend cannot be initialised.
    pub fn new(backend: PollerBackend, capacity_hint: usize) -> Result<Self> {
        let poller = new_poller(backend, capacity_hint)
            .map_err(|e| Error::Transport(format!("Failed to initialize poller: {e}")))?;
        Ok(Self::from_poller(poller))
    }

    /// Wrap an existing poller.
    #[must_use]
    pub fn from_poller(poller: Box<dyn Poller>) -> Self {
        Self {
            poller,
            readiness: Readiness::new(),
        }
    }

    /// Access the underlying poller.
    pub fn poller_mut(&mut self) -> &mut dyn Poller {
        self.poller.as_mut()
    }

    /// Result of the most recent wait.
    #[must_use]
    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    /// First non-zero socket error reported by the most recent wait.
    #[must_use]
    pub fn last_os_error(&self) -> Option<i32> {
        self.readiness
            .errors
            .iter()
            .map(|(_, code)| *code)
            .find(|code| *code != 0)
    }

    /// Watch `fd` with `interest`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the backend rejects the descriptor.
    pub fn watch(&mut self, fd: RawFd, interest: Interest) -> Result<()> {
        self.poller
            .watch(fd, interest)
            .map_err(|e| Error::Transport(format!("Failed to watch descriptor {fd}: {e}")))
    }

    /// Stop watching `fd` for `interest`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the backend fails to update.
    pub fn unwatch(&mut self, fd: RawFd, interest: Interest) -> Result<()> {
        self.poller
            .unwatch(fd, interest)
            .map_err(|e| Error::Transport(format!("Failed to unwatch descriptor {fd}: {e}")))
    }

    /// Wait until `fd` becomes writable, failing first if it reports an
    /// exceptional condition.
    ///
    /// The write/exception interest is removed again before returning.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if nothing happens within `timeout`
    /// - [`Error::Transport`] if the descriptor reports an error
    pub fn wait_writable(&mut self, fd: RawFd, timeout: Option<Duration>) -> Result<()> {
        let interest = Interest::WRITE | Interest::EXCEPTION;
        self.watch(fd, interest)?;
        let outcome = self.wait(fd, timeout, "connect", |r| r.is_writable(fd));
        self.unwatch(fd, interest)?;
        outcome
    }

    /// Wait until `fd` becomes readable.
    ///
    /// `fd` must already be watched for read interest.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if nothing happens within `timeout`
    /// - [`Error::Transport`] if the descriptor reports an error
    pub fn wait_readable(&mut self, fd: RawFd, timeout: Option<Duration>) -> Result<()> {
        self.wait(fd, timeout, "read", |r| r.is_readable(fd))
    }

    fn wait(
        &mut self,
        fd: RawFd,
        timeout: Option<Duration>,
        what: &'static str,
        ready: impl Fn(&Readiness) -> bool,
    ) -> Result<()> {
        let count = self
            .poller
            .poll(&mut self.readiness, timeout)
            .map_err(|e| Error::Transport(format!("Readiness wait failed: {e}")))?;
        trace!(fd, count, what, "readiness wait returned");

        if count == 0 {
            return Err(Error::Timeout(what));
        }
        if self.readiness.is_exceptional(fd) {
            let code = self.readiness.error_for(fd).unwrap_or(0);
            return Err(Error::Transport(format!(
                "Descriptor {fd} reported an error: {}",
                io::Error::from_raw_os_error(code)
            )));
        }
        if !ready(&self.readiness) {
            return Err(Error::Transport(format!(
                "Descriptor {fd} not ready for {what}"
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("watched", &self.poller.len())
            .field("readiness", &self.readiness)
            .finish()
    }
}

/// Convert an optional timeout into `poll(2)` milliseconds, rounding up.
pub(crate) fn timeout_millis(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            let ms = d.as_nanos().div_ceil(1_000_000);
            libc::c_int::try_from(ms).unwrap_or(libc::c_int::MAX)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interest_flags() {
        let interest = Interest::READ | Interest::EXCEPTION;
        assert!(interest.is_read());
        assert!(!interest.is_write());
        assert!(interest.is_exception());
        assert!(interest.remove(Interest::READ | Interest::EXCEPTION).is_empty());
        assert_eq!(Interest::default(), Interest::NONE);
    }

    #[test]
    fn test_record_error_wins() {
        let mut readiness = Readiness::new();
        readiness.record(7, libc::ECONNREFUSED, true, true, false);
        assert!(readiness.is_exceptional(7));
        assert!(!readiness.is_readable(7));
        assert!(!readiness.is_writable(7));
        assert_eq!(readiness.error_for(7), Some(libc::ECONNREFUSED));
    }

    #[test]
    fn test_record_clean() {
        let mut readiness = Readiness::new();
        readiness.record(3, 0, true, false, false);
        readiness.record(4, 0, false, true, false);
        assert_eq!(readiness.read, vec![3]);
        assert_eq!(readiness.write, vec![4]);
        assert!(readiness.exception.is_empty());
        assert_eq!(readiness.errors, vec![(3, 0), (4, 0)]);

        readiness.clear();
        assert!(readiness.is_empty());
        assert!(readiness.errors.is_empty());
    }

    #[test]
    fn test_timeout_millis() {
        assert_eq!(timeout_millis(None), -1);
        assert_eq!(timeout_millis(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_millis(Some(Duration::from_micros(1))), 1);
        assert_eq!(timeout_millis(Some(Duration::from_secs(2))), 2000);
        assert_eq!(
            timeout_millis(Some(Duration::from_secs(u64::MAX))),
            libc::c_int::MAX
        );
    }
}
