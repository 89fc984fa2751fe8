//! Event-queue readiness backend.
//!
//! Registrations are held by the OS queue (epoll/kqueue via `polling`) in
//! level-triggered mode, so a descriptor that stays readable keeps being
//! reported, matching the scan backend.

use std::collections::HashMap;
use std::io;
use std::num::NonZeroUsize;
use std::os::fd::{BorrowedFd, RawFd};
use std::time::{Duration, Instant};

use polling::{Event, Events, PollMode};
use tracing::trace;

use super::{Interest, Poller, Readiness, pending_error_code};

/// Readiness backend backed by the OS event queue.
pub struct QueuePoller {
    poller: polling::Poller,
    interests: HashMap<RawFd, Interest>,
    events: Events,
}

impl QueuePoller {
    /// Create a poller.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the event queue cannot be created.
    pub fn new() -> io::Result<Self> {
        Self::with_capacity(16)
    }

    /// Create a poller able to collect `capacity` events per wait.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the event queue cannot be created.
    pub fn with_capacity(capacity: usize) -> io::Result<Self> {
        let capacity = NonZeroUsize::MIN.saturating_add(capacity.saturating_sub(1));
        Ok(Self {
            poller: polling::Poller::new()?,
            interests: HashMap::with_capacity(capacity.get()),
            events: Events::with_capacity(capacity),
        })
    }

    fn event_for(fd: RawFd, interest: Interest) -> Event {
        let key = fd as usize;
        match (interest.is_read(), interest.is_write()) {
            (true, true) => Event::all(key),
            (true, false) => Event::readable(key),
            (false, true) => Event::writable(key),
            // Errors and hang-ups are reported even with no flags set.
            (false, false) => Event::none(key),
        }
    }

    fn register(&mut self, fd: RawFd, interest: Interest, existing: bool) -> io::Result<()> {
        let event = Self::event_for(fd, interest);
        if existing {
            // SAFETY: `fd` was registered by this poller and callers keep it
            // open while it is watched.
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            match self.poller.modify_with_mode(borrowed, event, PollMode::Level) {
                Ok(()) => return Ok(()),
                // Closed and reopened behind our back: the kernel already
                // dropped the old registration.
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
        // SAFETY: the descriptor is removed from the queue by `unwatch`
        // before callers close it.
        unsafe { self.poller.add_with_mode(fd, event, PollMode::Level) }
    }
}

impl Poller for QueuePoller {
    fn watch(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        if fd < 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        let existing = self.interests.get(&fd).copied();
        let merged = existing.unwrap_or_default() | interest;
        if existing == Some(merged) {
            return Ok(());
        }
        self.register(fd, merged, existing.is_some())?;
        self.interests.insert(fd, merged);
        Ok(())
    }

    fn unwatch(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        let Some(existing) = self.interests.get(&fd).copied() else {
            return Ok(());
        };
        let remaining = existing.remove(interest);
        if remaining == existing {
            return Ok(());
        }
        if remaining.is_empty() {
            self.interests.remove(&fd);
            // SAFETY: see `register`.
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            match self.poller.delete(borrowed) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err),
            }
        } else {
            self.register(fd, remaining, true)?;
            self.interests.insert(fd, remaining);
            Ok(())
        }
    }

    fn contains(&self, fd: RawFd, interest: Interest) -> bool {
        self.interests
            .get(&fd)
            .is_some_and(|watched| !interest.is_empty() && watched.add(interest) == *watched)
    }

    fn len(&self) -> usize {
        self.interests.len()
    }

    fn poll(&mut self, result: &mut Readiness, timeout: Option<Duration>) -> io::Result<usize> {
        result.clear();
        self.events.clear();

        if self.interests.is_empty() && timeout.is_none() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no descriptors watched and no timeout given",
            ));
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let n = loop {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            match self.poller.wait(&mut self.events, remaining) {
                Ok(n) => break n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => self.events.clear(),
                Err(err) => return Err(err),
            }
        };
        trace!(events = n, "event queue returned");

        let mut reported = 0;
        for event in self.events.iter() {
            let Ok(fd) = RawFd::try_from(event.key) else {
                continue;
            };
            let Some(interest) = self.interests.get(&fd).copied() else {
                continue;
            };

            let error = pending_error_code(fd);
            let flagged = event.is_err().unwrap_or(false);
            let readable = interest.is_read() && event.readable;
            let writable = interest.is_write() && event.writable;
            // Hang-up or error on a descriptor nobody reads from.
            let unexpected = !readable && !writable && (event.readable || event.writable);

            result.record(
                fd,
                error,
                readable,
                writable,
                flagged || (interest.is_exception() && unexpected),
            );
            reported += 1;
        }
        Ok(reported)
    }
}

impl std::fmt::Debug for QueuePoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuePoller")
            .field("interests", &self.interests)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_watch_merges_interest() {
        let (_a, b) = UnixStream::pair().unwrap();
        let fd = b.as_raw_fd();
        let mut poller = QueuePoller::new().unwrap();

        poller.watch(fd, Interest::READ).unwrap();
        poller.watch(fd, Interest::EXCEPTION).unwrap();
        assert!(poller.contains(fd, Interest::READ | Interest::EXCEPTION));
        assert_eq!(poller.len(), 1);

        poller.unwatch(fd, Interest::READ).unwrap();
        assert!(!poller.contains(fd, Interest::READ));
        assert!(poller.contains(fd, Interest::EXCEPTION));

        poller.unwatch(fd, Interest::EXCEPTION).unwrap();
        assert!(poller.is_empty());
    }

    #[test]
    fn test_unwatch_unknown_is_noop() {
        let mut poller = QueuePoller::new().unwrap();
        assert!(poller.unwatch(42, Interest::READ).is_ok());
    }

    #[test]
    fn test_poll_reports_readable_and_writable() {
        let (mut a, b) = UnixStream::pair().unwrap();
        let fd = b.as_raw_fd();
        let mut poller = QueuePoller::new().unwrap();
        let mut readiness = Readiness::new();

        poller.watch(fd, Interest::READ).unwrap();
        let n = poller
            .poll(&mut readiness, Some(Duration::from_millis(10)))
            .unwrap();
        assert_eq!(n, 0);

        a.write_all(b"ping").unwrap();
        poller.watch(fd, Interest::WRITE).unwrap();
        let n = poller
            .poll(&mut readiness, Some(Duration::from_secs(1)))
            .unwrap();
        assert_eq!(n, 1);
        assert!(readiness.is_readable(fd));
        assert!(readiness.is_writable(fd));
        assert!(readiness.exception.is_empty());
    }

    #[test]
    fn test_level_triggered() {
        let (mut a, b) = UnixStream::pair().unwrap();
        let fd = b.as_raw_fd();
        let mut poller = QueuePoller::new().unwrap();
        let mut readiness = Readiness::new();

        poller.watch(fd, Interest::READ).unwrap();
        a.write_all(b"x").unwrap();
        for _ in 0..2 {
            let n = poller
                .poll(&mut readiness, Some(Duration::from_secs(1)))
                .unwrap();
            assert_eq!(n, 1);
            assert!(readiness.is_readable(fd));
        }
    }
}
