//! Bitmap-scan readiness backend.
//!
//! Membership lives in three growable bitmaps, one per interest kind. Every
//! poll walks `0..=max_fd`, builds a `pollfd` array for the members and hands
//! it to `poll(2)`.

use std::io;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use super::{Interest, Poller, Readiness, pending_error_code, timeout_millis};

const WORD_BITS: usize = u64::BITS as usize;

/// Growable descriptor bitmap.
#[derive(Debug, Clone, Default)]
struct FdSet {
    words: Vec<u64>,
}

impl FdSet {
    fn with_capacity(fds: usize) -> Self {
        Self {
            words: Vec::with_capacity(fds.div_ceil(WORD_BITS)),
        }
    }

    fn insert(&mut self, fd: usize) {
        let word = fd / WORD_BITS;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (fd % WORD_BITS);
    }

    fn remove(&mut self, fd: usize) {
        if let Some(word) = self.words.get_mut(fd / WORD_BITS) {
            *word &= !(1u64 << (fd % WORD_BITS));
        }
    }

    fn contains(&self, fd: usize) -> bool {
        self.words
            .get(fd / WORD_BITS)
            .is_some_and(|word| word & (1u64 << (fd % WORD_BITS)) != 0)
    }

    fn highest(&self) -> Option<usize> {
        self.words
            .iter()
            .enumerate()
            .rev()
            .find(|(_, word)| **word != 0)
            .map(|(idx, word)| idx * WORD_BITS + (WORD_BITS - 1 - word.leading_zeros() as usize))
    }
}

/// Readiness backend that scans every watched descriptor on each poll.
#[derive(Debug, Default)]
pub struct ScanPoller {
    read: FdSet,
    write: FdSet,
    exception: FdSet,
    /// Highest member of the union of all sets.
    max_fd: Option<usize>,
    pollfds: Vec<libc::pollfd>,
}

impl ScanPoller {
    /// Create an empty poller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty poller sized for `capacity` descriptors.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            read: FdSet::with_capacity(capacity),
            write: FdSet::with_capacity(capacity),
            exception: FdSet::with_capacity(capacity),
            max_fd: None,
            pollfds: Vec::with_capacity(capacity),
        }
    }

    /// Highest watched descriptor, if any.
    #[must_use]
    pub fn max_fd(&self) -> Option<RawFd> {
        self.max_fd.and_then(|fd| RawFd::try_from(fd).ok())
    }

    fn interest_of(&self, fd: usize) -> Interest {
        let mut interest = Interest::NONE;
        if self.read.contains(fd) {
            interest = interest | Interest::READ;
        }
        if self.write.contains(fd) {
            interest = interest | Interest::WRITE;
        }
        if self.exception.contains(fd) {
            interest = interest | Interest::EXCEPTION;
        }
        interest
    }

    fn recompute_max(&mut self) {
        self.max_fd = [
            self.read.highest(),
            self.write.highest(),
            self.exception.highest(),
        ]
        .into_iter()
        .flatten()
        .max();
    }
}

fn index(fd: RawFd) -> io::Result<usize> {
    usize::try_from(fd).map_err(|_| io::Error::from_raw_os_error(libc::EBADF))
}

impl Poller for ScanPoller {
    fn watch(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        let idx = index(fd)?;
        if interest.is_read() {
            self.read.insert(idx);
        }
        if interest.is_write() {
            self.write.insert(idx);
        }
        if interest.is_exception() {
            self.exception.insert(idx);
        }
        if !interest.is_empty() && self.max_fd.is_none_or(|max| idx > max) {
            self.max_fd = Some(idx);
        }
        Ok(())
    }

    fn unwatch(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        let idx = index(fd)?;
        if interest.is_read() {
            self.read.remove(idx);
        }
        if interest.is_write() {
            self.write.remove(idx);
        }
        if interest.is_exception() {
            self.exception.remove(idx);
        }
        if self.max_fd == Some(idx) && self.interest_of(idx).is_empty() {
            self.recompute_max();
        }
        Ok(())
    }

    fn contains(&self, fd: RawFd, interest: Interest) -> bool {
        let Ok(idx) = index(fd) else {
            return false;
        };
        let watched = self.interest_of(idx);
        !interest.is_empty() && watched.add(interest) == watched
    }

    fn len(&self) -> usize {
        self.max_fd.map_or(0, |max| {
            (0..=max)
                .filter(|fd| !self.interest_of(*fd).is_empty())
                .count()
        })
    }

    fn poll(&mut self, result: &mut Readiness, timeout: Option<Duration>) -> io::Result<usize> {
        result.clear();
        self.pollfds.clear();

        if let Some(max) = self.max_fd {
            for idx in 0..=max {
                let interest = self.interest_of(idx);
                if interest.is_empty() {
                    continue;
                }
                let mut events: libc::c_short = 0;
                if interest.is_read() {
                    events |= libc::POLLIN;
                }
                if interest.is_write() {
                    events |= libc::POLLOUT;
                }
                if interest.is_exception() {
                    events |= libc::POLLPRI;
                }
                self.pollfds.push(libc::pollfd {
                    fd: RawFd::try_from(idx).map_err(|_| io::Error::from_raw_os_error(libc::EBADF))?,
                    events,
                    revents: 0,
                });
            }
        }

        if self.pollfds.is_empty() && timeout.is_none() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no descriptors watched and no timeout given",
            ));
        }

        let nfds = libc::nfds_t::try_from(self.pollfds.len())
            .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
        let deadline = timeout.map(|t| Instant::now() + t);

        let ready = loop {
            // A retry after EINTR only gets what is left of the timeout.
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let millis = timeout_millis(remaining);
            // SAFETY: `pollfds` is a valid, exclusively borrowed array of
            // `nfds` initialised entries for the duration of the call.
            let rc = unsafe { libc::poll(self.pollfds.as_mut_ptr(), nfds, millis) };
            if rc >= 0 {
                break rc;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        };

        if ready == 0 {
            return Ok(0);
        }

        let mut reported = 0;
        for pfd in &self.pollfds {
            if pfd.revents == 0 {
                continue;
            }
            let revents = pfd.revents;
            let readable_interest = pfd.events & libc::POLLIN != 0;

            let mut error = pending_error_code(pfd.fd);
            if error == 0 && revents & libc::POLLNVAL != 0 {
                error = libc::EBADF;
            }
            let hangup = revents & libc::POLLHUP != 0;

            result.record(
                pfd.fd,
                error,
                readable_interest && revents & (libc::POLLIN | libc::POLLHUP) != 0,
                revents & libc::POLLOUT != 0,
                revents & (libc::POLLPRI | libc::POLLERR) != 0 || (hangup && !readable_interest),
            );
            reported += 1;
        }
        Ok(reported)
    }
}
