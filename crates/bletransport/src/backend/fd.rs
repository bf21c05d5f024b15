//! File-descriptor link shared by the socket and serial backends
//!
//! Every blocking operation polls the link descriptor together with an
//! eventfd. `close` signals the eventfd, which wakes any reader or writer
//! suspended in `poll`, and only then releases the descriptors.

use crate::error::{Result, TransportError};
use log::{debug, trace};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

struct Fds {
    link: RawFd,
    wake: RawFd,
}

enum Readiness {
    Link,
    Woken,
}

pub(crate) struct FdLink {
    name: &'static str,
    fds: RwLock<Option<Fds>>,
    closing: AtomicBool,
    timeout: Duration,
}

impl FdLink {
    /// Take ownership of `fd`, switching it to non-blocking mode
    ///
    /// `fd` is closed if the wake descriptor cannot be created.
    pub(crate) fn new(name: &'static str, fd: RawFd, timeout: Duration) -> Result<Self> {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 || unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(TransportError::Io(err));
        }

        let wake = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if wake < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(TransportError::Io(err));
        }

        debug!("{}: link fd {} open (timeout {:?})", name, fd, timeout);

        Ok(FdLink {
            name,
            fds: RwLock::new(Some(Fds { link: fd, wake })),
            closing: AtomicBool::new(false),
            timeout,
        })
    }

    pub(crate) fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let guard = self.fds.read().unwrap_or_else(PoisonError::into_inner);
        let fds = guard.as_ref().ok_or(TransportError::LinkClosed)?;
        let deadline = Instant::now() + self.timeout;

        loop {
            if self.closing.load(Ordering::Acquire) {
                return Ok(0);
            }
            if let Readiness::Woken = self.wait(fds, libc::POLLIN, deadline)? {
                return Ok(0);
            }

            let n = unsafe { libc::read(fds.link, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if n < 0 {
                let err = io::Error::last_os_error();
                if retryable(&err) {
                    continue;
                }
                return Err(TransportError::Io(err));
            }
            if n == 0 && !buf.is_empty() {
                return Err(TransportError::EndOfStream);
            }

            trace!("{}: read {}", self.name, hex::encode(&buf[..n as usize]));
            return Ok(n as usize);
        }
    }

    pub(crate) fn write(&self, buf: &[u8]) -> Result<usize> {
        let guard = self.fds.read().unwrap_or_else(PoisonError::into_inner);
        let fds = guard.as_ref().ok_or(TransportError::LinkClosed)?;
        let deadline = Instant::now() + self.timeout;

        loop {
            if self.closing.load(Ordering::Acquire) {
                return Ok(0);
            }
            if let Readiness::Woken = self.wait(fds, libc::POLLOUT, deadline)? {
                return Ok(0);
            }

            let n = unsafe { libc::write(fds.link, buf.as_ptr() as *const libc::c_void, buf.len()) };
            if n < 0 {
                let err = io::Error::last_os_error();
                if retryable(&err) {
                    continue;
                }
                return Err(TransportError::Io(err));
            }

            trace!("{}: wrote {}", self.name, hex::encode(&buf[..n as usize]));
            return Ok(n as usize);
        }
    }

    pub(crate) fn close(&self) -> Result<()> {
        if self.closing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        {
            let guard = self.fds.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(fds) = guard.as_ref() {
                if let Err(e) = signal_wake(fds.wake) {
                    debug!("{}: wake signal failed, waiters run to their deadline: {}", self.name, e);
                }
            }
        }

        // Suspended operations return once woken, releasing their read guards
        let mut guard = self.fds.write().unwrap_or_else(PoisonError::into_inner);
        match guard.take() {
            Some(fds) => {
                debug!("{}: closing link fd {}", self.name, fds.link);
                let rc = unsafe { libc::close(fds.link) };
                let err = io::Error::last_os_error();
                unsafe { libc::close(fds.wake) };
                if rc < 0 {
                    return Err(TransportError::Io(err));
                }
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn wait(&self, fds: &Fds, events: libc::c_short, deadline: Instant) -> Result<Readiness> {
        let mut pollfds = [
            libc::pollfd {
                fd: fds.link,
                events,
                revents: 0,
            },
            libc::pollfd {
                fd: fds.wake,
                events: libc::POLLIN,
                revents: 0,
            },
        ];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::LinkTimeout);
            }
            // Round up so a sub-millisecond remainder still waits
            let millis = remaining.as_millis().max(1).min(libc::c_int::MAX as u128) as libc::c_int;

            pollfds[0].revents = 0;
            pollfds[1].revents = 0;
            let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, millis) };

            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(TransportError::Io(err));
            }
            if rc == 0 {
                continue;
            }
            if pollfds[1].revents != 0 {
                return Ok(Readiness::Woken);
            }
            // Readable, writable, hangup or error: the following syscall reports which
            return Ok(Readiness::Link);
        }
    }
}

/// Make `wake` readable, waking every `poll` that watches it
fn signal_wake(wake: RawFd) -> io::Result<()> {
    let one: u64 = 1;
    let n = unsafe { libc::write(wake, &one as *const u64 as *const libc::c_void, 8) };
    if n == 8 {
        Ok(())
    } else if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Err(io::Error::new(io::ErrorKind::WriteZero, "short eventfd write"))
    }
}

fn retryable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

impl Drop for FdLink {
    fn drop(&mut self) {
        let fds = self.fds.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(fds) = fds.take() {
            unsafe {
                libc::close(fds.link);
                libc::close(fds.wake);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_wake_reports_failure() {
        assert!(signal_wake(-1).is_err());
    }

    #[test]
    fn test_signal_wake_makes_eventfd_readable() {
        let wake = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        assert!(wake >= 0);

        signal_wake(wake).unwrap();
        let mut pollfd = libc::pollfd {
            fd: wake,
            events: libc::POLLIN,
            revents: 0,
        };
        assert_eq!(unsafe { libc::poll(&mut pollfd, 1, 0) }, 1);

        unsafe { libc::close(wake) };
    }
}
