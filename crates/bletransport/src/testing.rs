//! In-memory link for exercising the H4 layer without hardware

use crate::backend::Link;
use crate::error::{Result, TransportError};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
struct State {
    inbound: VecDeque<Vec<u8>>,
    written: Vec<Vec<u8>>,
    writes_held: bool,
    closed: bool,
}

/// Scripted controller
///
/// Reads return queued chunks, time out when none are queued and return
/// `Ok(0)` when a concurrent close interrupts them.
pub(crate) struct FakeLink {
    state: Mutex<State>,
    changed: Condvar,
    timeout: Duration,
    loopback: bool,
    chatter: Option<Vec<u8>>,
    eof_when_empty: AtomicBool,
    fail_writes: AtomicUsize,
    close_calls: AtomicUsize,
}

impl FakeLink {
    pub(crate) fn new(timeout: Duration) -> Self {
        FakeLink {
            state: Mutex::new(State::default()),
            changed: Condvar::new(),
            timeout,
            loopback: false,
            chatter: None,
            eof_when_empty: AtomicBool::new(false),
            fail_writes: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
        }
    }

    /// Every write is queued back as inbound data
    pub(crate) fn loopback(mut self) -> Self {
        self.loopback = true;
        self
    }

    /// Every read returns `bytes` at once; the link is never quiet
    pub(crate) fn chatter(mut self, bytes: &[u8]) -> Self {
        self.chatter = Some(bytes.to_vec());
        self
    }

    pub(crate) fn push_inbound(&self, bytes: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.inbound.push_back(bytes.to_vec());
        self.changed.notify_all();
    }

    /// Once queued chunks run out, reads report end of stream
    pub(crate) fn set_eof_when_empty(&self) {
        self.eof_when_empty.store(true, Ordering::SeqCst);
        self.changed.notify_all();
    }

    pub(crate) fn fail_next_writes(&self, count: usize) {
        self.fail_writes.store(count, Ordering::SeqCst);
    }

    pub(crate) fn hold_writes(&self) {
        self.state.lock().unwrap().writes_held = true;
    }

    pub(crate) fn release_writes(&self) {
        self.state.lock().unwrap().writes_held = false;
        self.changed.notify_all();
    }

    pub(crate) fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().written.clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl Link for FakeLink {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let deadline = Instant::now() + self.timeout;
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(TransportError::LinkClosed);
        }

        if let Some(chatter) = &self.chatter {
            drop(state);
            std::thread::sleep(Duration::from_millis(5));
            let n = chatter.len().min(buf.len());
            buf[..n].copy_from_slice(&chatter[..n]);
            return Ok(n);
        }

        loop {
            if state.closed {
                return Ok(0);
            }
            if let Some(mut chunk) = state.inbound.pop_front() {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    state.inbound.push_front(chunk.split_off(n));
                }
                return Ok(n);
            }
            if self.eof_when_empty.load(Ordering::SeqCst) {
                return Err(TransportError::EndOfStream);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::LinkTimeout);
            }
            state = self.changed.wait_timeout(state, remaining).unwrap().0;
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(TransportError::LinkClosed);
        }
        while state.writes_held {
            state = self.changed.wait(state).unwrap();
            if state.closed {
                return Ok(0);
            }
        }

        let pending_failures = self.fail_writes.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.fail_writes.store(pending_failures - 1, Ordering::SeqCst);
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "injected write failure",
            )));
        }

        state.written.push(buf.to_vec());
        if self.loopback {
            state.inbound.push_back(buf.to_vec());
            self.changed.notify_all();
        }
        Ok(buf.len())
    }

    fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        self.changed.notify_all();
        Ok(())
    }
}
