//! H4 transport: receive pump and transmit path over one link
//!
//! After the handshake two background threads own the link. The receive
//! pump is its only reader and feeds the framer; the transmit thread is its
//! only writer and drains a bounded FIFO one packet at a time. Bounded
//! queues are the hand-off points in both directions, and every blocking
//! point also watches a shutdown channel that is disconnected on close.

use crate::backend::{write_all, Link};
use crate::config::{QueueFullPolicy, TransportOptions};
use crate::error::{Result, TransportError};
use crate::h4::framer::H4Framer;
use crate::h4::reset::reset_and_wait_idle;
use crate::hci::HciPacket;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use crossbeam::select;
use log::{debug, error, info, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct TxRequest {
    bytes: Vec<u8>,
    done: Sender<Result<usize>>,
}

/// State shared between the handle and its threads
struct Shared {
    link: Arc<dyn Link>,
    shutdown: Mutex<Option<Sender<()>>>,
    stop_reason: Mutex<Option<TransportError>>,
}

impl Shared {
    /// Disconnect the shutdown channel, waking every waiter
    fn signal_shutdown(&self) {
        self.shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn set_stop_reason(&self, reason: TransportError) {
        let mut slot = self.stop_reason.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(reason);
        }
    }

    /// Error for queue operations once the pump has stopped
    ///
    /// End of stream is reported every time, anything else once.
    fn terminal_error(&self) -> TransportError {
        let mut slot = self.stop_reason.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.take() {
            Some(TransportError::EndOfStream) => {
                *slot = Some(TransportError::EndOfStream);
                TransportError::EndOfStream
            }
            Some(reason) => reason,
            None => TransportError::LinkClosed,
        }
    }
}

fn shutting_down(shutdown: &Receiver<()>) -> bool {
    matches!(shutdown.try_recv(), Err(TryRecvError::Disconnected))
}

/// A running H4 transport
///
/// Built on an open [`Link`]; owns it until [`close`](Self::close) or drop.
pub struct H4Transport {
    shared: Arc<Shared>,
    rx: Receiver<HciPacket>,
    tx: Sender<TxRequest>,
    shutdown_rx: Receiver<()>,
    pump_done: Receiver<()>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    tx_full: QueueFullPolicy,
}

impl H4Transport {
    /// Run the reset/idle handshake on `link`, then start the pump and writer
    ///
    /// The link is closed if the handshake or thread start-up fails.
    pub fn open(link: Arc<dyn Link>, options: TransportOptions) -> Result<Self> {
        if let Err(e) = reset_and_wait_idle(&*link, &options.handshake) {
            warn!("h4: handshake failed: {}", e);
            if let Err(close_err) = link.close() {
                warn!("h4: closing link after failed handshake: {}", close_err);
            }
            return Err(e);
        }

        Self::start(link, options)
    }

    /// Start the pump and writer on a link that needs no handshake
    pub fn start(link: Arc<dyn Link>, options: TransportOptions) -> Result<Self> {
        let (rx_tx, rx) = channel::bounded(options.rx_queue_capacity);
        let (tx, tx_rx) = channel::bounded::<TxRequest>(options.tx_queue_capacity);
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);
        let (pump_done_tx, pump_done) = channel::bounded::<()>(0);

        let shared = Arc::new(Shared {
            link,
            shutdown: Mutex::new(Some(shutdown_tx)),
            stop_reason: Mutex::new(None),
        });

        let pump = ReceivePump {
            shared: Arc::clone(&shared),
            framer: H4Framer::with_policy(options.desync),
            packets: rx_tx,
            shutdown: shutdown_rx.clone(),
            eof_is_error: options.eof_is_error,
            buffer_size: options.read_buffer_size.max(1),
            _done: pump_done_tx,
        };

        let mut threads = Vec::with_capacity(2);
        let spawned = thread::Builder::new()
            .name("h4-rx".to_string())
            .spawn(move || pump.run())
            .and_then(|handle| {
                threads.push(handle);
                let writer_shared = Arc::clone(&shared);
                let writer_shutdown = shutdown_rx.clone();
                thread::Builder::new()
                    .name("h4-tx".to_string())
                    .spawn(move || transmit_loop(writer_shared, tx_rx, writer_shutdown))
            });

        match spawned {
            Ok(handle) => threads.push(handle),
            Err(e) => {
                shared.signal_shutdown();
                let _ = shared.link.close();
                for handle in threads {
                    let _ = handle.join();
                }
                return Err(TransportError::Io(e));
            }
        }

        info!("h4: transport running");

        Ok(H4Transport {
            shared,
            rx,
            tx,
            shutdown_rx,
            pump_done,
            threads: Mutex::new(threads),
            closed: AtomicBool::new(false),
            tx_full: options.tx_full,
        })
    }

    /// Wait for the next inbound packet
    pub fn recv(&self) -> Result<HciPacket> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::LinkClosed);
        }
        match self.rx.recv() {
            Ok(packet) => Ok(packet),
            Err(_) => Err(self.shared.terminal_error()),
        }
    }

    /// Wait up to `timeout` for the next inbound packet
    pub fn recv_timeout(&self, timeout: Duration) -> Result<HciPacket> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::LinkClosed);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(packet) => Ok(packet),
            Err(RecvTimeoutError::Timeout) => Err(TransportError::LinkTimeout),
            Err(RecvTimeoutError::Disconnected) => Err(self.shared.terminal_error()),
        }
    }

    /// Queue `packet` for transmission and wait for its write to finish
    ///
    /// Returns the number of bytes written to the link.
    pub fn send(&self, packet: &HciPacket) -> Result<usize> {
        self.submit(packet.to_bytes()?)
    }

    /// Queue raw H4 bytes, which must form exactly one complete packet
    pub fn send_bytes(&self, bytes: &[u8]) -> Result<usize> {
        HciPacket::from_bytes(bytes)?;
        self.submit(bytes.to_vec())
    }

    fn submit(&self, bytes: Vec<u8>) -> Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::LinkClosed);
        }

        let (done, completion) = channel::bounded(1);
        let request = TxRequest { bytes, done };

        match self.tx_full {
            QueueFullPolicy::Block => {
                select! {
                    send(self.tx, request) -> res => res.map_err(|_| TransportError::LinkClosed)?,
                    recv(self.shutdown_rx) -> _ => return Err(TransportError::LinkClosed),
                }
            }
            QueueFullPolicy::Fail => match self.tx.try_send(request) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => return Err(TransportError::QueueFull),
                Err(TrySendError::Disconnected(_)) => return Err(TransportError::LinkClosed),
            },
        }

        select! {
            recv(completion) -> result => result.unwrap_or(Err(TransportError::LinkClosed)),
            recv(self.shutdown_rx) -> _ => Err(TransportError::LinkClosed),
        }
    }

    /// True while the receive pump is reading the link
    pub fn is_running(&self) -> bool {
        matches!(self.pump_done.try_recv(), Err(TryRecvError::Empty))
    }

    /// Stop both threads and close the link
    ///
    /// Pending and later queue operations fail with `LinkClosed`. Calling
    /// close again is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        debug!("h4: closing transport");
        self.shared.signal_shutdown();
        let result = self.shared.link.close();

        let threads = std::mem::take(&mut *self.threads.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in threads {
            if handle.join().is_err() {
                error!("h4: worker thread panicked");
            }
        }

        info!("h4: transport closed");
        result
    }
}

impl Link for H4Transport {
    /// Copy the next inbound packet, in H4 wire form, into `buf`
    ///
    /// A packet that does not fit is dropped and reported as
    /// `BufferTooSmall`.
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let packet = self.recv()?;
        let bytes = packet.to_bytes()?;
        if bytes.len() > buf.len() {
            warn!("h4: dropping {} byte packet, buffer holds {}", bytes.len(), buf.len());
            return Err(TransportError::BufferTooSmall {
                needed: bytes.len(),
                available: buf.len(),
            });
        }
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        self.send_bytes(buf)
    }

    fn close(&self) -> Result<()> {
        H4Transport::close(self)
    }
}

impl Drop for H4Transport {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("h4: error closing transport on drop: {}", e);
        }
    }
}

/// Sole reader of the link for the transport's lifetime
struct ReceivePump {
    shared: Arc<Shared>,
    framer: H4Framer,
    packets: Sender<HciPacket>,
    shutdown: Receiver<()>,
    eof_is_error: bool,
    buffer_size: usize,
    // Disconnects the done channel when the pump exits
    _done: Sender<()>,
}

impl ReceivePump {
    fn run(mut self) {
        let mut buf = vec![0u8; self.buffer_size];

        let failure = 'pump: loop {
            if shutting_down(&self.shutdown) {
                break None;
            }

            let n = match self.shared.link.read(&mut buf) {
                Ok(0) => continue,
                Ok(n) => n,
                Err(TransportError::LinkTimeout) => continue,
                Err(_) if shutting_down(&self.shutdown) => break None,
                Err(TransportError::EndOfStream) if !self.eof_is_error => {
                    info!("h4: link reached end of stream");
                    self.shared.set_stop_reason(TransportError::EndOfStream);
                    break None;
                }
                Err(e) => break Some(e),
            };

            let mut chunk = &buf[..n];
            loop {
                match self.framer.advance(&mut chunk) {
                    Ok(Some(packet)) => {
                        trace!("h4: rx {:?}", packet);
                        select! {
                            send(self.packets, packet) -> res => {
                                if res.is_err() {
                                    break 'pump None;
                                }
                            },
                            recv(self.shutdown) -> _ => break 'pump None,
                        }
                    }
                    Ok(None) => break,
                    Err(e) => break 'pump Some(e),
                }
            }
        };

        if !self.framer.is_idle() {
            if let Some((packet_type, consumed, expected)) = self.framer.pending() {
                debug!(
                    "h4: discarding partial {:?} packet ({}/{} bytes)",
                    packet_type, consumed, expected
                );
            }
        }

        if let Some(e) = failure {
            error!("h4: receive pump stopped: {}", e);
            self.shared.set_stop_reason(e);
            self.shared.signal_shutdown();
            if let Err(close_err) = self.shared.link.close() {
                warn!("h4: closing link after failure: {}", close_err);
            }
        } else {
            debug!("h4: receive pump stopped");
        }
    }
}

/// Sole writer of the link: one write in flight, strict FIFO
fn transmit_loop(shared: Arc<Shared>, requests: Receiver<TxRequest>, shutdown: Receiver<()>) {
    loop {
        select! {
            recv(requests) -> request => match request {
                Ok(request) => {
                    trace!("h4: tx {}", hex::encode(&request.bytes));
                    let result = write_all(&*shared.link, &request.bytes);
                    if let Err(e) = &result {
                        warn!("h4: write failed: {}", e);
                    }
                    let _ = request.done.send(result);
                }
                Err(_) => break,
            },
            recv(shutdown) -> _ => break,
        }
    }
    debug!("h4: transmit path stopped");
}
