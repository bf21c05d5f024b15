//! Transport configuration
//!
//! [`TransportConfig`] names exactly one physical link. [`TransportSelection`]
//! collects per-variant settings the way option setters do and validates that
//! exactly one was chosen. [`TransportOptions`] tunes the H4 layer on top.

use crate::backend::SerialOptions;
use crate::error::{Result, TransportError};
use std::time::Duration;

/// Which physical link to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    /// Kernel HCI user channel on adapter `hciN`
    KernelSocket { adapter_id: u16 },
    /// TCP `host:port` or Unix `unix:/path`
    StreamSocket { address: String, timeout: Duration },
    Serial(SerialOptions),
    Usb { vendor_id: u16, product_id: u16 },
}

impl TransportConfig {
    /// Short name for log lines
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::KernelSocket { .. } => "kernel-socket",
            TransportConfig::StreamSocket { .. } => "stream-socket",
            TransportConfig::Serial(_) => "serial",
            TransportConfig::Usb { .. } => "usb",
        }
    }
}

/// Builder that accepts at most one transport variant
#[derive(Debug, Clone, Default)]
pub struct TransportSelection {
    kernel_socket: Option<u16>,
    stream_socket: Option<(String, Duration)>,
    serial: Option<SerialOptions>,
    usb: Option<(u16, u16)>,
}

impl TransportSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kernel_socket(mut self, adapter_id: u16) -> Self {
        self.kernel_socket = Some(adapter_id);
        self
    }

    pub fn stream_socket(mut self, address: impl Into<String>, timeout: Duration) -> Self {
        self.stream_socket = Some((address.into(), timeout));
        self
    }

    /// Select a UART; `None` keeps the default baud rate
    pub fn serial(mut self, path: impl Into<String>, baud_rate: Option<u32>) -> Self {
        let defaults = SerialOptions::default();
        self.serial = Some(SerialOptions {
            path: path.into(),
            baud_rate: baud_rate.unwrap_or(defaults.baud_rate),
            ..defaults
        });
        self
    }

    pub fn serial_options(mut self, options: SerialOptions) -> Self {
        self.serial = Some(options);
        self
    }

    pub fn usb(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.usb = Some((vendor_id, product_id));
        self
    }

    /// Resolve the selection into a single [`TransportConfig`]
    pub fn build(self) -> Result<TransportConfig> {
        let mut chosen = Vec::with_capacity(1);

        if let Some(adapter_id) = self.kernel_socket {
            chosen.push(TransportConfig::KernelSocket { adapter_id });
        }
        if let Some((address, timeout)) = self.stream_socket {
            chosen.push(TransportConfig::StreamSocket { address, timeout });
        }
        if let Some(options) = self.serial {
            chosen.push(TransportConfig::Serial(options));
        }
        if let Some((vendor_id, product_id)) = self.usb {
            chosen.push(TransportConfig::Usb {
                vendor_id,
                product_id,
            });
        }

        match chosen.len() {
            0 => Err(TransportError::Configuration(
                "no transport selected".into(),
            )),
            1 => Ok(chosen.remove(0)),
            _ => {
                let kinds: Vec<_> = chosen.iter().map(TransportConfig::kind).collect();
                Err(TransportError::Configuration(format!(
                    "exactly one transport must be selected, got {}",
                    kinds.join(", ")
                )))
            }
        }
    }
}

/// What `send` does when the transmit queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueFullPolicy {
    /// Wait for a free slot or for the transport to close
    #[default]
    Block,
    /// Fail immediately with `QueueFull`
    Fail,
}

/// What the framer does with a byte that is not a packet type indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DesyncPolicy {
    /// Report a protocol error and stop the transport
    #[default]
    Fail,
    /// Drop the byte and keep looking for a type indicator
    SkipByte,
}

/// Reset/idle handshake bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeOptions {
    /// How long the link must stay silent to count as idle
    pub quiet_period: Duration,
    /// Upper bound on the whole handshake
    pub overall_timeout: Duration,
}

impl Default for HandshakeOptions {
    fn default() -> Self {
        Self {
            quiet_period: Duration::from_millis(500),
            overall_timeout: Duration::from_secs(2),
        }
    }
}

/// Settings for the H4 layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    pub rx_queue_capacity: usize,
    pub tx_queue_capacity: usize,
    /// Size of the buffer each backend read fills
    pub read_buffer_size: usize,
    /// Treat end of stream in steady state as fatal rather than a disconnect
    pub eof_is_error: bool,
    pub tx_full: QueueFullPolicy,
    pub desync: DesyncPolicy,
    pub handshake: HandshakeOptions,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            rx_queue_capacity: 64,
            tx_queue_capacity: 64,
            read_buffer_size: 2048,
            eof_is_error: true,
            tx_full: QueueFullPolicy::Block,
            desync: DesyncPolicy::Fail,
            handshake: HandshakeOptions::default(),
        }
    }
}
