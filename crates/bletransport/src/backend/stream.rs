//! Byte-stream socket backend
//!
//! Connects to a controller exported over TCP (`host:port`) or a Unix-domain
//! stream socket (`unix:/path` or an absolute path), as used by emulators and
//! HCI proxies.

use crate::backend::fd::FdLink;
use crate::backend::Link;
use crate::error::{Result, TransportError};
use log::{debug, info};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::io::IntoRawFd;
use std::os::unix::net::UnixStream;
use std::time::Duration;

/// A stream socket connection to an H4 controller
pub struct StreamSocket {
    link: FdLink,
    peer: String,
}

enum Address<'a> {
    Unix(&'a str),
    Tcp(&'a str),
}

fn parse_address(address: &str) -> Address<'_> {
    if let Some(path) = address.strip_prefix("unix:") {
        Address::Unix(path)
    } else if address.starts_with('/') {
        Address::Unix(address)
    } else {
        Address::Tcp(address)
    }
}

impl StreamSocket {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

    /// Connect to `address`, waiting at most `timeout`
    ///
    /// Later reads and writes give up after [`DEFAULT_TIMEOUT`](Self::DEFAULT_TIMEOUT).
    pub fn connect(address: &str, timeout: Duration) -> Result<Self> {
        Self::connect_with_io_timeout(address, timeout, Self::DEFAULT_TIMEOUT)
    }

    /// Connect to `address` with separate connect and read/write timeouts
    pub fn connect_with_io_timeout(
        address: &str,
        timeout: Duration,
        io_timeout: Duration,
    ) -> Result<Self> {
        if timeout.is_zero() || io_timeout.is_zero() {
            return Err(TransportError::Configuration(
                "stream socket timeouts must be non-zero".into(),
            ));
        }

        let fd = match parse_address(address) {
            Address::Unix(path) => {
                debug!("connecting to unix socket {}", path);
                UnixStream::connect(path)?.into_raw_fd()
            }
            Address::Tcp(target) => {
                debug!("connecting to tcp {}", target);
                let mut last_err = None;
                let mut stream = None;
                for addr in target.to_socket_addrs()? {
                    match TcpStream::connect_timeout(&addr, timeout) {
                        Ok(s) => {
                            stream = Some(s);
                            break;
                        }
                        Err(e) => last_err = Some(e),
                    }
                }
                let stream = match (stream, last_err) {
                    (Some(s), _) => s,
                    (None, Some(e)) => return Err(TransportError::Io(e)),
                    (None, None) => {
                        return Err(TransportError::Configuration(format!(
                            "{} resolved to no addresses",
                            target
                        )))
                    }
                };
                stream.set_nodelay(true)?;
                stream.into_raw_fd()
            }
        };

        info!("connected to {}", address);

        Ok(StreamSocket {
            link: FdLink::new("stream-socket", fd, io_timeout)?,
            peer: address.to_string(),
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

impl Link for StreamSocket {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.link.read(buf)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        self.link.write(buf)
    }

    fn close(&self) -> Result<()> {
        self.link.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HandshakeOptions;
    use crate::h4::reset_and_wait_idle;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_parse_address() {
        assert!(matches!(parse_address("unix:/tmp/hci.sock"), Address::Unix("/tmp/hci.sock")));
        assert!(matches!(parse_address("/run/hci"), Address::Unix("/run/hci")));
        assert!(matches!(parse_address("127.0.0.1:9000"), Address::Tcp("127.0.0.1:9000")));
    }

    #[test]
    fn test_tcp_read_write_and_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4];
            conn.read_exact(&mut buf).unwrap();
            conn.write_all(&[0x04, 0x0E, 0x00]).unwrap();
            buf
        });

        let socket = StreamSocket::connect(&addr, Duration::from_secs(2)).unwrap();
        assert_eq!(socket.write(&[0x01, 0x03, 0x0C, 0x00]).unwrap(), 4);

        let mut buf = [0u8; 16];
        let mut got = Vec::new();
        while got.len() < 3 {
            let n = socket.read(&mut buf).unwrap();
            got.extend_from_slice(&buf[..n]);
        }
        assert_eq!(got, vec![0x04, 0x0E, 0x00]);
        assert_eq!(server.join().unwrap(), [0x01, 0x03, 0x0C, 0x00]);

        // Server side dropped
        assert!(matches!(socket.read(&mut buf), Err(TransportError::EndOfStream)));
    }

    #[test]
    fn test_read_times_out_on_quiet_link() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let socket =
            StreamSocket::connect_with_io_timeout(&addr, Duration::from_secs(2), Duration::from_millis(50))
                .unwrap();
        let _conn = listener.accept().unwrap();

        let mut buf = [0u8; 16];
        assert!(matches!(socket.read(&mut buf), Err(TransportError::LinkTimeout)));
    }

    #[test]
    fn test_read_timeout_independent_of_connect_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let socket = StreamSocket::connect(&addr, Duration::from_secs(4)).unwrap();
        let _conn = listener.accept().unwrap();

        let started = Instant::now();
        let mut buf = [0u8; 16];
        assert!(matches!(socket.read(&mut buf), Err(TransportError::LinkTimeout)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_handshake_on_silent_peer_stays_within_bound() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let socket = StreamSocket::connect(&addr, Duration::from_secs(4)).unwrap();
        let _conn = listener.accept().unwrap();

        let options = HandshakeOptions::default();
        let started = Instant::now();
        reset_and_wait_idle(&socket, &options).unwrap();
        assert!(started.elapsed() < options.overall_timeout + Duration::from_millis(500));
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        assert!(matches!(
            StreamSocket::connect("127.0.0.1:9", Duration::ZERO),
            Err(TransportError::Configuration(_))
        ));
        assert!(matches!(
            StreamSocket::connect_with_io_timeout("127.0.0.1:9", Duration::from_secs(1), Duration::ZERO),
            Err(TransportError::Configuration(_))
        ));
    }

    #[test]
    fn test_close_unblocks_reader() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let socket = Arc::new(StreamSocket::connect(&addr, Duration::from_secs(10)).unwrap());
        let _conn = listener.accept().unwrap();

        let reader = {
            let socket = Arc::clone(&socket);
            thread::spawn(move || {
                let mut buf = [0u8; 16];
                let started = Instant::now();
                let result = socket.read(&mut buf);
                (result.map_err(|e| e.to_string()), started.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(100));
        socket.close().unwrap();

        let (result, elapsed) = reader.join().unwrap();
        // Cancelled mid-read, or closed before the read began
        assert!(result == Ok(0) || result == Err(TransportError::LinkClosed.to_string()));
        assert!(elapsed < Duration::from_secs(5));

        let mut buf = [0u8; 4];
        assert!(matches!(socket.read(&mut buf), Err(TransportError::LinkClosed)));
        // Second close is a no-op
        socket.close().unwrap();
    }
}
