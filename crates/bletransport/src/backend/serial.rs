//! Serial (UART) backend
//!
//! Opens a tty in raw mode for H4 traffic. Controllers on a UART expect 8N1
//! framing and, by default, RTS/CTS hardware flow control.

use crate::backend::fd::FdLink;
use crate::backend::Link;
use crate::error::{Result, TransportError};
use log::{debug, info};
use std::ffi::CString;
use std::io;
use std::time::Duration;

/// Serial port settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialOptions {
    pub path: String,
    pub baud_rate: u32,
    /// RTS/CTS hardware flow control
    pub flow_control: bool,
    pub read_timeout: Duration,
}

impl Default for SerialOptions {
    fn default() -> Self {
        Self {
            path: "/dev/ttyACM0".to_string(),
            baud_rate: 1_000_000,
            flow_control: true,
            read_timeout: Duration::from_millis(100),
        }
    }
}

fn baud_constant(baud_rate: u32) -> Option<libc::speed_t> {
    let speed = match baud_rate {
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        460800 => libc::B460800,
        500000 => libc::B500000,
        921600 => libc::B921600,
        1000000 => libc::B1000000,
        1500000 => libc::B1500000,
        2000000 => libc::B2000000,
        3000000 => libc::B3000000,
        _ => return None,
    };
    Some(speed)
}

/// An H4 UART link
pub struct SerialPort {
    link: FdLink,
    path: String,
}

impl SerialPort {
    pub fn open(options: &SerialOptions) -> Result<Self> {
        let speed = baud_constant(options.baud_rate).ok_or_else(|| {
            TransportError::Configuration(format!("unsupported baud rate {}", options.baud_rate))
        })?;
        let path = CString::new(options.path.as_str()).map_err(|_| {
            TransportError::Configuration(format!("invalid serial path {:?}", options.path))
        })?;

        let fd = unsafe {
            libc::open(
                path.as_ptr(),
                libc::O_RDWR | libc::O_NOCTTY | libc::O_CLOEXEC | libc::O_NONBLOCK,
            )
        };
        if fd < 0 {
            return Err(TransportError::Io(io::Error::last_os_error()));
        }

        if let Err(e) = configure(fd, speed, options.flow_control) {
            unsafe { libc::close(fd) };
            return Err(TransportError::Io(e));
        }

        info!(
            "{}: opened at {} baud (flow control {})",
            options.path, options.baud_rate, options.flow_control
        );

        Ok(SerialPort {
            link: FdLink::new("serial", fd, options.read_timeout)?,
            path: options.path.clone(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

fn configure(fd: libc::c_int, speed: libc::speed_t, flow_control: bool) -> io::Result<()> {
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };
    if unsafe { libc::tcgetattr(fd, &mut tio) } < 0 {
        return Err(io::Error::last_os_error());
    }

    unsafe { libc::cfmakeraw(&mut tio) };

    // 8N1
    tio.c_cflag &= !(libc::CSIZE | libc::PARENB | libc::CSTOPB);
    tio.c_cflag |= libc::CS8 | libc::CLOCAL | libc::CREAD;
    if flow_control {
        tio.c_cflag |= libc::CRTSCTS;
    } else {
        tio.c_cflag &= !libc::CRTSCTS;
    }

    // Reads are bounded by poll, never by the tty driver
    tio.c_cc[libc::VMIN] = 0;
    tio.c_cc[libc::VTIME] = 0;

    if unsafe { libc::cfsetispeed(&mut tio, speed) } < 0
        || unsafe { libc::cfsetospeed(&mut tio, speed) } < 0
    {
        return Err(io::Error::last_os_error());
    }

    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } < 0 {
        return Err(io::Error::last_os_error());
    }

    // Drop anything buffered before we took the port
    if unsafe { libc::tcflush(fd, libc::TCIOFLUSH) } < 0 {
        return Err(io::Error::last_os_error());
    }

    debug!("serial fd {} configured", fd);
    Ok(())
}

impl Link for SerialPort {
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
