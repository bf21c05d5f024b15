//! Reset/idle handshake
//!
//! Controllers may hold events from a previous session in their buffers. A
//! reset followed by draining until the link falls silent gives the framer a
//! clean packet boundary to start from.

use crate::backend::{write_all, Link};
use crate::config::HandshakeOptions;
use crate::error::{Result, TransportError};
use crate::hci::HciCommand;
use log::{debug, trace};
use std::time::Instant;

/// Issue HCI Reset and discard inbound bytes until the link is quiet
///
/// The link counts as quiet once reads have timed out for at least
/// `quiet_period` since the last byte arrived, and that quiet period must
/// complete before `overall_timeout` runs out. End of stream is always an
/// error here. Fails with [`TransportError::ResetTimeout`] otherwise, even
/// when a slow read only returns after the deadline; the caller owns
/// closing the link.
pub fn reset_and_wait_idle<L: Link + ?Sized>(link: &L, options: &HandshakeOptions) -> Result<()> {
    let started = Instant::now();
    let deadline = started + options.overall_timeout;
    let reset = HciCommand::Reset.to_packet()?;

    debug!("h4: sending reset");
    write_all(link, &reset)?;

    let mut buf = [0u8; 2048];
    let mut last_activity = Instant::now();
    let mut discarded = 0usize;

    while Instant::now() < deadline {
        match link.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                trace!("h4: discarding {}", hex::encode(&buf[..n]));
                discarded += n;
                last_activity = Instant::now();
            }
            Err(TransportError::LinkTimeout) => {
                let quiet_at = last_activity + options.quiet_period;
                if Instant::now() >= quiet_at {
                    if quiet_at > deadline {
                        break;
                    }
                    debug!(
                        "h4: link idle after {:?}, {} bytes discarded",
                        started.elapsed(),
                        discarded
                    );
                    return Ok(());
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(TransportError::ResetTimeout(options.overall_timeout))
}
