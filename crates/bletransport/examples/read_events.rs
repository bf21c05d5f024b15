//! Example: Reading HCI events
//!
//! Opens kernel adapter 0, asks for every event and prints what arrives
//! for five seconds.

use bletransport::{
    open, HciCommand, HciPacket, TransportError, TransportOptions, TransportSelection,
};
use std::time::{Duration, Instant};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = TransportSelection::new().kernel_socket(0).build()?;
    let transport = open(&config, TransportOptions::default())?;

    transport.send(&HciCommand::SetEventMask { event_mask: u64::MAX }.into())?;
    transport.send(&HciCommand::Reset.into())?;

    println!("Reading HCI events for 5 seconds...");
    let started = Instant::now();
    while started.elapsed() < Duration::from_secs(5) {
        match transport.recv_timeout(Duration::from_millis(100)) {
            Ok(packet @ HciPacket::Event { .. }) => {
                if let Some(event) = packet.as_event() {
                    println!(
                        "event {:#04x} status {:#04x}: {}",
                        event.event_code,
                        event.status(),
                        hex::encode(&event.parameters)
                    );
                }
            }
            Ok(packet) => println!("{:?}", packet),
            Err(TransportError::LinkTimeout) => continue,
            Err(e) => {
                eprintln!("Transport stopped: {}", e);
                break;
            }
        }
    }

    transport.close()?;
    Ok(())
}
