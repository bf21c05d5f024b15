//! Example: Opening a transport
//!
//! Usage: `open_transport [kernel <id> | tcp <host:port> | unix <path> | serial <path> [baud] | usb <vid> <pid>]`
//!
//! Vendor and product ids are hexadecimal.

use bletransport::{open, TransportOptions, TransportSelection};
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let timeout = Duration::from_secs(2);

    let selection = match args.as_slice() {
        [] => TransportSelection::new().kernel_socket(0),
        ["kernel", id] => TransportSelection::new().kernel_socket(id.parse()?),
        ["tcp", address] => TransportSelection::new().stream_socket(*address, timeout),
        ["unix", path] => TransportSelection::new().stream_socket(format!("unix:{}", path), timeout),
        ["serial", path] => TransportSelection::new().serial(*path, None),
        ["serial", path, baud] => TransportSelection::new().serial(*path, Some(baud.parse()?)),
        ["usb", vid, pid] => TransportSelection::new().usb(
            u16::from_str_radix(vid.trim_start_matches("0x"), 16)?,
            u16::from_str_radix(pid.trim_start_matches("0x"), 16)?,
        ),
        _ => return Err("unrecognised arguments".into()),
    };

    let config = selection.build()?;
    println!("Opening {} transport...", config.kind());

    match open(&config, TransportOptions::default()) {
        Ok(transport) => {
            println!("Controller reset and idle, transport running");
            transport.close()?;
            println!("Transport closed");
        }
        Err(e) => {
            eprintln!("Failed to open transport: {}", e);
            eprintln!("Kernel sockets need CAP_NET_ADMIN and an adapter that is not in use;");
            eprintln!("serial and USB devices need read/write access to the device node.");
        }
    }

    Ok(())
}
