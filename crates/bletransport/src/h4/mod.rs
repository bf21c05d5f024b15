//! H4 framing over a byte-stream link
//!
//! This module turns a [`Link`](crate::backend::Link) into a stream of whole
//! HCI packets and serializes outgoing packets back onto it.

pub mod framer;
pub mod reset;
pub mod transport;


pub use framer::H4Framer;
pub use reset::reset_and_wait_idle;
pub use transport::H4Transport;
