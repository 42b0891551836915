//! The byte-channel seam between the transfer engine and the serial port.
//!
//! The engine never talks to `serialport` directly; it sees the line as a
//! [`SerialLink`]: try to put one byte on the wire, try to take one byte
//! off it. A byte the link does not accept is simply offered again on the
//! next writable-readiness event, so transient write stalls need no retry
//! logic anywhere in the protocol machines.

use std::io::{self, Read, Write};

/// A readable/writable byte channel to the device.
pub trait SerialLink {
    /// Offer one byte to the channel. `Ok(false)` means the channel did not
    /// accept it right now (output buffer full, write timed out); the caller
    /// keeps the byte and offers it again later. `Err` means the channel is
    /// gone.
    fn try_send(&mut self, byte: u8) -> io::Result<bool>;

    /// Take one byte off the channel without blocking. `Ok(None)` means
    /// nothing is currently available; `Err` means end-of-channel.
    fn recv_byte(&mut self) -> io::Result<Option<u8>>;
}

/// [`SerialLink`] over an open `serialport` handle.
pub struct PortLink {
    port: Box<dyn serialport::SerialPort>,
}

impl PortLink {
    pub fn new(port: Box<dyn serialport::SerialPort>) -> Self {
        PortLink { port }
    }
}

impl SerialLink for PortLink {
    fn try_send(&mut self, byte: u8) -> io::Result<bool> {
        match self.port.write(&[byte]) {
            Ok(1) => Ok(true),
            Ok(_) => Ok(false),
            Err(ref e)
                if e.kind() == io::ErrorKind::TimedOut
                    || e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn recv_byte(&mut self) -> io::Result<Option<u8>> {
        let available = self
            .port
            .bytes_to_read()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        if available == 0 {
            return Ok(None);
        }
        let mut buf = [0u8; 1];
        match self.port.read(&mut buf) {
            Ok(1) => Ok(Some(buf[0])),
            Ok(_) => Ok(None),
            Err(ref e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// =============================================================================
// Test doubles
// =============================================================================

/// A scripted in-memory link for driving the protocol machines in tests:
/// everything sent is logged to `wire`, and inbound bytes are queued ahead
/// of time. Setting `accept_writes` to `false` simulates a stalled channel.
#[cfg(test)]
pub(crate) struct MockLink {
    pub wire: Vec<u8>,
    pub inbound: std::collections::VecDeque<u8>,
    pub accept_writes: bool,
}

#[cfg(test)]
impl MockLink {
    pub fn new() -> Self {
        MockLink {
            wire: Vec::new(),
            inbound: std::collections::VecDeque::new(),
            accept_writes: true,
        }
    }
}

#[cfg(test)]
impl SerialLink for MockLink {
    fn try_send(&mut self, byte: u8) -> io::Result<bool> {
        if !self.accept_writes {
            return Ok(false);
        }
        self.wire.push(byte);
        Ok(true)
    }

    fn recv_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(self.inbound.pop_front())
    }
}
