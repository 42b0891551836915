//! Plain terminal traffic: typed bytes queued for the device, received
//! bytes rendered locally.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::thread;
use std::time::Duration;

use crate::transport::SerialLink;

/// Most keystrokes that may sit waiting for the wire. Typing past this
/// while the line is stalled rings the bell and drops the keystroke.
const OUTBOUND_CAPACITY: usize = 1024;

/// Byte queue and inbound renderer for interactive console traffic.
///
/// Outbound bytes leave one per writable-readiness event, so a transfer in
/// progress or a stalled line simply leaves typed bytes queued here until
/// the console owns the output again.
pub struct ConsoleRelay {
    outbound: VecDeque<u8>,
    render_delay: Duration,
}

impl ConsoleRelay {
    pub fn new() -> ConsoleRelay {
        ConsoleRelay {
            outbound: VecDeque::with_capacity(OUTBOUND_CAPACITY),
            render_delay: Duration::from_millis(10),
        }
    }

    /// Queue one typed byte for the device. When the queue is full the
    /// byte is dropped and the local bell rung instead.
    pub fn push_key(&mut self, byte: u8, display: &mut dyn Write) -> io::Result<()> {
        if self.outbound.len() >= OUTBOUND_CAPACITY {
            display.write_all(&[0x07])?;
            display.flush()?;
            return Ok(());
        }
        self.outbound.push_back(byte);
        Ok(())
    }

    pub fn wants_write(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Send the head of the queue, if the link will take it. A refused
    /// byte stays queued for the next writable event.
    pub fn on_writable<L: SerialLink + ?Sized>(&mut self, link: &mut L) -> io::Result<()> {
        if let Some(&byte) = self.outbound.front() {
            if link.try_send(byte)? {
                self.outbound.pop_front();
            }
        }
        Ok(())
    }

    /// Render one device byte on the local display. Printable characters
    /// and line endings pass through verbatim; everything else becomes a
    /// `<xx>` hex escape. The short delay bounds the local display rate
    /// when the device floods the line.
    pub fn render_inbound(&self, byte: u8, display: &mut dyn Write) -> io::Result<()> {
        if byte.is_ascii_graphic() || byte == b' ' || byte == b'\r' || byte == b'\n' {
            display.write_all(&[byte])?;
        } else {
            write!(display, "<{:02x}>", byte)?;
        }
        display.flush()?;
        thread::sleep(self.render_delay);
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
