//! The `scomm` transfer engine.
//!
//! Two mutually exclusive upload protocols share the serial line with the
//! interactive console:
//!
//! * [`ymodem::YmodemSender`] — a YMODEM-derived multi-packet transfer
//!   framed in 133-byte [`packet::Packet`]s.
//! * [`patch::PatchUploader`] — the board's simpler single-file patch
//!   protocol (marker, 3-byte preamble, raw payload).
//!
//! Which producer currently owns the line is tracked by [`Session`]; the
//! multiplexer refuses to enter a transfer unless the session is idle and
//! both protocols hand the line back through [`Step::Finished`].

pub mod crc;
pub mod packet;
pub mod patch;
pub mod ymodem;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Control bytes shared by both upload protocols.
pub mod control {
    /// Start of Header: packet carries a 128-byte payload.
    pub const SOH: u8 = 0x01;
    /// Start of Text: marker for payloads larger than 128 bytes.
    pub const STX: u8 = 0x02;
    /// End of Transmission.
    pub const EOT: u8 = 0x04;
    /// Acknowledge.
    pub const ACK: u8 = 0x06;
    /// Negative acknowledge: resend the packet in flight.
    pub const NAK: u8 = 0x15;
    /// Cancel: two in a row abort the transfer.
    pub const CAN: u8 = 0x18;
    /// Receiver poll character requesting (re)transmission.
    pub const POLL: u8 = b'C';
}

/// Outcome of feeding one event into a protocol state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The transfer still owns the line.
    Active,
    /// The transfer is over (completed or cancelled); the session returns
    /// to idle and the line goes back to the console.
    Finished,
}

/// What currently owns the serial output.
///
/// Exactly one producer owns the line at any time. The console owns it
/// while `Idle`; entering a transfer is refused unless idle.
pub enum Session {
    Idle,
    Patch(patch::PatchUploader),
    Ymodem(ymodem::YmodemSender),
}

impl Session {
    pub fn is_idle(&self) -> bool {
        matches!(self, Session::Idle)
    }

    /// Whether the active transfer has bytes ready for the wire. The idle
    /// console answers for itself.
    pub fn wants_write(&self) -> bool {
        match self {
            Session::Idle => false,
            Session::Patch(p) => p.wants_write(),
            Session::Ymodem(y) => y.wants_write(),
        }
    }
}

/// Errors raised by the transfer engine.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("{0} is not a regular file")]
    NotRegularFile(PathBuf),

    #[error("{0} is empty - nothing to transmit")]
    EmptyFile(PathBuf),

    #[error("{path} is {size} bytes - the patch limit is {limit}")]
    FileTooLarge {
        path: PathBuf,
        size: u64,
        limit: usize,
    },

    #[error("bad packet type byte {0:#04x}")]
    BadPacketType(u8),

    #[error("sequence complement mismatch: seqno {seqno:#04x}, complement {seqcpl:#04x}")]
    BadComplement { seqno: u8, seqcpl: u8 },

    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    CrcMismatch { expected: u16, actual: u16 },

    #[error(transparent)]
    Io(#[from] io::Error),
}
