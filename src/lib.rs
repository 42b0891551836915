//! Scomm is an interactive serial terminal for embedded boards that can also
//! push files to the device over the same line. It behaves like a plain
//! terminal until asked to do otherwise: keystrokes go to the device, and
//! everything the device prints comes back to the local display. Hitting `~`
//! opens a command prompt from which a file can be uploaded either with the
//! board's proprietary patch protocol (`p <file>`) or with a YMODEM-derived
//! transfer (`y <file>`).
//!
//! The transfer engine is built around three cooperating pieces:
//!
//! * Two byte-driven protocol **state machines**
//!   ([`transfer::patch::PatchUploader`] and
//!   [`transfer::ymodem::YmodemSender`]). Each is an explicit enum of
//!   phases with pattern-matched transitions; inbound device bytes drive
//!   the transitions and each writable opportunity produces at most one
//!   outbound byte, so a slow receiver is never overrun.
//! * A [`ConsoleRelay`] that queues typed bytes for the device and renders
//!   device output locally, escaping non-printable bytes.
//! * A single-threaded [`Multiplexer`] that owns the serial line and
//!   decides, per readiness event, which of the three producers (console,
//!   patch, ymodem) gets to put the next byte on the wire.
//!
//! Exactly one producer owns the line at any time. Transfers are entered
//! only from the idle console state and hand the line back on completion,
//! cancellation (two consecutive CAN bytes from the device) or error.
//!
//! The serial port itself is consumed through the narrow [`SerialLink`]
//! trait, which keeps the protocol machines independent of the `serialport`
//! crate and lets the tests drive them with a scripted link.

mod console;
mod multiplexer;
mod settings;
pub mod transfer;
mod transport;
mod utils;

pub use console::ConsoleRelay;
pub use multiplexer::{CancelToken, CommandPrompt, Multiplexer};
pub use settings::{Settings, SettingsBuilder};
pub use transport::{PortLink, SerialLink};
pub use utils::{open_and_setup_port, LinePrompt, RawModeGuard};
