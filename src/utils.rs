//! Terminal and serial-port plumbing around the main loop.

mod keyboard;
mod ports;

pub(crate) use keyboard::map_key;
pub use keyboard::{LinePrompt, RawModeGuard};
pub use ports::open_and_setup_port;
