//! The board's proprietary single-file patch upload.
//!
//! The whole exchange is one-way until the very end: a `'y'` marker wakes
//! the loader, a 3-byte preamble `[SOH|STX, 0x00, 0xFF]` announces the
//! payload size class, the raw file bytes follow, and then the uploader
//! waits. The first byte the device sends back - whatever its value - is
//! the end-of-session signal, answered with a pair of CAN bytes before the
//! line goes back to the console.
//!
//! Progress is echoed locally: one `'P'` per preamble byte, one `'.'` per
//! payload byte, `'X'` per abort byte.

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use log::{debug, info};

use super::{control, Step, TransferError};
use crate::transport::SerialLink;

/// Largest patch file the loader accepts.
pub const PATCH_LIMIT: usize = 1024;

/// Pacing delays after each outbound byte, per phase. The loader has no
/// flow control on its patch path; these keep its input buffer ahead of us.
#[derive(Debug, Clone, Copy)]
struct Pacing {
    marker: Duration,
    preamble: Duration,
    payload: Duration,
    abort: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Pacing {
            marker: Duration::from_millis(50),
            preamble: Duration::from_millis(25),
            payload: Duration::from_millis(25),
            abort: Duration::from_millis(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Emit the `'y'` wake-up marker.
    SendMarker,
    /// Emit the 3 preamble bytes, one per writable event.
    SendPreamble,
    /// Emit the file buffer, one byte per writable event.
    SendPayload,
    /// Silent; left only by an inbound byte from the device.
    WaitResponse,
    /// Emit CAN bytes until the session is torn down.
    Abort,
}

/// State machine for one patch upload session.
pub struct PatchUploader {
    data: Vec<u8>,
    preamble: [u8; 3],
    cursor: usize,
    abort_sent: u32,
    cans: u32,
    phase: Phase,
    pacing: Pacing,
}

impl PatchUploader {
    /// Load the patch file and stage the upload. The file must be a
    /// regular, non-empty file of at most [`PATCH_LIMIT`] bytes; anything
    /// else is refused here, before any protocol state exists.
    pub fn new(path: &Path) -> Result<PatchUploader, TransferError> {
        let meta = fs::metadata(path)?;
        if !meta.is_file() {
            return Err(TransferError::NotRegularFile(path.to_owned()));
        }
        if meta.len() == 0 {
            return Err(TransferError::EmptyFile(path.to_owned()));
        }
        if meta.len() > PATCH_LIMIT as u64 {
            return Err(TransferError::FileTooLarge {
                path: path.to_owned(),
                size: meta.len(),
                limit: PATCH_LIMIT,
            });
        }

        let data = fs::read(path)?;
        let marker = if data.len() <= 128 {
            control::SOH
        } else {
            control::STX
        };
        debug!("patch staged: {} bytes, marker {:#04x}", data.len(), marker);

        Ok(PatchUploader {
            data,
            preamble: [marker, 0x00, 0xff],
            cursor: 0,
            abort_sent: 0,
            cans: 0,
            phase: Phase::SendMarker,
            pacing: Pacing::default(),
        })
    }

    /// Number of payload bytes staged for upload.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Whether the uploader has a byte ready for the wire.
    pub fn wants_write(&self) -> bool {
        !matches!(self.phase, Phase::WaitResponse)
    }

    /// Feed one inbound device byte.
    ///
    /// Two consecutive CAN bytes end the session from any phase. Any byte
    /// received while waiting for the device's response - regardless of its
    /// value - is the end-of-session signal and starts the abort exchange.
    pub fn on_byte(&mut self, byte: u8) -> Step {
        if byte == control::CAN {
            self.cans += 1;
            if self.cans >= 2 {
                info!("patch upload cancelled by device");
                return Step::Finished;
            }
        } else {
            self.cans = 0;
        }

        if self.phase == Phase::WaitResponse {
            self.phase = Phase::Abort;
            self.abort_sent = 0;
        }
        Step::Active
    }

    /// Emit at most one byte for this writable-readiness event. `echo` is
    /// the local display, fed one progress character per byte sent.
    pub fn on_writable<L: SerialLink + ?Sized>(
        &mut self,
        link: &mut L,
        echo: &mut dyn Write,
    ) -> io::Result<Step> {
        match self.phase {
            Phase::SendMarker => {
                if link.try_send(b'y')? {
                    self.phase = Phase::SendPreamble;
                    self.cursor = 0;
                    thread::sleep(self.pacing.marker);
                }
            }
            Phase::SendPreamble => {
                if link.try_send(self.preamble[self.cursor])? {
                    echo.write_all(b"P")?;
                    echo.flush()?;
                    thread::sleep(self.pacing.preamble);
                    self.cursor += 1;
                    if self.cursor == self.preamble.len() {
                        self.phase = Phase::SendPayload;
                        self.cursor = 0;
                    }
                }
            }
            Phase::SendPayload => {
                if link.try_send(self.data[self.cursor])? {
                    echo.write_all(b".")?;
                    echo.flush()?;
                    thread::sleep(self.pacing.payload);
                    self.cursor += 1;
                    if self.cursor == self.data.len() {
                        self.phase = Phase::WaitResponse;
                    }
                }
            }
            Phase::WaitResponse => {}
            Phase::Abort => {
                if link.try_send(control::CAN)? {
                    echo.write_all(b"X")?;
                    echo.flush()?;
                    thread::sleep(self.pacing.abort);
                    self.abort_sent += 1;
                    if self.abort_sent > 1 {
                        return Ok(Step::Finished);
                    }
                }
            }
        }
        Ok(Step::Active)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
