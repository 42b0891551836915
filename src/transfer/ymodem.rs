//! YMODEM-derived file transfer, sender side.
//!
//! The receiver drives the exchange: it polls with `'C'`, acknowledges each
//! 133-byte packet with ACK, and asks for a retransmit with NAK. The sender
//! walks a linear sequence of phases,
//!
//! ```text
//! WaitC -> Metadata -> MetaAck -> WaitStart -> FileData <-> DataAck
//!       -> Eot -> EotAck -> FinalC -> Terminating -> FinalAck -> done
//! ```
//!
//! with two retry back-edges: NAK re-sends the packet in flight from byte
//! 0, and `'C'` in `MetaAck` re-sends the metadata packet. Two consecutive
//! CAN bytes abort the whole transfer from any phase.
//!
//! The output side is deliberately slow: one byte of the in-flight packet
//! per writable-readiness event, plus a short pacing delay, so the pace of
//! the line - not the size of a packet - bounds the receiver's input
//! buffer.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use hexplay::HexViewBuilder;
use log::{debug, info, log_enabled, Level::Debug};

use super::packet::{Packet, PACKET_LEN, PAYLOAD_LEN};
use super::{control, Step, TransferError};
use crate::transport::SerialLink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting for the receiver's opening `'C'`.
    WaitC,
    /// Sending the metadata packet.
    Metadata,
    /// Waiting for the metadata ACK (`'C'` re-sends it).
    MetaAck,
    /// Waiting for the `'C'` that starts the file data.
    WaitStart,
    /// Sending the file-data packet in flight.
    FileData,
    /// Waiting for the data ACK (NAK re-sends the same packet).
    DataAck,
    /// Sending the one-byte EOT.
    Eot,
    /// Waiting for the EOT ACK (NAK re-sends EOT).
    EotAck,
    /// Waiting for the `'C'` that asks for the next file; there is none.
    FinalC,
    /// Sending the zero-payload terminating packet.
    Terminating,
    /// Waiting for the final ACK (NAK re-sends the terminating packet).
    FinalAck,
}

/// State machine for one YMODEM send session. Owns the source file for the
/// session's lifetime; dropping the sender closes it.
pub struct YmodemSender {
    input: File,
    wire: [u8; PACKET_LEN],
    cursor: usize,
    seqno: u8,
    exhausted: bool,
    cans: u32,
    phase: Phase,
    delay: Duration,
}

impl YmodemSender {
    /// Open the source file and stage the metadata packet. The packet's
    /// payload is the path exactly as the user typed it; the board expects
    /// no size field after the name.
    pub fn new(path: &Path) -> Result<YmodemSender, TransferError> {
        let input = File::open(path)?;
        let mut sender = YmodemSender {
            input,
            wire: [0u8; PACKET_LEN],
            cursor: 0,
            seqno: 0,
            exhausted: false,
            cans: 0,
            phase: Phase::WaitC,
            delay: Duration::from_millis(15),
        };
        sender.stage(Packet::metadata(&path.to_string_lossy()));
        debug!(
            "metadata packet crc = {:02x}{:02x}",
            sender.wire[PACKET_LEN - 2],
            sender.wire[PACKET_LEN - 1]
        );
        Ok(sender)
    }

    /// Whether the sender has a byte ready for the wire.
    pub fn wants_write(&self) -> bool {
        matches!(
            self.phase,
            Phase::Metadata | Phase::FileData | Phase::Eot | Phase::Terminating
        )
    }

    /// Feed one inbound device byte and take the corresponding transition.
    ///
    /// CAN bytes are handled before anything else and never reach the phase
    /// switch: two in a row abort the transfer, any other byte resets the
    /// counter.
    pub fn on_byte(&mut self, byte: u8) -> io::Result<Step> {
        if byte == control::CAN {
            self.cans += 1;
            if self.cans >= 2 {
                info!("ymodem transfer cancelled by device");
                return Ok(Step::Finished);
            }
            return Ok(Step::Active);
        }
        self.cans = 0;

        match self.phase {
            Phase::WaitC => {
                if byte == control::POLL {
                    self.phase = Phase::Metadata;
                }
            }
            Phase::MetaAck => {
                if byte == control::ACK {
                    self.phase = Phase::WaitStart;
                } else if byte == control::POLL {
                    // Receiver wants the metadata again.
                    self.phase = Phase::Metadata;
                }
            }
            Phase::WaitStart => {
                if byte == control::POLL {
                    self.phase = self.stage_next()?;
                }
            }
            Phase::DataAck => {
                if byte == control::ACK {
                    self.phase = self.stage_next()?;
                } else if byte == control::NAK {
                    // Same packet again, from byte 0.
                    self.cursor = 0;
                    self.phase = Phase::FileData;
                }
            }
            Phase::EotAck => {
                if byte == control::ACK {
                    self.phase = Phase::FinalC;
                } else if byte == control::NAK {
                    self.phase = Phase::Eot;
                }
            }
            Phase::FinalC => {
                if byte == control::POLL {
                    self.phase = Phase::Terminating;
                }
            }
            Phase::FinalAck => {
                if byte == control::ACK {
                    info!("ymodem transfer complete");
                    return Ok(Step::Finished);
                } else if byte == control::NAK {
                    self.phase = Phase::Terminating;
                }
            }
            // Output phases ignore stray inbound bytes.
            Phase::Metadata | Phase::FileData | Phase::Eot | Phase::Terminating => {}
        }
        Ok(Step::Active)
    }

    /// Emit at most one byte for this writable-readiness event.
    pub fn on_writable<L: SerialLink + ?Sized>(&mut self, link: &mut L) -> io::Result<()> {
        match self.phase {
            Phase::Metadata | Phase::FileData | Phase::Terminating => {
                if link.try_send(self.wire[self.cursor])? {
                    thread::sleep(self.delay);
                    self.cursor += 1;
                    if self.cursor == PACKET_LEN {
                        // Reset to zero in case of retransmit.
                        self.cursor = 0;
                        self.phase = match self.phase {
                            Phase::Metadata => Phase::MetaAck,
                            Phase::FileData => Phase::DataAck,
                            Phase::Terminating => Phase::FinalAck,
                            _ => unreachable!(),
                        };
                    }
                }
            }
            Phase::Eot => {
                if link.try_send(control::EOT)? {
                    thread::sleep(self.delay);
                    self.phase = Phase::EotAck;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Stage the next packet in flight: the next 128-byte file chunk, or -
    /// once the file is exhausted - the zero-payload terminal packet, which
    /// stays in flight through the EOT exchange and is what `Terminating`
    /// finally puts on the wire.
    fn stage_next(&mut self) -> io::Result<Phase> {
        if self.exhausted {
            self.stage(Packet::terminal());
            return Ok(Phase::Eot);
        }
        let mut chunk = [0u8; PAYLOAD_LEN];
        let n = self.read_chunk(&mut chunk)?;
        if n == 0 {
            self.stage(Packet::terminal());
            return Ok(Phase::Eot);
        }
        if n < PAYLOAD_LEN {
            self.exhausted = true;
        }
        self.seqno = self.seqno.wrapping_add(1);
        self.stage(Packet::data(self.seqno, &chunk[..n]));
        Ok(Phase::FileData)
    }

    fn stage(&mut self, packet: Packet) {
        self.wire = packet.encode();
        self.cursor = 0;
        if log_enabled!(Debug) {
            let _ = Self::dump_packet(&self.wire, &mut io::stdout());
        }
    }

    /// Dump a staged packet as a hex table. The terminal is in raw mode
    /// while a transfer runs, so every line needs an explicit CR.
    fn dump_packet(wire: &[u8], out: &mut dyn Write) -> io::Result<()> {
        let view = HexViewBuilder::new(wire)
            .address_offset(0)
            .row_width(16)
            .finish();
        for line in view.to_string().lines() {
            write!(out, "{}\r\n", line)?;
        }
        out.flush()
    }

    fn read_chunk(&mut self, chunk: &mut [u8; PAYLOAD_LEN]) -> io::Result<usize> {
        let mut n = 0;
        while n < PAYLOAD_LEN {
            match self.input.read(&mut chunk[n..]) {
                Ok(0) => break,
                Ok(m) => n += m,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(n)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::crc::crc16;
    use crate::transport::MockLink;
    use std::fs;
    use std::path::PathBuf;

    fn fixture(name: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn sender_for(path: &Path) -> YmodemSender {
        let mut sender = YmodemSender::new(path).unwrap();
        sender.delay = Duration::ZERO;
        sender
    }

    /// Drive writable events until the sender is waiting on input again,
    /// returning the bytes that went on the wire.
    fn drain(sender: &mut YmodemSender, link: &mut MockLink) -> Vec<u8> {
        let before = link.wire.len();
        while sender.wants_write() {
            sender.on_writable(link).unwrap();
        }
        link.wire[before..].to_vec()
    }

    fn feed(sender: &mut YmodemSender, byte: u8) -> Step {
        sender.on_byte(byte).unwrap()
    }

    fn assert_packet(raw: &[u8], seqno: u8, payload: &[u8]) {
        assert_eq!(raw.len(), PACKET_LEN);
        assert_eq!(raw[0], control::SOH);
        assert_eq!(raw[1], seqno);
        assert_eq!(raw[2], !seqno);
        let mut expected = [0u8; PAYLOAD_LEN];
        expected[..payload.len()].copy_from_slice(payload);
        assert_eq!(&raw[3..3 + PAYLOAD_LEN], &expected[..]);
        let crc = crc16(&expected);
        assert_eq!(raw[PACKET_LEN - 2], (crc >> 8) as u8);
        assert_eq!(raw[PACKET_LEN - 1], (crc & 0xff) as u8);
    }

    #[test]
    fn three_hundred_byte_file_end_to_end() {
        let content: Vec<u8> = (0..300).map(|i| (i % 251) as u8).collect();
        let path = fixture("ym_300.bin", &content);
        let mut sender = sender_for(&path);
        let mut link = MockLink::new();

        // Nothing moves until the receiver polls.
        assert!(!sender.wants_write());
        feed(&mut sender, control::POLL);
        let meta = drain(&mut sender, &mut link);
        assert_packet(&meta, 0, path.to_string_lossy().as_bytes());

        feed(&mut sender, control::ACK);
        feed(&mut sender, control::POLL);
        let p1 = drain(&mut sender, &mut link);
        assert_packet(&p1, 1, &content[..128]);

        feed(&mut sender, control::ACK);
        let p2 = drain(&mut sender, &mut link);
        assert_packet(&p2, 2, &content[128..256]);

        feed(&mut sender, control::ACK);
        let p3 = drain(&mut sender, &mut link);
        assert_packet(&p3, 3, &content[256..300]);

        // 300 bytes -> exactly ceil(300/128) = 3 data packets, then EOT.
        feed(&mut sender, control::ACK);
        let eot = drain(&mut sender, &mut link);
        assert_eq!(eot, vec![control::EOT]);

        feed(&mut sender, control::ACK);
        feed(&mut sender, control::POLL);
        let term = drain(&mut sender, &mut link);
        assert_packet(&term, 0, &[]);

        assert_eq!(feed(&mut sender, control::ACK), Step::Finished);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn exact_multiple_file_sends_no_padding_packet() {
        let content = vec![0x77u8; 256];
        let path = fixture("ym_256.bin", &content);
        let mut sender = sender_for(&path);
        let mut link = MockLink::new();

        feed(&mut sender, control::POLL);
        drain(&mut sender, &mut link);
        feed(&mut sender, control::ACK);
        feed(&mut sender, control::POLL);
        let p1 = drain(&mut sender, &mut link);
        assert_packet(&p1, 1, &content[..128]);
        feed(&mut sender, control::ACK);
        let p2 = drain(&mut sender, &mut link);
        assert_packet(&p2, 2, &content[128..]);

        // The file ended exactly on a packet boundary: the next ACK goes
        // straight to EOT, with no all-zero data packet in between.
        feed(&mut sender, control::ACK);
        let eot = drain(&mut sender, &mut link);
        assert_eq!(eot, vec![control::EOT]);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn empty_file_sends_zero_data_packets() {
        let path = fixture("ym_empty.bin", b"");
        let mut sender = sender_for(&path);
        let mut link = MockLink::new();

        feed(&mut sender, control::POLL);
        drain(&mut sender, &mut link);
        feed(&mut sender, control::ACK);
        feed(&mut sender, control::POLL);
        let out = drain(&mut sender, &mut link);
        assert_eq!(out, vec![control::EOT]);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn nak_retransmits_identical_packet() {
        let content = vec![0x3cu8; 64];
        let path = fixture("ym_nak.bin", &content);
        let mut sender = sender_for(&path);
        let mut link = MockLink::new();

        feed(&mut sender, control::POLL);
        drain(&mut sender, &mut link);
        feed(&mut sender, control::ACK);
        feed(&mut sender, control::POLL);
        let first = drain(&mut sender, &mut link);

        feed(&mut sender, control::NAK);
        let again = drain(&mut sender, &mut link);
        assert_eq!(first, again);
        assert_eq!(again[1], 1);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn poll_in_meta_ack_resends_metadata() {
        let path = fixture("ym_meta_again.bin", b"data");
        let mut sender = sender_for(&path);
        let mut link = MockLink::new();

        feed(&mut sender, control::POLL);
        let meta = drain(&mut sender, &mut link);
        feed(&mut sender, control::POLL);
        let again = drain(&mut sender, &mut link);
        assert_eq!(meta, again);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn nak_resends_eot_and_terminating_packet() {
        let path = fixture("ym_resend_tail.bin", b"tail");
        let mut sender = sender_for(&path);
        let mut link = MockLink::new();

        feed(&mut sender, control::POLL);
        drain(&mut sender, &mut link);
        feed(&mut sender, control::ACK);
        feed(&mut sender, control::POLL);
        drain(&mut sender, &mut link);
        feed(&mut sender, control::ACK);
        assert_eq!(drain(&mut sender, &mut link), vec![control::EOT]);

        feed(&mut sender, control::NAK);
        assert_eq!(drain(&mut sender, &mut link), vec![control::EOT]);

        feed(&mut sender, control::ACK);
        feed(&mut sender, control::POLL);
        let term = drain(&mut sender, &mut link);
        feed(&mut sender, control::NAK);
        let term_again = drain(&mut sender, &mut link);
        assert_eq!(term, term_again);
        assert_eq!(feed(&mut sender, control::ACK), Step::Finished);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn double_can_aborts_from_any_phase() {
        let path = fixture("ym_can.bin", b"abort me");
        let mut sender = sender_for(&path);

        // Still waiting for the opening poll.
        assert_eq!(feed(&mut sender, control::CAN), Step::Active);
        assert_eq!(feed(&mut sender, control::CAN), Step::Finished);

        let mut sender = sender_for(&path);
        let mut link = MockLink::new();
        feed(&mut sender, control::POLL);
        drain(&mut sender, &mut link);
        // Mid-handshake now.
        assert_eq!(feed(&mut sender, control::CAN), Step::Active);
        assert_eq!(feed(&mut sender, control::CAN), Step::Finished);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn interleaved_byte_resets_cancel_counter() {
        let path = fixture("ym_can_reset.bin", b"stay");
        let mut sender = sender_for(&path);

        assert_eq!(feed(&mut sender, control::CAN), Step::Active);
        assert_eq!(feed(&mut sender, 0x00), Step::Active);
        assert_eq!(feed(&mut sender, control::CAN), Step::Active);
        assert_eq!(feed(&mut sender, control::CAN), Step::Finished);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn debug_dump_uses_terminal_line_endings() {
        let wire = Packet::data(1, b"dump").encode();
        let mut out = Vec::new();
        YmodemSender::dump_packet(&wire, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with("\r\n"));
        // No bare line feeds anywhere in the table.
        assert!(!text.replace("\r\n", "").contains('\n'));
    }

    #[test]
    fn seqno_wraps_mod_256() {
        // 33 KiB = 264 packets, enough to wrap the sequence number.
        let content = vec![0xa5u8; 264 * 128];
        let path = fixture("ym_wrap.bin", &content);
        let mut sender = sender_for(&path);
        let mut link = MockLink::new();

        feed(&mut sender, control::POLL);
        drain(&mut sender, &mut link);
        feed(&mut sender, control::ACK);
        feed(&mut sender, control::POLL);

        let mut seqnos = Vec::new();
        loop {
            let out = drain(&mut sender, &mut link);
            if out.len() != PACKET_LEN {
                break;
            }
            seqnos.push(out[1]);
            feed(&mut sender, control::ACK);
        }
        assert_eq!(seqnos.len(), 264);
        assert_eq!(seqnos[254], 255);
        assert_eq!(seqnos[255], 0);
        assert_eq!(seqnos[256], 1);

        fs::remove_file(&path).ok();
    }
}
