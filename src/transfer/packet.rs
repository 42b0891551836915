//! The fixed 133-byte wire packet shared by both upload protocols.
//!
//! ```text
//! +------+-------+--------+----------------+--------+
//! | type | seqno | seqcpl | payload (128)  | CRC16  |
//! +------+-------+--------+----------------+--------+
//! |  1   |   1   |   1    |      128       |   2    |
//! +------+-------+--------+----------------+--------+
//! ```
//!
//! `seqcpl` is always the bitwise complement of `seqno`, and the CRC covers
//! exactly the 128 payload bytes (big-endian on the wire, never the header).
//! The layout is produced by explicit serialization into a fixed-size byte
//! buffer; nothing here depends on host struct layout.

use super::control;
use super::crc::crc16;
use super::TransferError;

/// Payload bytes carried by every packet, zero-padded when short.
pub const PAYLOAD_LEN: usize = 128;

/// Total encoded packet size on the wire.
pub const PACKET_LEN: usize = 3 + PAYLOAD_LEN + 2;

/// A decoded wire packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    kind: u8,
    seqno: u8,
    payload: [u8; PAYLOAD_LEN],
}

impl Packet {
    /// A file-data packet carrying up to 128 bytes, zero-padded.
    pub fn data(seqno: u8, chunk: &[u8]) -> Packet {
        let mut payload = [0u8; PAYLOAD_LEN];
        let n = chunk.len().min(PAYLOAD_LEN);
        payload[..n].copy_from_slice(&chunk[..n]);
        Packet {
            kind: control::SOH,
            seqno,
            payload,
        }
    }

    /// The opening metadata packet: seqno 0, payload = the file name as
    /// given, zero-padded. The board expects no size field after the name.
    pub fn metadata(name: &str) -> Packet {
        Packet::data(0, name.as_bytes())
    }

    /// The zero-payload seqno-0 packet that closes a session.
    pub fn terminal() -> Packet {
        Packet::data(0, &[])
    }

    pub fn seqno(&self) -> u8 {
        self.seqno
    }

    pub fn payload(&self) -> &[u8; PAYLOAD_LEN] {
        &self.payload
    }

    /// Serialize into the fixed 133-byte wire form.
    pub fn encode(&self) -> [u8; PACKET_LEN] {
        let mut wire = [0u8; PACKET_LEN];
        wire[0] = self.kind;
        wire[1] = self.seqno;
        wire[2] = !self.seqno;
        wire[3..3 + PAYLOAD_LEN].copy_from_slice(&self.payload);
        let crc = crc16(&self.payload);
        wire[PACKET_LEN - 2] = (crc >> 8) as u8;
        wire[PACKET_LEN - 1] = (crc & 0xff) as u8;
        wire
    }

    /// Parse and validate a 133-byte wire packet.
    pub fn decode(wire: &[u8; PACKET_LEN]) -> Result<Packet, TransferError> {
        let kind = wire[0];
        if kind != control::SOH && kind != control::STX {
            return Err(TransferError::BadPacketType(kind));
        }
        let seqno = wire[1];
        let seqcpl = wire[2];
        if seqcpl != !seqno {
            return Err(TransferError::BadComplement { seqno, seqcpl });
        }
        let mut payload = [0u8; PAYLOAD_LEN];
        payload.copy_from_slice(&wire[3..3 + PAYLOAD_LEN]);
        let expected = crc16(&payload);
        let actual = ((wire[PACKET_LEN - 2] as u16) << 8) | wire[PACKET_LEN - 1] as u16;
        if expected != actual {
            return Err(TransferError::CrcMismatch { expected, actual });
        }
        Ok(Packet {
            kind,
            seqno,
            payload,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_to_exactly_133_bytes() {
        let wire = Packet::data(1, b"hello").encode();
        assert_eq!(wire.len(), PACKET_LEN);
        assert_eq!(PACKET_LEN, 133);
    }

    #[test]
    fn header_layout() {
        let wire = Packet::data(5, &[0xaa; 128]).encode();
        assert_eq!(wire[0], control::SOH);
        assert_eq!(wire[1], 5);
        assert_eq!(wire[2], 0xfa);
    }

    #[test]
    fn complement_holds_for_all_seqnos() {
        for seqno in 0..=255u8 {
            let wire = Packet::data(seqno, &[]).encode();
            assert_eq!(wire[2], !wire[1]);
        }
    }

    #[test]
    fn short_payload_is_zero_padded() {
        let wire = Packet::data(1, b"ab").encode();
        assert_eq!(&wire[3..5], b"ab");
        assert!(wire[5..131].iter().all(|&b| b == 0));
    }

    #[test]
    fn crc_covers_payload_only_big_endian() {
        let payload = [0x42u8; 128];
        let wire = Packet::data(9, &payload).encode();
        let crc = crc16(&payload);
        assert_eq!(wire[131], (crc >> 8) as u8);
        assert_eq!(wire[132], (crc & 0xff) as u8);

        // Same payload, different header: identical CRC bytes.
        let other = Packet::data(200, &payload).encode();
        assert_eq!(&wire[131..], &other[131..]);
    }

    #[test]
    fn terminal_packet_is_all_zero_with_ff_complement() {
        let wire = Packet::terminal().encode();
        assert_eq!(wire[1], 0);
        assert_eq!(wire[2], 0xff);
        assert!(wire[3..131].iter().all(|&b| b == 0));
        // CRC of 128 zero bytes is zero.
        assert_eq!(&wire[131..], &[0, 0]);
    }

    #[test]
    fn decode_round_trips() {
        let packet = Packet::metadata("firmware.bin");
        let decoded = Packet::decode(&packet.encode()).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(&decoded.payload()[..12], b"firmware.bin");
    }

    #[test]
    fn decode_rejects_bad_type() {
        let mut wire = Packet::data(1, b"x").encode();
        wire[0] = 0x7f;
        assert!(matches!(
            Packet::decode(&wire),
            Err(TransferError::BadPacketType(0x7f))
        ));
    }

    #[test]
    fn decode_rejects_bad_complement() {
        let mut wire = Packet::data(1, b"x").encode();
        wire[2] = 0x00;
        assert!(matches!(
            Packet::decode(&wire),
            Err(TransferError::BadComplement { .. })
        ));
    }

    #[test]
    fn decode_rejects_corrupt_payload() {
        let mut wire = Packet::data(1, b"x").encode();
        wire[64] ^= 0x01;
        assert!(matches!(
            Packet::decode(&wire),
            Err(TransferError::CrcMismatch { .. })
        ));
    }
}
