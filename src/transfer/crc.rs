//! CRC-16 checksum as computed by the board's loader.
//!
//! The loader folds each byte through two concatenated 16-entry nibble
//! tables. The tables are copied verbatim from the device firmware; they are
//! kept as-is rather than re-derived from the 0x1021 polynomial so that the
//! checksum stays bit-for-bit interoperable with the hardware.

/// Two 16-entry lookup tables, low-nibble first, high-nibble at offset 16.
const CRC_TAB: [u16; 32] = [
    0x0000, 0x1021, 0x2042, 0x3063, 0x4084, 0x50a5, 0x60c6, 0x70e7,
    0x8108, 0x9129, 0xa14a, 0xb16b, 0xc18c, 0xd1ad, 0xe1ce, 0xf1ef,
    0x0000, 0x1231, 0x2462, 0x3653, 0x48c4, 0x5af5, 0x6ca6, 0x7e97,
    0x9188, 0x83b9, 0xb5ea, 0xa7db, 0xd94c, 0xcb7d, 0xfd2e, 0xef1f,
];

/// Fold one byte into a running checksum.
pub fn crc16_step(crc: u16, byte: u8) -> u16 {
    let pos = ((crc >> 8) as u8) ^ byte;
    (crc << 8) ^ CRC_TAB[(pos & 0xf) as usize] ^ CRC_TAB[((pos >> 4) as usize) + 16]
}

/// Checksum a byte sequence, starting from 0.
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0, |crc, &byte| crc16_step(crc, byte))
}

// =============================================================================
// Unit Tests
// =============================================================================
