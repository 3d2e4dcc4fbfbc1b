//! # CRC-16/MODBUS Implementation
//!
//! CRC-16 checksum used to seal and validate power controller frames.
//!
//! **Polynomial**: 0x8005, reflected (0xA001)
//! **Initial Value**: 0xFFFF
//!
//! The CRC covers the two length bytes, the command byte and the payload. It is
//! transmitted high byte first.

/// Reflected CRC-16/MODBUS polynomial
const CRC16_POLY: u16 = 0xA001;

/// Seed value for a new CRC computation
pub const CRC16_INIT: u16 = 0xFFFF;

/// Precomputed CRC16 lookup table for fast calculation
const CRC16_TABLE: [u16; 256] = generate_crc16_table();

/// Generate CRC16 lookup table at compile time
const fn generate_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = i as u16;
        let mut j = 0;

        while j < 8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ CRC16_POLY;
            } else {
                crc >>= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// Return the seed value for a new CRC
pub const fn crc_init() -> u16 {
    CRC16_INIT
}

/// Fold one byte into a running CRC
///
/// # Examples
///
/// ```
/// use pwrctl::pwrcmd::crc::{crc_init, crc_step};
///
/// let mut crc = crc_init();
/// for &byte in b"123456789" {
///     crc = crc_step(crc, byte);
/// }
/// assert_eq!(crc, 0x4B37);
/// ```
#[inline]
pub fn crc_step(crc: u16, byte: u8) -> u16 {
    (crc >> 8) ^ CRC16_TABLE[((crc ^ byte as u16) & 0xFF) as usize]
}

/// Fold a whole buffer into `seed`
///
/// # Arguments
///
/// * `data` - Bytes to checksum (Length + Command + Payload for a frame)
/// * `seed` - Running CRC to continue from, usually [`crc_init`]
pub fn crc_of(data: &[u8], seed: u16) -> u16 {
    data.iter().fold(seed, |crc, &byte| crc_step(crc, byte))
}

/// Bit-by-bit CRC16 (slow, for verifying the table)
#[allow(dead_code)]
fn crc16_slow(data: &[u8], seed: u16) -> u16 {
    let mut crc = seed;

    for &byte in data {
        crc ^= byte as u16;

        for _ in 0..8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ CRC16_POLY;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}
