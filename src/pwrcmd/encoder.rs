//! # Power Controller Frame Encoder
//!
//! Seals a command and payload into a wire frame.

use bytes::{BufMut, Bytes, BytesMut};

use super::crc::{crc_init, crc_of};
use super::protocol::*;
use crate::error::{PwrctlError, Result};

/// Encode a command and payload into a complete frame
///
/// # Arguments
///
/// * `command` - Command byte
/// * `payload` - Payload bytes (max 65534)
///
/// # Returns
///
/// * `Result<Bytes>` - SOF + length + command + payload + CRC
///
/// # Errors
///
/// Returns `PayloadTooLarge` if the payload does not fit the 16-bit length field
///
/// # Examples
///
/// ```
/// use pwrctl::pwrcmd::encoder::encode_frame;
/// use pwrctl::pwrcmd::protocol::CMD_GET_DATA_EXT;
///
/// let frame = encode_frame(CMD_GET_DATA_EXT, &[]).unwrap();
/// assert_eq!(&frame[..], &[0x5A, 0x00, 0x01, 0x04, 0x93, 0x71]);
/// ```
pub fn encode_frame(command: u8, payload: &[u8]) -> Result<Bytes> {
    if payload.len() > PWRCMD_MAX_PAYLOAD_SIZE {
        return Err(PwrctlError::PayloadTooLarge(payload.len()));
    }

    let length = (1 + payload.len()) as u16;

    let mut buf = BytesMut::with_capacity(PWRCMD_FRAME_OVERHEAD + length as usize);
    buf.put_u8(PWRCMD_SOF);
    buf.put_u16(length);
    buf.put_u8(command);
    buf.put_slice(payload);

    // CRC covers everything after the SOF
    let crc = crc_of(&buf[1..], crc_init());
    buf.put_u16(crc);

    Ok(buf.freeze())
}

/// Encode an already built [`Frame`]
pub fn encode(frame: &Frame) -> Result<Bytes> {
    encode_frame(frame.command, &frame.payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_single_byte_command() {
        let frame = encode_frame(CMD_IS_IN_BOOTLOADER, &[]).unwrap();
        assert_eq!(&frame[..], &[0x5A, 0x00, 0x01, 0x7F, 0xB0, 0x31]);
    }

    #[test]
    fn test_encode_with_payload() {
        let frame = encode_frame(CMD_SET_POWERUP_MODE, &[0x03]).unwrap();
        assert_eq!(&frame[..], &[0x5A, 0x00, 0x02, 0x06, 0x03, 0x45, 0xE2]);
    }

    #[test]
    fn test_encode_frame_length() {
        let frame = encode_frame(CMD_WRITE_DATA, &[0xFF; 136]).unwrap();
        assert_eq!(frame.len(), PWRCMD_FRAME_OVERHEAD + 137);
        assert_eq!(u16::from_be_bytes([frame[1], frame[2]]), 137);
    }

    #[test]
    fn test_encode_payload_too_large() {
        let payload = vec![0u8; PWRCMD_MAX_PAYLOAD_SIZE + 1];
        assert!(matches!(
            encode_frame(CMD_WRITE_DATA, &payload),
            Err(PwrctlError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn test_encode_frame_struct_matches_crc() {
        let frame = Frame::new(0x10, vec![1, 2, 3, 4]).unwrap();
        let bytes = encode(&frame).unwrap();
        let n = bytes.len();
        assert_eq!(u16::from_be_bytes([bytes[n - 2], bytes[n - 1]]), frame.crc);
    }

    #[test]
    fn test_encode_different_data_different_crc() {
        let frame1 = encode_frame(0x10, &[1, 2, 3, 4]).unwrap();
        let frame2 = encode_frame(0x10, &[1, 2, 3, 5]).unwrap();
        assert_ne!(frame1[8..], frame2[8..]);
    }
}
