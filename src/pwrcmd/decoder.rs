//! # Power Controller Frame Decoder
//!
//! Byte-at-a-time frame decoder and battery telemetry parsing.
//!
//! The decoder never looks ahead: every call to [`Decoder::feed`] consumes
//! exactly one byte and returns immediately. A bad length or CRC drops the
//! partial frame and the decoder hunts for the next SOF byte. No resend is
//! requested; the caller's response timeout is the only recovery.

use tracing::{debug, trace};

use super::crc::{crc_init, crc_of, crc_step};
use super::protocol::*;
use crate::error::{PwrctlError, Result};

/// Decoder states, one byte consumed per transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Discarding bytes until a SOF is seen
    WaitSof,
    /// Expecting the high byte of the length field
    LenHi,
    /// Expecting the low byte of the length field
    LenLo,
    /// Collecting command + payload bytes
    Data,
    /// Expecting the high byte of the CRC
    CrcHi,
    /// Expecting the low byte of the CRC
    CrcLo,
}

/// Streaming frame decoder
#[derive(Debug)]
pub struct Decoder {
    state: DecoderState,
    max_len: usize,
    length: usize,
    crc: u16,
    data: Vec<u8>,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    /// Create a decoder with the default receive limit
    pub fn new() -> Self {
        Self::with_limit(PWRCMD_DEFAULT_RX_LIMIT)
    }

    /// Create a decoder accepting declared lengths up to `max_len`
    ///
    /// Frames announcing a longer length are dropped as soon as the length
    /// field is complete, before any buffer is allocated for them.
    pub fn with_limit(max_len: usize) -> Self {
        Self {
            state: DecoderState::WaitSof,
            max_len: max_len.clamp(1, PWRCMD_MAX_DATA_LEN),
            length: 0,
            crc: crc_init(),
            data: Vec::new(),
        }
    }

    /// Current state of the decoder
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Drop any partial frame and wait for the next SOF
    pub fn reset(&mut self) {
        self.state = DecoderState::WaitSof;
        self.length = 0;
        self.data = Vec::new();
    }

    /// Feed one byte into the state machine
    ///
    /// # Returns
    ///
    /// * `Option<Frame>` - A validated frame when this byte completed one
    pub fn feed(&mut self, byte: u8) -> Option<Frame> {
        match self.state {
            DecoderState::WaitSof => {
                if byte == PWRCMD_SOF {
                    self.crc = crc_init();
                    self.state = DecoderState::LenHi;
                }
            }

            DecoderState::LenHi => {
                self.length = (byte as usize) << 8;
                self.crc = crc_step(self.crc, byte);
                self.state = DecoderState::LenLo;
            }

            DecoderState::LenLo => {
                self.length |= byte as usize;
                self.crc = crc_step(self.crc, byte);

                // A frame always carries at least the command byte
                if self.length == 0 || self.length > self.max_len {
                    debug!(
                        "Dropping frame with declared length {} (limit {})",
                        self.length, self.max_len
                    );
                    self.reset();
                } else {
                    self.data = Vec::with_capacity(self.length);
                    self.state = DecoderState::Data;
                }
            }

            DecoderState::Data => {
                self.crc = crc_step(self.crc, byte);
                self.data.push(byte);
                if self.data.len() >= self.length {
                    self.state = DecoderState::CrcHi;
                }
            }

            DecoderState::CrcHi => {
                if byte == (self.crc >> 8) as u8 {
                    self.state = DecoderState::CrcLo;
                } else {
                    debug!("CRC mismatch (high byte), resynchronizing");
                    self.reset();
                }
            }

            DecoderState::CrcLo => {
                let crc = self.crc;
                let valid = byte == (crc & 0xFF) as u8;
                let mut data = std::mem::take(&mut self.data);
                self.reset();

                if !valid {
                    debug!("CRC mismatch (low byte), resynchronizing");
                    return None;
                }

                let payload = data.split_off(1);
                let frame = Frame {
                    command: data[0],
                    payload,
                    crc,
                };
                trace!(
                    "Decoded {} frame ({} payload bytes)",
                    command_name(frame.command),
                    frame.payload.len()
                );
                return Some(frame);
            }
        }

        None
    }

    /// Feed a run of bytes, collecting every completed frame
    pub fn feed_slice(&mut self, bytes: &[u8]) -> Vec<Frame> {
        bytes.iter().filter_map(|&byte| self.feed(byte)).collect()
    }
}

/// Decode a complete frame held in one buffer
///
/// # Arguments
///
/// * `frame` - Complete frame bytes (sof, length, command, payload, crc)
///
/// # Errors
///
/// Returns error if:
/// - Frame is too short or its length field disagrees with the buffer
/// - SOF byte is incorrect
/// - CRC check fails
pub fn decode_frame(frame: &[u8]) -> Result<Frame> {
    // Minimum frame size: sof(1) + length(2) + command(1) + crc(2) = 6 bytes
    if frame.len() < PWRCMD_FRAME_OVERHEAD + 1 {
        return Err(PwrctlError::Protocol("Frame too short".to_string()));
    }

    if frame[0] != PWRCMD_SOF {
        return Err(PwrctlError::Protocol(format!(
            "Invalid SOF byte: 0x{:02X}",
            frame[0]
        )));
    }

    let length = u16::from_be_bytes([frame[1], frame[2]]) as usize;
    if length == 0 || frame.len() != PWRCMD_FRAME_OVERHEAD + length {
        return Err(PwrctlError::Protocol(format!(
            "Length field {} does not match frame of {} bytes",
            length,
            frame.len()
        )));
    }

    let received_crc = u16::from_be_bytes([frame[3 + length], frame[4 + length]]);
    let calculated_crc = crc_of(&frame[1..3 + length], crc_init());
    if calculated_crc != received_crc {
        return Err(PwrctlError::Protocol(format!(
            "CRC mismatch: expected 0x{:04X}, got 0x{:04X}",
            calculated_crc, received_crc
        )));
    }

    Ok(Frame {
        command: frame[3],
        payload: frame[4..3 + length].to_vec(),
        crc: received_crc,
    })
}

/// Decode a GET_DATA / GET_DATA_EXT response payload
///
/// # Arguments
///
/// * `command` - Command byte of the response
/// * `payload` - Response payload (command byte already stripped)
///
/// # Errors
///
/// Returns error if the payload is shorter than the base battery block
pub fn decode_battery_telemetry(command: u8, payload: &[u8]) -> Result<BatteryTelemetry> {
    if payload.len() < BATTERY_PAYLOAD_SIZE {
        return Err(PwrctlError::Protocol(format!(
            "Battery payload too short: {} bytes",
            payload.len()
        )));
    }

    let be16 = |i: usize| u16::from_be_bytes([payload[i], payload[i + 1]]);

    let mut telemetry = BatteryTelemetry {
        capacity_percent: payload[0],
        state_of_health_percent: payload[1],
        voltage: be16(2),
        current: be16(4) as i16,
        hi_res_capacity: be16(6),
        hi_res_state_of_charge: be16(8),
        ..Default::default()
    };

    // Camera-side block only exists in the extended response
    if command == CMD_GET_DATA_EXT && payload.len() >= BATTERY_EXT_PAYLOAD_SIZE {
        telemetry.voltage_cam = be16(10);
        telemetry.current_cam = be16(12) as i16;
        telemetry.board_temperature = be16(14) as i16;
        telemetry.flags = payload[16];
        telemetry.fan_pwm = payload[17];
    }

    Ok(telemetry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pwrcmd::encoder::encode_frame;
    use quickcheck::{Gen, QuickCheck};

    const FRAME_A: [u8; 10] = [0x5A, 0x00, 0x05, 0x10, 0x01, 0x02, 0x03, 0x04, 0x99, 0x7B];
    const FRAME_B: [u8; 9] = [0x5A, 0x00, 0x04, 0x21, 0x09, 0x08, 0x07, 0xE7, 0x6D];

    const BATTERY_EXT: [u8; 18] = [
        80, 98, // capacity, SOH
        0x20, 0xD0, // 8400 mV
        0xFF, 0x38, // -200 mA
        0x03, 0xE8, // hi-res capacity 1000
        0x1F, 0x40, // hi-res SOC 8000
        0x2E, 0xE0, // camera 12000 mV
        0xFE, 0x0C, // camera -500 mA
        0x01, 0x5E, // 35.0 C
        0x47, // shutdown requested, charging, AC, battery
        0x80, // fan PWM
    ];

    #[test]
    fn test_decoder_single_frame() {
        let mut decoder = Decoder::new();
        let frames = decoder.feed_slice(&FRAME_A);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, 0x10);
        assert_eq!(frames[0].payload, vec![1, 2, 3, 4]);
        assert_eq!(frames[0].crc, 0x997B);
        assert_eq!(decoder.state(), DecoderState::WaitSof);
    }

    #[test]
    fn test_decoder_returns_after_each_byte() {
        let mut decoder = Decoder::new();
        let expected = [
            DecoderState::LenHi,
            DecoderState::LenLo,
            DecoderState::Data,
            DecoderState::Data,
        ];
        for (byte, state) in FRAME_A.iter().zip(expected) {
            assert!(decoder.feed(*byte).is_none());
            assert_eq!(decoder.state(), state);
        }
    }

    #[test]
    fn test_decoder_skips_leading_garbage() {
        let mut decoder = Decoder::new();
        let mut stream = vec![0x00, 0xFF, 0x13, 0x37];
        stream.extend_from_slice(&FRAME_B);
        let frames = decoder.feed_slice(&stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, 0x21);
    }

    #[test]
    fn test_decoder_back_to_back_frames() {
        let mut decoder = Decoder::new();
        let mut stream = FRAME_A.to_vec();
        stream.extend_from_slice(&FRAME_B);
        stream.extend_from_slice(&FRAME_A);
        let commands: Vec<u8> = decoder.feed_slice(&stream).iter().map(|f| f.command).collect();
        assert_eq!(commands, vec![0x10, 0x21, 0x10]);
    }

    #[test]
    fn test_decoder_resync_after_single_corruption() {
        // Corrupt every byte of frame A in turn; frame B must always survive alone
        for index in 0..FRAME_A.len() {
            let mut corrupted = FRAME_A;
            corrupted[index] ^= 0xFF;

            let mut stream = corrupted.to_vec();
            stream.extend_from_slice(&FRAME_B);

            let frames = Decoder::new().feed_slice(&stream);
            assert_eq!(frames.len(), 1, "corrupted byte {}", index);
            assert_eq!(frames[0].command, 0x21, "corrupted byte {}", index);
            assert_eq!(frames[0].payload, vec![9, 8, 7], "corrupted byte {}", index);
        }
    }

    #[test]
    fn test_decoder_rejects_length_over_limit() {
        let mut decoder = Decoder::with_limit(4);
        let frames = decoder.feed_slice(&FRAME_A[..3]);
        assert!(frames.is_empty());
        assert_eq!(decoder.state(), DecoderState::WaitSof);
    }

    #[test]
    fn test_decoder_rejects_zero_length() {
        let mut decoder = Decoder::new();
        decoder.feed_slice(&[0x5A, 0x00, 0x00]);
        assert_eq!(decoder.state(), DecoderState::WaitSof);
    }

    #[test]
    fn test_decoder_buffer_sized_to_declared_length() {
        let mut decoder = Decoder::new();
        decoder.feed_slice(&FRAME_A[..4]);
        assert_eq!(decoder.state(), DecoderState::Data);
        assert!(decoder.data.capacity() >= 5);
        assert!(decoder.data.capacity() < 64);
    }

    #[test]
    fn test_decoder_large_frame_with_raised_limit() {
        let payload: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
        let bytes = encode_frame(0xC3, &payload).unwrap();

        assert!(Decoder::new().feed_slice(&bytes).is_empty());

        let frames = Decoder::with_limit(PWRCMD_MAX_DATA_LEN).feed_slice(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, payload);
    }

    fn round_trips(command: u8, payload: &[u8]) -> bool {
        let bytes = match encode_frame(command, payload) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let frames = Decoder::with_limit(PWRCMD_MAX_DATA_LEN).feed_slice(&bytes);
        frames.len() == 1 && frames[0].command == command && frames[0].payload == payload
    }

    #[test]
    fn prop_encode_decode_round_trip() {
        fn property(command: u8, payload: Vec<u8>) -> bool {
            round_trips(command, &payload)
        }

        // Generator size bounds the Vec length: payloads of 0..1024 bytes
        QuickCheck::new()
            .gen(Gen::new(1024))
            .tests(200)
            .quickcheck(property as fn(u8, Vec<u8>) -> bool);
    }

    #[test]
    fn test_round_trip_length_boundaries() {
        for len in [0usize, 1, 127, 128, 143, 255, 256, 1023, 1024] {
            let payload: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();
            for command in [0x00, 0x5A, 0x81, 0xFF] {
                assert!(round_trips(command, &payload), "len {} command {:02X}", len, command);
            }
        }
    }

    #[test]
    fn test_decode_frame_whole_buffer() {
        let frame = decode_frame(&FRAME_B).unwrap();
        assert_eq!(frame.command, 0x21);
        assert_eq!(frame.payload, vec![9, 8, 7]);
    }

    #[test]
    fn test_decode_frame_too_short() {
        assert!(decode_frame(&[0x5A, 0x00, 0x01]).is_err());
    }

    #[test]
    fn test_decode_frame_invalid_sof() {
        let mut frame = FRAME_B;
        frame[0] = 0xC8;
        assert!(decode_frame(&frame).is_err());
    }

    #[test]
    fn test_decode_frame_crc_error() {
        let mut frame = FRAME_B;
        frame[8] ^= 0xFF;
        assert!(decode_frame(&frame).is_err());
    }

    #[test]
    fn test_decode_battery_extended() {
        let telemetry = decode_battery_telemetry(CMD_GET_DATA_EXT, &BATTERY_EXT).unwrap();
        assert_eq!(
            telemetry,
            BatteryTelemetry {
                capacity_percent: 80,
                state_of_health_percent: 98,
                voltage: 8400,
                current: -200,
                hi_res_capacity: 1000,
                hi_res_state_of_charge: 8000,
                voltage_cam: 12000,
                current_cam: -500,
                board_temperature: 350,
                flags: 0x47,
                fan_pwm: 128,
            }
        );
        assert!(telemetry.shutdown_requested());
    }

    #[test]
    fn test_decode_battery_short_form_zero_fills() {
        let telemetry = decode_battery_telemetry(CMD_GET_DATA, &BATTERY_EXT).unwrap();
        assert_eq!(telemetry.voltage, 8400);
        assert_eq!(telemetry.voltage_cam, 0);
        assert_eq!(telemetry.current_cam, 0);
        assert_eq!(telemetry.board_temperature, 0);
        assert_eq!(telemetry.flags, 0);
        assert_eq!(telemetry.fan_pwm, 0);
    }

    #[test]
    fn test_decode_battery_too_short() {
        assert!(decode_battery_telemetry(CMD_GET_DATA_EXT, &[0u8; 9]).is_err());
    }
}
