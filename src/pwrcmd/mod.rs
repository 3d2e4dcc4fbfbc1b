//! # Power Controller Link Protocol
//!
//! Framing for the serial link between the camera and its power controller.
//!
//! This module handles:
//! - CRC-16/MODBUS checksum calculation
//! - Frame encoding (SOF, big-endian length, command, payload, CRC)
//! - Byte-at-a-time frame decoding with resynchronization
//! - Battery telemetry payload parsing

pub mod protocol;
pub mod encoder;
pub mod decoder;
pub mod crc;
