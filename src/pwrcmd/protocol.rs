//! # Power Controller Protocol Constants and Types
//!
//! Core protocol definitions for the serial link to the power controller.
//!
//! ```text
//! 0x5A | len_hi | len_lo | command | payload[len-1] | crc_hi | crc_lo
//! ```

use serde::Serialize;

use super::crc::{crc_init, crc_of};
use crate::error::{PwrctlError, Result};

/// Start-of-frame marker
pub const PWRCMD_SOF: u8 = 0x5A;

/// Largest payload a frame can carry (length field is command + payload)
pub const PWRCMD_MAX_PAYLOAD_SIZE: usize = 65534;

/// Largest value of the length field
pub const PWRCMD_MAX_DATA_LEN: usize = PWRCMD_MAX_PAYLOAD_SIZE + 1;

/// Default receive limit on the declared length, sized to the controller's buffers
pub const PWRCMD_DEFAULT_RX_LIMIT: usize = 128 + 16;

/// Frame overhead: sof(1) + length(2) + crc(2)
pub const PWRCMD_FRAME_OVERHEAD: usize = 5;

// User application commands
pub const CMD_GET_DATA: u8 = 0x00;
pub const CMD_SHUTDOWN: u8 = 0x01;
pub const CMD_REQUEST_POWERDOWN: u8 = 0x02;
pub const CMD_JUMP_TO_BOOTLOADER: u8 = 0x03;
pub const CMD_GET_DATA_EXT: u8 = 0x04;
pub const CMD_GET_APP_VERSION: u8 = 0x05;
pub const CMD_SET_POWERUP_MODE: u8 = 0x06;
pub const CMD_GET_POWERUP_MODE: u8 = 0x07;
pub const CMD_SET_FAN_SPEED_OVERRIDE: u8 = 0x08;
pub const CMD_GET_FAN_SPEED_OVERRIDE: u8 = 0x09;
pub const CMD_SET_SHIPPING_MODE: u8 = 0x0A;
pub const CMD_GET_SHIPPING_MODE: u8 = 0x0B;
pub const CMD_GET_SHUTDOWN_REASON: u8 = 0x0C;

// Common commands
pub const CMD_IS_IN_BOOTLOADER: u8 = 0x7F;

// Bootloader only commands
pub const CMD_ERASE_PAGE: u8 = 0x80;
pub const CMD_WRITE_DATA: u8 = 0x81;
pub const CMD_JUMP_TO_PGM: u8 = 0x82;
pub const CMD_GET_BOOT_VERSION: u8 = 0x83;

/// Battery payload size for GET_DATA
pub const BATTERY_PAYLOAD_SIZE: usize = 10;

/// Battery payload size for GET_DATA_EXT (camera-side block appended)
pub const BATTERY_EXT_PAYLOAD_SIZE: usize = 18;

// Battery flag bits
pub const FLAG_BATTERY_PRESENT: u8 = 1 << 0;
pub const FLAG_AC_PRESENT: u8 = 1 << 1;
pub const FLAG_CHARGING: u8 = 1 << 2;
pub const FLAG_AUTO_POWER_ON: u8 = 1 << 3;
pub const FLAG_OVER_TEMPERATURE: u8 = 1 << 4;
pub const FLAG_SHIPPING_MODE: u8 = 1 << 5;
pub const FLAG_SHUTDOWN_REQUESTED: u8 = 1 << 6;

/// Human-readable command name for logs
pub fn command_name(command: u8) -> &'static str {
    match command {
        CMD_GET_DATA => "GET_DATA",
        CMD_SHUTDOWN => "SHUTDOWN",
        CMD_REQUEST_POWERDOWN => "REQUEST_POWERDOWN",
        CMD_JUMP_TO_BOOTLOADER => "JUMP_TO_BOOTLOADER",
        CMD_GET_DATA_EXT => "GET_DATA_EXT",
        CMD_GET_APP_VERSION => "GET_APP_VERSION",
        CMD_SET_POWERUP_MODE => "SET_POWERUP_MODE",
        CMD_GET_POWERUP_MODE => "GET_POWERUP_MODE",
        CMD_SET_FAN_SPEED_OVERRIDE => "SET_FAN_SPEED_OVERRIDE",
        CMD_GET_FAN_SPEED_OVERRIDE => "GET_FAN_SPEED_OVERRIDE",
        CMD_SET_SHIPPING_MODE => "SET_SHIPPING_MODE",
        CMD_GET_SHIPPING_MODE => "GET_SHIPPING_MODE",
        CMD_GET_SHUTDOWN_REASON => "GET_SHUTDOWN_REASON",
        CMD_IS_IN_BOOTLOADER => "IS_IN_BOOTLOADER",
        CMD_ERASE_PAGE => "ERASE_PAGE",
        CMD_WRITE_DATA => "WRITE_DATA",
        CMD_JUMP_TO_PGM => "JUMP_TO_PGM",
        CMD_GET_BOOT_VERSION => "GET_BOOT_VERSION",
        _ => "UNKNOWN",
    }
}

/// Battery and board telemetry reported by the power controller
///
/// The camera-side fields (`voltage_cam`, `current_cam`, `board_temperature`)
/// and the trailing `flags`/`fan_pwm` bytes only exist in the extended
/// response; they are zero when the controller sent the short form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatteryTelemetry {
    /// Remaining capacity (0-100%)
    pub capacity_percent: u8,

    /// Battery state of health (0-100%)
    pub state_of_health_percent: u8,

    /// Battery voltage in mV
    pub voltage: u16,

    /// Battery current in mA, negative while discharging
    pub current: i16,

    /// High resolution remaining capacity
    pub hi_res_capacity: u16,

    /// High resolution state of charge
    pub hi_res_state_of_charge: u16,

    /// Camera supply voltage in mV
    pub voltage_cam: u16,

    /// Camera supply current in mA
    pub current_cam: i16,

    /// Main board temperature in tenths of a degree C
    pub board_temperature: i16,

    /// Status flags (see `FLAG_*`); unknown bits are reserved
    pub flags: u8,

    /// Fan PWM duty (0-255)
    pub fan_pwm: u8,
}

impl BatteryTelemetry {
    /// Power controller is asking the host to shut down
    pub fn shutdown_requested(&self) -> bool {
        self.flags & FLAG_SHUTDOWN_REQUESTED != 0
    }

    /// Controller is in shipping mode
    pub fn shipping_mode(&self) -> bool {
        self.flags & FLAG_SHIPPING_MODE != 0
    }

    pub fn battery_present(&self) -> bool {
        self.flags & FLAG_BATTERY_PRESENT != 0
    }

    pub fn ac_present(&self) -> bool {
        self.flags & FLAG_AC_PRESENT != 0
    }

    pub fn charging(&self) -> bool {
        self.flags & FLAG_CHARGING != 0
    }
}

/// Power controller frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command byte (first byte of the data section)
    pub command: u8,

    /// Payload data following the command byte
    pub payload: Vec<u8>,

    /// CRC over length + command + payload
    pub crc: u16,
}

impl Frame {
    /// Create a new frame and compute its CRC
    ///
    /// # Errors
    ///
    /// Returns error if payload exceeds PWRCMD_MAX_PAYLOAD_SIZE (65534 bytes)
    pub fn new(command: u8, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > PWRCMD_MAX_PAYLOAD_SIZE {
            return Err(PwrctlError::PayloadTooLarge(payload.len()));
        }

        let length = (1 + payload.len()) as u16;
        let header = [(length >> 8) as u8, length as u8, command];
        let crc = crc_of(&payload, crc_of(&header, crc_init()));

        Ok(Self {
            command,
            payload,
            crc,
        })
    }

    /// Value of the length field (command + payload)
    ///
    /// Cannot overflow since payload is validated to be ≤ 65534 bytes
    pub fn length(&self) -> u16 {
        (1 + self.payload.len()) as u16
    }
}
