//! # Client Commands
//!
//! Text vocabulary accepted on a telemetry connection, one command per line.

use std::fmt;

use crate::controller::PowerupMode;

/// A recognised client request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    GetBatteryData,
    SetShippingMode(bool),
    SetPowerupMode(PowerupMode),
    GetPowerupMode,
    SetFanAuto,
    SetFanOff,
    SetFanSpeed(u8),
    GetFanMode,
    GetShutdownReason,
}

impl ClientCommand {
    /// Parse one line; surrounding whitespace is ignored
    ///
    /// # Returns
    ///
    /// `None` for anything outside the vocabulary
    ///
    /// # Examples
    ///
    /// ```
    /// use pwrctl::telemetry::command::ClientCommand;
    ///
    /// assert_eq!(ClientCommand::parse("SET_FAN_42\r\n"), Some(ClientCommand::SetFanSpeed(42)));
    /// assert_eq!(ClientCommand::parse("SET_FAN_256"), None);
    /// ```
    pub fn parse(line: &str) -> Option<Self> {
        let command = match line.trim() {
            "GET_BATTERY_DATA" => ClientCommand::GetBatteryData,
            "SET_SHIPPING_MODE_ENABLED" => ClientCommand::SetShippingMode(true),
            "SET_SHIPPING_MODE_DISABLED" => ClientCommand::SetShippingMode(false),
            "GET_POWERUP_MODE" => ClientCommand::GetPowerupMode,
            "SET_FAN_AUTO" => ClientCommand::SetFanAuto,
            "SET_FAN_OFF" => ClientCommand::SetFanOff,
            "GET_FAN_MODE" => ClientCommand::GetFanMode,
            "GET_SHUTDOWN_REASON" => ClientCommand::GetShutdownReason,
            other => {
                if let Some(mode) = other.strip_prefix("SET_POWERUP_MODE_") {
                    let mode = single_digit(mode)?;
                    ClientCommand::SetPowerupMode(PowerupMode::from_bits(mode)?)
                } else if let Some(speed) = other.strip_prefix("SET_FAN_") {
                    if !speed.bytes().all(|b| b.is_ascii_digit()) {
                        return None;
                    }
                    ClientCommand::SetFanSpeed(speed.parse().ok()?)
                } else {
                    return None;
                }
            }
        };
        Some(command)
    }
}

fn single_digit(text: &str) -> Option<u8> {
    match text.as_bytes() {
        [digit @ b'0'..=b'9'] => Some(digit - b'0'),
        _ => None,
    }
}

impl fmt::Display for ClientCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientCommand::GetBatteryData => write!(f, "GET_BATTERY_DATA"),
            ClientCommand::SetShippingMode(true) => write!(f, "SET_SHIPPING_MODE_ENABLED"),
            ClientCommand::SetShippingMode(false) => write!(f, "SET_SHIPPING_MODE_DISABLED"),
            ClientCommand::SetPowerupMode(mode) => write!(f, "SET_POWERUP_MODE_{}", mode.bits()),
            ClientCommand::GetPowerupMode => write!(f, "GET_POWERUP_MODE"),
            ClientCommand::SetFanAuto => write!(f, "SET_FAN_AUTO"),
            ClientCommand::SetFanOff => write!(f, "SET_FAN_OFF"),
            ClientCommand::SetFanSpeed(speed) => write!(f, "SET_FAN_{}", speed),
            ClientCommand::GetFanMode => write!(f, "GET_FAN_MODE"),
            ClientCommand::GetShutdownReason => write!(f, "GET_SHUTDOWN_REASON"),
        }
    }
}
