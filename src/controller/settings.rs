//! # Controller Settings
//!
//! Small settings round-tripped through single-command payloads. Nothing
//! here is cached; every value is re-queried from the controller.

use std::fmt;

/// Power up on restore of external power
pub const POWERUP_ON_AC_RESTORE: u8 = 1 << 0;

/// Power down when external power is removed
pub const POWERDOWN_ON_AC_REMOVE: u8 = 1 << 1;

/// Behaviour around external power transitions
///
/// Modes 0-3 are the combinations of the two bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PowerupMode(u8);

impl PowerupMode {
    /// Mode from its numeric value
    ///
    /// # Returns
    ///
    /// `None` when `mode` has bits other than the two defined ones
    pub fn from_bits(mode: u8) -> Option<Self> {
        (mode & !(POWERUP_ON_AC_RESTORE | POWERDOWN_ON_AC_REMOVE) == 0).then_some(Self(mode))
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn powers_up_on_ac_restore(self) -> bool {
        self.0 & POWERUP_ON_AC_RESTORE != 0
    }

    pub fn powers_down_on_ac_remove(self) -> bool {
        self.0 & POWERDOWN_ON_AC_REMOVE != 0
    }
}

/// Fan speed override
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOverride {
    /// Controller runs its own fan curve
    Auto,
    /// Fixed PWM duty (0 stops the fan)
    Fixed(u8),
}

/// Speed byte sent along with a disabled override
const AUTO_SPEED: u8 = 128;

impl FanOverride {
    /// `[enable, speed]` request payload
    pub fn to_payload(self) -> [u8; 2] {
        match self {
            FanOverride::Auto => [0, AUTO_SPEED],
            FanOverride::Fixed(speed) => [1, speed],
        }
    }

    /// Decode a `[enable, speed]` response payload
    pub fn from_payload(enable: u8, speed: u8) -> Self {
        if enable != 0 {
            FanOverride::Fixed(speed)
        } else {
            FanOverride::Auto
        }
    }
}

impl fmt::Display for FanOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FanOverride::Auto => write!(f, "fan override disabled"),
            FanOverride::Fixed(speed) => write!(f, "fan override enabled, speed {}", speed),
        }
    }
}

/// Why the controller last powered the camera down
///
/// A bitmask; zero means the power loss was unintentional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReason(pub u8);

const SHUTDOWN_CAUSES: [&str; 8] = [
    "reached off state",
    "low battery",
    "watchdog",
    "over temperature",
    "auto power off",
    "software request",
    "power button",
    "forced power button",
];

impl ShutdownReason {
    /// Human-readable causes, one per set bit
    pub fn causes(self) -> Vec<&'static str> {
        if self.0 == 0 {
            return vec!["unintentional"];
        }
        SHUTDOWN_CAUSES
            .iter()
            .enumerate()
            .filter(|(bit, _)| self.0 & (1 << bit) != 0)
            .map(|(_, cause)| *cause)
            .collect()
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shutdown reason {}: {}", self.0, self.causes().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_powerup_mode_bits() {
        let mode = PowerupMode::from_bits(3).unwrap();
        assert!(mode.powers_up_on_ac_restore());
        assert!(mode.powers_down_on_ac_remove());

        let mode = PowerupMode::from_bits(2).unwrap();
        assert!(!mode.powers_up_on_ac_restore());
        assert!(mode.powers_down_on_ac_remove());

        assert!(PowerupMode::from_bits(4).is_none());
    }

    #[test]
    fn test_fan_override_payload() {
        assert_eq!(FanOverride::Auto.to_payload(), [0, 128]);
        assert_eq!(FanOverride::Fixed(0).to_payload(), [1, 0]);
        assert_eq!(FanOverride::from_payload(1, 200), FanOverride::Fixed(200));
        assert_eq!(FanOverride::from_payload(0, 77), FanOverride::Auto);
    }

    #[test]
    fn test_fan_override_display() {
        assert_eq!(FanOverride::Auto.to_string(), "fan override disabled");
        assert_eq!(FanOverride::Fixed(90).to_string(), "fan override enabled, speed 90");
    }

    #[test]
    fn test_shutdown_reason_causes() {
        assert_eq!(ShutdownReason(0).causes(), vec!["unintentional"]);
        assert_eq!(ShutdownReason(0b0000_0110).causes(), vec!["low battery", "watchdog"]);
        assert_eq!(
            ShutdownReason(0x80).to_string(),
            "shutdown reason 128: forced power button"
        );
    }
}
