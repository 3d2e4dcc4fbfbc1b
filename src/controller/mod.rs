//! # Power Controller Commands
//!
//! Typed wrappers over the command engine. Each operation sends one
//! command and checks that the reply echoes it with enough payload.

pub mod settings;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::error::{PwrctlError, Result};
use crate::firmware::FLASH_PAGE_SIZE_BYTES;
use crate::link::CommandEngine;
use crate::pwrcmd::decoder::decode_battery_telemetry;
use crate::pwrcmd::protocol::*;

pub use settings::{FanOverride, PowerupMode, ShutdownReason};

/// Handle to the power controller
#[derive(Debug, Clone)]
pub struct PowerController {
    engine: Arc<CommandEngine>,
    timeout: Duration,
}

impl PowerController {
    /// Wrap an engine, using its default timeout for every call
    pub fn new(engine: Arc<CommandEngine>) -> Self {
        let timeout = engine.default_timeout();
        Self { engine, timeout }
    }

    pub fn with_timeout(engine: Arc<CommandEngine>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }

    pub fn engine(&self) -> &Arc<CommandEngine> {
        &self.engine
    }

    /// Send `command` and return the reply payload
    ///
    /// # Errors
    ///
    /// Returns `Protocol` if the reply carries fewer than `min_len` payload bytes
    async fn request(&self, command: u8, payload: &[u8], min_len: usize) -> Result<Vec<u8>> {
        let frame = self.engine.call(command, payload, self.timeout).await?;
        if frame.payload.len() < min_len {
            return Err(PwrctlError::Protocol(format!(
                "{} reply has {} payload bytes, expected at least {}",
                command_name(command),
                frame.payload.len(),
                min_len
            )));
        }
        Ok(frame.payload)
    }

    /// Battery and board telemetry (extended form)
    pub async fn battery_data(&self) -> Result<BatteryTelemetry> {
        let payload = self.request(CMD_GET_DATA_EXT, &[], BATTERY_PAYLOAD_SIZE).await?;
        decode_battery_telemetry(CMD_GET_DATA_EXT, &payload)
    }

    /// Application firmware version
    pub async fn app_version(&self) -> Result<u16> {
        let payload = self.request(CMD_GET_APP_VERSION, &[], 2).await?;
        Ok(u16::from_be_bytes([payload[0], payload[1]]))
    }

    pub async fn set_powerup_mode(&self, mode: PowerupMode) -> Result<()> {
        self.request(CMD_SET_POWERUP_MODE, &[mode.bits()], 0).await?;
        Ok(())
    }

    pub async fn powerup_mode(&self) -> Result<PowerupMode> {
        let payload = self.request(CMD_GET_POWERUP_MODE, &[], 1).await?;
        PowerupMode::from_bits(payload[0])
            .ok_or_else(|| PwrctlError::Protocol(format!("unknown powerup mode {}", payload[0])))
    }

    pub async fn set_fan_override(&self, fan: FanOverride) -> Result<()> {
        self.request(CMD_SET_FAN_SPEED_OVERRIDE, &fan.to_payload(), 0).await?;
        Ok(())
    }

    pub async fn fan_override(&self) -> Result<FanOverride> {
        let payload = self.request(CMD_GET_FAN_SPEED_OVERRIDE, &[], 2).await?;
        Ok(FanOverride::from_payload(payload[0], payload[1]))
    }

    /// Enable or disable shipping mode
    ///
    /// In shipping mode the power button is ignored until external power
    /// is applied.
    pub async fn set_shipping_mode(&self, enabled: bool) -> Result<()> {
        self.request(CMD_SET_SHIPPING_MODE, &[enabled as u8], 0).await?;
        Ok(())
    }

    pub async fn shipping_mode(&self) -> Result<bool> {
        let payload = self.request(CMD_GET_SHIPPING_MODE, &[], 1).await?;
        Ok(payload[0] != 0)
    }

    pub async fn shutdown_reason(&self) -> Result<ShutdownReason> {
        let payload = self.request(CMD_GET_SHUTDOWN_REASON, &[], 1).await?;
        Ok(ShutdownReason(payload[0]))
    }

    /// True when the bootloader (not the application) is running
    pub async fn is_in_bootloader(&self) -> Result<bool> {
        let payload = self.request(CMD_IS_IN_BOOTLOADER, &[], 1).await?;
        Ok(payload[0] != 0)
    }

    pub async fn jump_to_bootloader(&self) -> Result<()> {
        info!("Requesting jump to bootloader");
        self.request(CMD_JUMP_TO_BOOTLOADER, &[], 0).await?;
        Ok(())
    }

    pub async fn jump_to_program(&self) -> Result<()> {
        info!("Requesting jump to application");
        self.request(CMD_JUMP_TO_PGM, &[], 0).await?;
        Ok(())
    }

    /// Erase the flash page starting at `word_address`
    pub async fn erase_page(&self, word_address: u32) -> Result<()> {
        self.request(CMD_ERASE_PAGE, &word_address.to_le_bytes(), 0).await?;
        Ok(())
    }

    /// Program one full page at `word_address`
    ///
    /// Payload: `[len/4, addr0, addr1, addr2, addr3, 0, 0, data..]`, address
    /// little-endian.
    pub async fn write_page(
        &self,
        word_address: u32,
        data: &[u8; FLASH_PAGE_SIZE_BYTES],
    ) -> Result<()> {
        self.request(CMD_WRITE_DATA, &write_payload(word_address, data), 0).await?;
        Ok(())
    }
}

fn write_payload(word_address: u32, data: &[u8; FLASH_PAGE_SIZE_BYTES]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(7 + FLASH_PAGE_SIZE_BYTES);
    payload.push((FLASH_PAGE_SIZE_BYTES / 4) as u8);
    payload.extend_from_slice(&word_address.to_le_bytes());
    payload.extend_from_slice(&[0, 0]);
    payload.extend_from_slice(data);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::port_trait::mocks::*;
    use std::sync::Mutex;

    type Fixture = (PowerController, MockSerialPort, Arc<Mutex<FakeState>>, crate::link::Link);

    fn controller_with(state: FakeState) -> Fixture {
        let state = Arc::new(Mutex::new(state));
        let (link, port) = fake_link(state.clone(), Duration::from_millis(200));
        (PowerController::new(link.engine()), port, state, link)
    }

    #[tokio::test]
    async fn test_battery_data() {
        let (pc, port, _state, _link) = controller_with(FakeState::default());
        let battery = pc.battery_data().await.unwrap();
        assert_eq!(battery.capacity_percent, 80);
        assert_eq!(battery.voltage, 8400);
        assert_eq!(battery.current, -200);
        assert_eq!(battery.voltage_cam, 12000);
        assert_eq!(battery.current_cam, -500);
        assert_eq!(battery.board_temperature, 350);
        assert_eq!(battery.flags, 0x07);
        assert_eq!(battery.fan_pwm, 0x80);
        assert_eq!(port.written_frames()[0].command, CMD_GET_DATA_EXT);
    }

    #[tokio::test]
    async fn test_powerup_mode_round_trip() {
        let (pc, port, state, _link) = controller_with(FakeState::default());
        pc.set_powerup_mode(PowerupMode::from_bits(3).unwrap()).await.unwrap();
        assert_eq!(state.lock().unwrap().powerup_mode, 3);
        assert_eq!(pc.powerup_mode().await.unwrap().bits(), 3);
        assert_eq!(port.get_written_data()[0], vec![0x5A, 0x00, 0x02, 0x06, 0x03, 0x45, 0xE2]);
    }

    #[tokio::test]
    async fn test_fan_override_round_trip() {
        let (pc, _port, state, _link) = controller_with(FakeState::default());
        assert_eq!(pc.fan_override().await.unwrap(), FanOverride::Auto);

        pc.set_fan_override(FanOverride::Fixed(200)).await.unwrap();
        assert_eq!(state.lock().unwrap().fan, (1, 200));
        assert_eq!(pc.fan_override().await.unwrap(), FanOverride::Fixed(200));
    }

    #[tokio::test]
    async fn test_shipping_mode_and_reason() {
        let (pc, _port, _state, _link) = controller_with(FakeState {
            shutdown_reason: 0x42,
            ..FakeState::default()
        });
        pc.set_shipping_mode(true).await.unwrap();
        assert!(pc.shipping_mode().await.unwrap());
        assert_eq!(pc.shutdown_reason().await.unwrap(), ShutdownReason(0x42));
        assert_eq!(pc.app_version().await.unwrap(), 0x0102);
    }

    #[tokio::test]
    async fn test_bootloader_commands() {
        let (pc, _port, _state, _link) = controller_with(FakeState::default());
        assert!(!pc.is_in_bootloader().await.unwrap());
        pc.jump_to_bootloader().await.unwrap();
        assert!(pc.is_in_bootloader().await.unwrap());
        pc.jump_to_program().await.unwrap();
        assert!(!pc.is_in_bootloader().await.unwrap());
    }

    #[tokio::test]
    async fn test_erase_and_write_payloads() {
        let (pc, port, _state, _link) = controller_with(FakeState::default());
        pc.erase_page(0x0E00).await.unwrap();
        pc.write_page(0x0E40, &[0xAB; FLASH_PAGE_SIZE_BYTES]).await.unwrap();

        let frames = port.written_frames();
        assert_eq!(frames[0].command, CMD_ERASE_PAGE);
        assert_eq!(frames[0].payload, vec![0x00, 0x0E, 0x00, 0x00]);
        assert_eq!(frames[1].command, CMD_WRITE_DATA);
        assert_eq!(&frames[1].payload[..7], &[32, 0x40, 0x0E, 0x00, 0x00, 0, 0]);
        assert_eq!(frames[1].payload.len(), 7 + FLASH_PAGE_SIZE_BYTES);
    }

    #[tokio::test]
    async fn test_short_reply_is_protocol_error() {
        let (port, rx) = MockSerialPort::with_responder(Arc::new(|request: &Frame| {
            crate::pwrcmd::encoder::encode_frame(request.command, &[])
                .ok()
                .map(|b| b.to_vec())
        }));
        let link = crate::link::Link::from_parts(rx, Box::new(port), Default::default());
        let pc = PowerController::new(link.engine());

        assert!(matches!(pc.fan_override().await, Err(PwrctlError::Protocol(_))));
        assert!(matches!(pc.battery_data().await, Err(PwrctlError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_timeout_propagates() {
        let (pc, _port, _state, _link) = controller_with(FakeState {
            silent_commands: vec![CMD_GET_SHUTDOWN_REASON],
            ..FakeState::default()
        });
        assert!(pc.shutdown_reason().await.unwrap_err().is_timeout());
    }
}
