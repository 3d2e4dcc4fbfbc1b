//! # Battery Monitor
//!
//! Polls the controller on a fixed interval, independently of any socket
//! client, so a shutdown request is noticed even when nobody is connected.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::logger::TelemetryLogger;
use super::shutdown::ShutdownHook;
use crate::controller::PowerController;
use crate::error::Result;
use crate::pwrcmd::protocol::BatteryTelemetry;

pub struct BatteryMonitor {
    controller: PowerController,
    shutdown: Arc<dyn ShutdownHook>,
    logger: Option<TelemetryLogger>,
    poll_interval: Duration,
    samples: u64,
}

impl BatteryMonitor {
    pub fn new(
        controller: PowerController,
        shutdown: Arc<dyn ShutdownHook>,
        logger: Option<TelemetryLogger>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            controller,
            shutdown,
            logger,
            poll_interval,
            samples: 0,
        }
    }

    /// Successful polls so far
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Read the battery once, log it and act on the shutdown flag
    ///
    /// # Errors
    ///
    /// Returns the controller error; logging failures are only warned about
    pub async fn poll_once(&mut self) -> Result<BatteryTelemetry> {
        let telemetry = self.controller.battery_data().await?;
        self.samples += 1;
        debug!(
            "Battery {}% {} mV {} mA flags 0x{:02X}",
            telemetry.capacity_percent, telemetry.voltage, telemetry.current, telemetry.flags
        );

        if let Some(logger) = self.logger.as_mut() {
            if let Err(e) = logger.log(&telemetry) {
                warn!("Failed to write battery telemetry: {}", e);
            }
        }

        if telemetry.shutdown_requested() {
            self.shutdown.request_shutdown();
        }
        Ok(telemetry)
    }

    /// Poll until `stop` becomes true
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Battery monitor polling every {:?}", self.poll_interval);

        loop {
            if *stop.borrow() {
                break;
            }
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!("Battery poll failed: {}", e);
                    }
                }
            }
        }

        info!("Battery monitor stopped after {} samples", self.samples);
    }
}
