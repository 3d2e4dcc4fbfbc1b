//! # Telemetry Session
//!
//! One connected client. Each line is answered from fresh controller
//! state; when the client stays quiet for a push interval it receives a
//! battery block anyway.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use super::command::ClientCommand;
use super::shutdown::ShutdownHook;
use crate::controller::{FanOverride, PowerController};
use crate::error::Result;
use crate::pwrcmd::protocol::BatteryTelemetry;

/// Everything a session needs, shared by all sessions
#[derive(Clone)]
pub struct SessionContext {
    pub controller: PowerController,
    pub shutdown: Arc<dyn ShutdownHook>,
    pub push_interval: Duration,
}

/// Longest client line kept; longer lines are discarded as malformed
pub const MAX_LINE_LEN: usize = 256;

/// One unit of client input
#[derive(Debug, PartialEq, Eq)]
enum ClientLine {
    Text(String),
    /// Over-long or not UTF-8
    Malformed,
    Eof,
}

/// Newline-delimited reader with a bounded line buffer
///
/// Cancel safe: the only await is `fill_buf`, and a partial line stays in
/// `line` between calls, so it can sit inside a `select!` or `timeout`.
struct LineReader<R> {
    inner: BufReader<R>,
    line: Vec<u8>,
    overflowed: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            line: Vec::with_capacity(MAX_LINE_LEN),
            overflowed: false,
        }
    }

    async fn next_line(&mut self) -> io::Result<ClientLine> {
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                if self.line.is_empty() && !self.overflowed {
                    return Ok(ClientLine::Eof);
                }
                return Ok(self.finish_line());
            }

            let (chunk, used, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (&available[..i], i + 1, true),
                None => (available, available.len(), false),
            };

            if !self.overflowed {
                if self.line.len() + chunk.len() > MAX_LINE_LEN {
                    self.overflowed = true;
                    self.line.clear();
                } else {
                    self.line.extend_from_slice(chunk);
                }
            }
            self.inner.consume(used);

            if complete {
                return Ok(self.finish_line());
            }
        }
    }

    fn finish_line(&mut self) -> ClientLine {
        let bytes = std::mem::take(&mut self.line);
        if std::mem::take(&mut self.overflowed) {
            return ClientLine::Malformed;
        }
        String::from_utf8(bytes).map_or(ClientLine::Malformed, ClientLine::Text)
    }
}

/// Per-connection bookkeeping
#[derive(Debug, Clone, Copy)]
pub struct Session {
    pub id: u64,
    pub last_activity: Instant,
}

/// Text reply plus whether the controller asked for a shutdown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub shutdown_requested: bool,
}

impl Reply {
    fn status(text: impl Into<String>) -> Self {
        let mut text = text.into();
        text.push('\n');
        Self {
            text,
            shutdown_requested: false,
        }
    }
}

/// Render telemetry as `key value` lines
pub fn format_battery_block(b: &BatteryTelemetry) -> String {
    format!(
        "battCapacityPercent {}\nbattSOHPercent {}\nbattVoltage {}\nbattCurrent {}\n\
         battHiResCap {}\nbattHiResSOC {}\nbattVoltageCam {}\nbattCurrentCam {}\n\
         mbTemperature {}\nflags {}\nfanPWM {}\n",
        b.capacity_percent,
        b.state_of_health_percent,
        b.voltage,
        b.current,
        b.hi_res_capacity,
        b.hi_res_state_of_charge,
        b.voltage_cam,
        b.current_cam,
        b.board_temperature,
        b.flags,
        b.fan_pwm,
    )
}

/// Run `command` against the controller and build the client reply
///
/// Controller failures become a `<COMMAND> failed: <error>` line.
pub async fn execute(controller: &PowerController, command: ClientCommand) -> Reply {
    let result = match command {
        ClientCommand::GetBatteryData => controller.battery_data().await.map(|b| Reply {
            text: format_battery_block(&b),
            shutdown_requested: b.shutdown_requested(),
        }),
        ClientCommand::SetShippingMode(enabled) => {
            controller.set_shipping_mode(enabled).await.map(|_| {
                Reply::status(if enabled {
                    "shipping mode enabled"
                } else {
                    "shipping mode disabled"
                })
            })
        }
        ClientCommand::SetPowerupMode(mode) => controller
            .set_powerup_mode(mode)
            .await
            .map(|_| Reply::status(format!("pwrmode{}", mode.bits()))),
        ClientCommand::GetPowerupMode => controller
            .powerup_mode()
            .await
            .map(|mode| Reply::status(format!("pwrmode{}", mode.bits()))),
        ClientCommand::SetFanAuto => controller
            .set_fan_override(FanOverride::Auto)
            .await
            .map(|_| Reply::status("disabled fan override")),
        ClientCommand::SetFanOff => controller
            .set_fan_override(FanOverride::Fixed(0))
            .await
            .map(|_| Reply::status("enabled fan override")),
        ClientCommand::SetFanSpeed(speed) => controller
            .set_fan_override(FanOverride::Fixed(speed))
            .await
            .map(|_| Reply::status(format!("fan override {}", speed))),
        ClientCommand::GetFanMode => controller
            .fan_override()
            .await
            .map(|fan| Reply::status(fan.to_string())),
        ClientCommand::GetShutdownReason => controller
            .shutdown_reason()
            .await
            .map(|reason| Reply::status(reason.to_string())),
    };

    result.unwrap_or_else(|e| Reply::status(format!("{} failed: {}", command, e)))
}

/// Serve one client until it disconnects, the transport fails, or `stop` fires
///
/// Unknown, over-long and non-UTF-8 lines are ignored without a reply.
///
/// # Errors
///
/// Returns `Io` when reading from or writing to the client fails
pub async fn run_session<S>(
    stream: S,
    id: u64,
    ctx: &SessionContext,
    mut stop: watch::Receiver<bool>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = LineReader::new(reader);
    let mut session = Session {
        id,
        last_activity: Instant::now(),
    };

    loop {
        if *stop.borrow() {
            break;
        }

        let command = tokio::select! {
            _ = stop.changed() => break,
            next = tokio::time::timeout(ctx.push_interval, lines.next_line()) => match next {
                // Quiet client: push telemetry as if it had asked
                Err(_) => ClientCommand::GetBatteryData,
                Ok(Ok(ClientLine::Text(line))) => {
                    session.last_activity = Instant::now();
                    match ClientCommand::parse(&line) {
                        Some(command) => command,
                        None => {
                            debug!("Session {}: ignoring {:?}", session.id, line);
                            continue;
                        }
                    }
                }
                Ok(Ok(ClientLine::Malformed)) => {
                    session.last_activity = Instant::now();
                    debug!("Session {}: ignoring malformed line", session.id);
                    continue;
                }
                Ok(Ok(ClientLine::Eof)) => break,
                Ok(Err(e)) => return Err(e.into()),
            }
        };

        let reply = execute(&ctx.controller, command).await;
        writer.write_all(reply.text.as_bytes()).await?;
        writer.flush().await?;

        if reply.shutdown_requested {
            ctx.shutdown.request_shutdown();
        }
    }

    info!(
        "Session {} closed (idle {:?})",
        session.id,
        session.last_activity.elapsed()
    );
    Ok(())
}
