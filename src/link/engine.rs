//! # Command/Response Engine
//!
//! One request on the wire at a time. The protocol has no message IDs; a
//! reply is matched only by echoing the command byte, so the writer lock is
//! held from the write until the reply (or the deadline).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::inbox::{Inbox, RecvError};
use crate::error::{PwrctlError, Result};
use crate::pwrcmd::encoder::encode_frame;
use crate::pwrcmd::protocol::{command_name, Frame};
use crate::serial::port_trait::SerialPortIO;

/// Serializes request/response exchanges over one link
pub struct CommandEngine {
    port: Mutex<Box<dyn SerialPortIO>>,
    inbox: Arc<Inbox>,
    default_timeout: Duration,
}

impl std::fmt::Debug for CommandEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandEngine")
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl CommandEngine {
    pub fn new(port: Box<dyn SerialPortIO>, inbox: Arc<Inbox>, default_timeout: Duration) -> Self {
        Self {
            port: Mutex::new(port),
            inbox,
            default_timeout,
        }
    }

    /// Timeout used by [`CommandEngine::call_default`]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Send a command and wait for the reply carrying the same command byte
    ///
    /// Frames already sitting in the inbox when the lock is taken belong to
    /// earlier, abandoned calls and are discarded before writing. Frames with
    /// a different command byte that arrive while waiting are consumed and
    /// dropped.
    ///
    /// # Arguments
    ///
    /// * `command` - Command byte
    /// * `payload` - Request payload
    /// * `timeout` - Upper bound on the wait for the reply
    ///
    /// # Errors
    ///
    /// * `Timeout` - no matching reply before the deadline
    /// * `LinkClosed` - the receiver task has ended
    /// * `Serial` - the frame could not be written
    /// * `PayloadTooLarge` - payload does not fit in a frame
    pub async fn call(&self, command: u8, payload: &[u8], timeout: Duration) -> Result<Frame> {
        let request = encode_frame(command, payload)?;

        let mut port = self.port.lock().await;

        if self.inbox.is_closed() && self.inbox.is_empty() {
            return Err(PwrctlError::LinkClosed);
        }

        let stale = self.inbox.drain();
        if stale > 0 {
            debug!("Discarded {} stale frame(s) before {}", stale, command_name(command));
        }

        port.write_all(&request)
            .await
            .map_err(|e| PwrctlError::Serial(format!("Failed to write frame: {}", e)))?;
        port.flush()
            .await
            .map_err(|e| PwrctlError::Serial(format!("Failed to flush serial port: {}", e)))?;
        debug!("TX {} ({} payload bytes)", command_name(command), payload.len());

        let deadline = Instant::now() + timeout;
        loop {
            match self.inbox.recv_until(deadline).await {
                Ok(frame) if frame.command == command => return Ok(frame),
                Ok(frame) => {
                    debug!(
                        "Dropping unsolicited frame 0x{:02X} while waiting for {}",
                        frame.command,
                        command_name(command)
                    );
                }
                Err(RecvError::Elapsed) => {
                    warn!("No response to {} within {:?}", command_name(command), timeout);
                    return Err(PwrctlError::Timeout {
                        command,
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                Err(RecvError::Closed) => return Err(PwrctlError::LinkClosed),
            }
        }
    }

    /// [`CommandEngine::call`] with the configured default timeout
    pub async fn call_default(&self, command: u8, payload: &[u8]) -> Result<Frame> {
        self.call(command, payload, self.default_timeout).await
    }
}
