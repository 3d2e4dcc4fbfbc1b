//! # Power Controller Link
//!
//! Owns one serial connection: a receiver task feeding the inbox and a
//! command engine that serializes every request/response exchange.
//!
//! ```text
//! callers -> CommandEngine -> encoder -> serial TX
//! serial RX -> receiver task -> decoder -> Inbox -> CommandEngine
//! ```

pub mod engine;
pub mod inbox;
pub mod receiver;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::SerialConfig;
use crate::pwrcmd::protocol::PWRCMD_DEFAULT_RX_LIMIT;
use crate::serial::port_trait::{AsyncWritePort, SerialPortIO};

pub use engine::CommandEngine;
pub use inbox::{Inbox, INBOX_CAPACITY};

/// Tunables for one link
#[derive(Debug, Clone)]
pub struct LinkSettings {
    /// Default per-call response timeout
    pub call_timeout: Duration,
    /// Largest declared frame length the decoder accepts
    pub max_frame_len: usize,
    /// Inbox ring size
    pub inbox_capacity: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_millis(1000),
            max_frame_len: PWRCMD_DEFAULT_RX_LIMIT,
            inbox_capacity: INBOX_CAPACITY,
        }
    }
}

impl From<&SerialConfig> for LinkSettings {
    fn from(config: &SerialConfig) -> Self {
        Self {
            call_timeout: Duration::from_millis(config.timeout_ms),
            max_frame_len: config.max_frame_len,
            inbox_capacity: INBOX_CAPACITY,
        }
    }
}

/// A running link to the power controller
///
/// Dropping the link signals the receiver task to stop.
pub struct Link {
    engine: Arc<CommandEngine>,
    stop: watch::Sender<bool>,
    receiver: Option<JoinHandle<u64>>,
}

impl Link {
    /// Start a link over a bidirectional stream (e.g. a serial port)
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<S>(stream: S, settings: LinkSettings) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_parts(reader, Box::new(AsyncWritePort::new(writer)), settings)
    }

    /// Start a link from a separate read side and write port
    pub fn from_parts<R>(reader: R, writer: Box<dyn SerialPortIO>, settings: LinkSettings) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let inbox = Arc::new(Inbox::with_capacity(settings.inbox_capacity));
        let (stop, stop_rx) = watch::channel(false);

        let receiver = tokio::spawn(receiver::run_receiver(
            reader,
            inbox.clone(),
            settings.max_frame_len,
            stop_rx,
        ));

        let engine = Arc::new(CommandEngine::new(writer, inbox, settings.call_timeout));

        Self {
            engine,
            stop,
            receiver: Some(receiver),
        }
    }

    /// Shared handle for issuing calls
    pub fn engine(&self) -> Arc<CommandEngine> {
        self.engine.clone()
    }

    /// Resolve once the receiver task has exited (EOF or read error)
    ///
    /// After this every call fails with `LinkClosed`; the owner should
    /// reopen the port or exit so a supervisor can restart it.
    ///
    /// Cancel safe; the task handle is only released once it has completed.
    pub async fn closed(&mut self) {
        if let Some(handle) = self.receiver.as_mut() {
            let result = handle.await;
            self.receiver = None;
            match result {
                Ok(frames) => warn!("Link receiver exited after {} frames", frames),
                Err(e) => warn!("Link receiver task failed: {}", e),
            }
        }
    }

    /// Stop the receiver task and wait for it to exit
    pub async fn shutdown(mut self) {
        let _ = self.stop.send(true);
        if let Some(handle) = self.receiver.take() {
            match handle.await {
                Ok(frames) => debug!("Link receiver exited after {} frames", frames),
                Err(e) => debug!("Link receiver task failed: {}", e),
            }
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::port_trait::mocks::MockSerialPort;

    #[test]
    fn test_settings_from_serial_config() {
        let config = SerialConfig {
            timeout_ms: 250,
            max_frame_len: 300,
            ..SerialConfig::default()
        };
        let settings = LinkSettings::from(&config);
        assert_eq!(settings.call_timeout, Duration::from_millis(250));
        assert_eq!(settings.max_frame_len, 300);
        assert_eq!(settings.inbox_capacity, INBOX_CAPACITY);
    }

    #[tokio::test]
    async fn test_shutdown_stops_receiver() {
        let (_controller, rx) = tokio::io::duplex(64);
        let link = Link::from_parts(rx, Box::new(MockSerialPort::new()), LinkSettings::default());
        let engine = link.engine();

        tokio::time::timeout(Duration::from_secs(1), link.shutdown())
            .await
            .expect("link shutdown hung");

        let err = engine.call_default(0x04, &[]).await.unwrap_err();
        assert!(matches!(err, crate::error::PwrctlError::LinkClosed));
    }

    #[tokio::test]
    async fn test_closed_resolves_when_transport_ends() {
        let (controller, rx) = tokio::io::duplex(64);
        let mut link =
            Link::from_parts(rx, Box::new(MockSerialPort::new()), LinkSettings::default());

        // Transport still open
        let open = tokio::time::timeout(Duration::from_millis(50), link.closed()).await;
        assert!(open.is_err());

        drop(controller);
        tokio::time::timeout(Duration::from_secs(1), link.closed())
            .await
            .expect("closed() did not resolve after EOF");

        let err = link.engine().call_default(0x04, &[]).await.unwrap_err();
        assert!(matches!(err, crate::error::PwrctlError::LinkClosed));
        link.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_over_duplex_stream() {
        use tokio::io::AsyncReadExt;

        let (ours, mut controller) = tokio::io::duplex(64);
        let link = Link::start(ours, LinkSettings::default());
        let engine = link.engine();

        let call = tokio::spawn(async move {
            engine.call(0x7F, &[], Duration::from_millis(50)).await
        });

        let mut request = [0u8; 6];
        controller.read_exact(&mut request).await.unwrap();
        assert_eq!(request, [0x5A, 0x00, 0x01, 0x7F, 0xB0, 0x31]);
        assert!(call.await.unwrap().unwrap_err().is_timeout());
    }
}
