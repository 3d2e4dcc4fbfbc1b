//! Trait abstraction for the serial write path to enable testing

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Trait for serial port write operations
#[async_trait]
pub trait SerialPortIO: Send {
    /// Write all data to the port
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    async fn flush(&mut self) -> io::Result<()>;
}

/// Adapter giving any tokio writer (a serial write half, a socket) the SerialPortIO interface
pub struct AsyncWritePort<W> {
    inner: W,
}

impl<W> AsyncWritePort<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<W> SerialPortIO for AsyncWritePort<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().await
    }
}
