//! # Link Receiver
//!
//! Long-lived task that reads the controller's TX line, drives the frame
//! decoder and publishes each valid frame into the [`Inbox`].

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::inbox::Inbox;
use crate::pwrcmd::decoder::Decoder;

/// Bytes requested per read; the decoder still consumes them one at a time
const READ_CHUNK: usize = 64;

/// Run the receive loop until EOF, a transport error, or `stop` becomes true
///
/// The inbox is closed on exit so pending calls fail fast. A partially
/// received frame is dropped.
///
/// # Arguments
///
/// * `reader` - Read side of the serial transport
/// * `inbox` - Destination for decoded frames
/// * `max_frame_len` - Largest declared length the decoder accepts
/// * `stop` - Cooperative stop signal
///
/// # Returns
///
/// Number of frames published
pub async fn run_receiver<R>(
    mut reader: R,
    inbox: Arc<Inbox>,
    max_frame_len: usize,
    mut stop: watch::Receiver<bool>,
) -> u64
where
    R: AsyncRead + Unpin,
{
    let mut decoder = Decoder::with_limit(max_frame_len);
    let mut buf = [0u8; READ_CHUNK];
    let mut published = 0u64;

    loop {
        if *stop.borrow() {
            debug!("Link receiver stopping");
            break;
        }

        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() {
                    debug!("Link receiver stop handle dropped");
                    break;
                }
            }
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    info!("Power controller link closed (EOF)");
                    break;
                }
                Ok(n) => {
                    for &byte in &buf[..n] {
                        if let Some(frame) = decoder.feed(byte) {
                            debug!(
                                "RX frame 0x{:02X} ({} payload bytes)",
                                frame.command,
                                frame.payload.len()
                            );
                            inbox.push(frame);
                            published += 1;
                        }
                    }
                }
                Err(e) => {
                    error!("Power controller link read failed: {}", e);
                    break;
                }
            }
        }
    }

    inbox.close();
    published
}
