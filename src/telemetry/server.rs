//! # Telemetry Socket Server
//!
//! Accepts clients on a Unix stream socket and runs one session task per
//! connection. Connections beyond `max_clients` are closed immediately.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::UnixListener;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::session::{run_session, SessionContext};
use crate::config::TelemetryConfig;
use crate::error::Result;

/// Listening socket plus the shared session context
pub struct TelemetryServer {
    listener: UnixListener,
    socket_path: PathBuf,
    max_clients: usize,
    ctx: SessionContext,
}

impl TelemetryServer {
    /// Bind the socket, replacing a stale file left by an earlier run
    ///
    /// # Errors
    ///
    /// Returns `Io` if the old file cannot be removed or binding fails
    pub fn bind(config: &TelemetryConfig, ctx: SessionContext) -> Result<Self> {
        let socket_path = config.socket_path.clone();
        remove_socket_file(&socket_path)?;

        let listener = UnixListener::bind(&socket_path)?;
        info!(
            "Telemetry socket listening on {} (max {} clients)",
            socket_path.display(),
            config.max_clients
        );

        Ok(Self {
            listener,
            socket_path,
            max_clients: config.max_clients.max(1),
            ctx,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Serve until `stop` becomes true, then wait for sessions and remove the socket
    pub async fn run(self, mut stop: watch::Receiver<bool>) -> Result<()> {
        let slots = Arc::new(Semaphore::new(self.max_clients));
        let mut sessions = JoinSet::new();
        let mut next_id: u64 = 0;

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
                accepted = self.listener.accept() => {
                    let (stream, _) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!("Telemetry accept failed: {}", e);
                            continue;
                        }
                    };

                    let Ok(permit) = slots.clone().try_acquire_owned() else {
                        warn!(
                            "Refusing telemetry client: {} clients already connected",
                            self.max_clients
                        );
                        drop(stream);
                        continue;
                    };

                    next_id += 1;
                    let id = next_id;
                    let ctx = self.ctx.clone();
                    let session_stop = stop.clone();
                    info!("Telemetry client {} connected", id);

                    sessions.spawn(async move {
                        if let Err(e) = run_session(stream, id, &ctx, session_stop).await {
                            debug!("Session {} ended with error: {}", id, e);
                        }
                        drop(permit);
                    });
                }
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!("Telemetry session task failed: {}", e);
                    }
                }
            }
        }

        info!("Telemetry server stopping, waiting for {} sessions", sessions.len());
        while let Some(joined) = sessions.join_next().await {
            if let Err(e) = joined {
                error!("Telemetry session task failed: {}", e);
            }
        }

        drop(self.listener);
        remove_socket_file(&self.socket_path)?;
        Ok(())
    }
}

fn remove_socket_file(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed socket file {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
