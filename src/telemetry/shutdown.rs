//! # Shutdown Hook
//!
//! Called when the power controller sets the shutdown-request flag.

use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tracing::{error, info, warn};

/// Receiver of "power controller requests system shutdown"
#[cfg_attr(test, mockall::automock)]
pub trait ShutdownHook: Send + Sync {
    fn request_shutdown(&self);
}

/// Runs an external command the first time a shutdown is requested
#[derive(Debug)]
pub struct CommandShutdownHook {
    command: Vec<String>,
    fired: AtomicBool,
}

impl CommandShutdownHook {
    /// # Arguments
    ///
    /// * `command` - Program followed by its arguments
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            fired: AtomicBool::new(false),
        }
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl ShutdownHook for CommandShutdownHook {
    fn request_shutdown(&self) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }

        let Some((program, args)) = self.command.split_first() else {
            error!("Shutdown requested but no shutdown command is configured");
            return;
        };

        warn!("Power controller requested shutdown, running {:?}", self.command);
        match Command::new(program).args(args).spawn() {
            Ok(child) => reap(program.clone(), child),
            Err(e) => {
                error!("Failed to run shutdown command {}: {}", program, e);
                // Allow a later request to try again
                self.fired.store(false, Ordering::SeqCst);
            }
        }
    }
}

/// Wait for the shutdown command on its own thread so it never lingers as a zombie
fn reap(program: String, mut child: Child) {
    let spawned = thread::Builder::new()
        .name("shutdown-reaper".to_string())
        .spawn(move || match child.wait() {
            Ok(status) if status.success() => info!("Shutdown command {} finished", program),
            Ok(status) => error!("Shutdown command {} exited with {}", program, status),
            Err(e) => error!("Failed to wait for shutdown command {}: {}", program, e),
        });
    if let Err(e) = spawned {
        warn!("Could not start shutdown reaper thread: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_command_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("shutdown.log");
        let hook = CommandShutdownHook::new(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            format!("echo fired >> {}", marker.display()),
        ]);

        hook.request_shutdown();
        hook.request_shutdown();
        assert!(hook.has_fired());

        for _ in 0..50 {
            if marker.exists() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        std::thread::sleep(Duration::from_millis(50));
        let contents = std::fs::read_to_string(&marker).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[test]
    fn test_finished_command_is_reaped() {
        if !std::path::Path::new("/proc/self").exists() {
            return;
        }
        let child = Command::new("/bin/sh").args(["-c", "exit 3"]).spawn().unwrap();
        let proc_entry = std::path::PathBuf::from(format!("/proc/{}", child.id()));
        reap("/bin/sh".to_string(), child);

        // An exited but unreaped child keeps its /proc entry
        for _ in 0..100 {
            if !proc_entry.exists() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!proc_entry.exists(), "{} still present", proc_entry.display());
    }

    #[test]
    fn test_spawn_failure_rearms() {
        let hook = CommandShutdownHook::new(vec!["/nonexistent/shutdown-binary".to_string()]);
        hook.request_shutdown();
        assert!(!hook.has_fired());
    }

    #[test]
    fn test_empty_command_does_not_panic() {
        let hook = CommandShutdownHook::new(vec![]);
        hook.request_shutdown();
        assert!(hook.has_fired());
    }
}
