//! # Battery Telemetry Logger
//!
//! Appends battery samples as JSON lines to rotating files.
//!
//! A new file is started after `max_records_per_file` samples and only the
//! newest `max_files_to_keep` files are retained.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::pwrcmd::protocol::BatteryTelemetry;

const FILE_PREFIX: &str = "battery_";
const FILE_SUFFIX: &str = ".jsonl";

#[derive(Serialize)]
struct LogRecord<'a> {
    timestamp: String,
    #[serde(flatten)]
    telemetry: &'a BatteryTelemetry,
    shutdown_requested: bool,
}

/// Rotating JSONL writer
pub struct TelemetryLogger {
    dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    writer: Option<BufWriter<File>>,
    records_in_file: usize,
    sequence: u64,
}

impl std::fmt::Debug for TelemetryLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryLogger")
            .field("dir", &self.dir)
            .field("records_in_file", &self.records_in_file)
            .finish_non_exhaustive()
    }
}

impl TelemetryLogger {
    /// Create the log directory if needed
    ///
    /// # Errors
    ///
    /// Returns `Io` if the directory cannot be created
    pub fn new<P: AsRef<Path>>(
        dir: P,
        max_records_per_file: usize,
        max_files_to_keep: usize,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        info!("Battery telemetry log directory: {}", dir.display());

        Ok(Self {
            dir,
            max_records_per_file: max_records_per_file.max(1),
            max_files_to_keep: max_files_to_keep.max(1),
            writer: None,
            records_in_file: 0,
            sequence: 0,
        })
    }

    /// Append one sample
    pub fn log(&mut self, telemetry: &BatteryTelemetry) -> Result<()> {
        if self.writer.is_none() || self.records_in_file >= self.max_records_per_file {
            self.rotate()?;
        }

        let record = LogRecord {
            timestamp: Utc::now().to_rfc3339(),
            telemetry,
            shutdown_requested: telemetry.shutdown_requested(),
        };

        if let Some(writer) = self.writer.as_mut() {
            serde_json::to_writer(&mut *writer, &record).map_err(io::Error::from)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            self.records_in_file += 1;
        }
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        if let Some(mut old) = self.writer.take() {
            old.flush()?;
        }

        let name = format!(
            "{}{}_{:04}{}",
            FILE_PREFIX,
            Local::now().format("%Y%m%d_%H%M%S"),
            self.sequence,
            FILE_SUFFIX
        );
        self.sequence += 1;

        let path = self.dir.join(name);
        debug!("Opening telemetry log {}", path.display());
        self.writer = Some(BufWriter::new(File::create(&path)?));
        self.records_in_file = 0;

        self.prune()
    }

    /// Delete the oldest files beyond the retention limit
    fn prune(&self) -> Result<()> {
        let mut files = self.log_files()?;
        while files.len() > self.max_files_to_keep {
            let oldest = files.remove(0);
            if let Err(e) = fs::remove_file(&oldest) {
                warn!("Failed to remove old telemetry log {}: {}", oldest.display(), e);
            }
        }
        Ok(())
    }

    /// Log files in the directory, oldest first
    pub fn log_files(&self) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(FILE_PREFIX) && n.ends_with(FILE_SUFFIX))
            })
            .collect();
        files.sort();
        Ok(files)
    }
}
