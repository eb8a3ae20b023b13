//! FileSink - appends readings to date-templated CSV files
//!
//! The path template may contain `{date}`, substituted with the reading's
//! UTC date. When the rendered path changes (a date boundary), the current
//! file is flushed and the new one opened before the triggering reading is
//! written, so rotation neither drops nor duplicates it.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use contracts::{ContractError, DataSink, Reading};
use tracing::{debug, error, info, instrument};

/// Configuration for FileSink
#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    /// Output path, optionally containing `{date}`
    pub path_template: String,
}

impl FileSinkConfig {
    /// Create config from params map
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, String> {
        let path_template = params
            .get("path")
            .cloned()
            .ok_or_else(|| "missing 'path' parameter".to_string())?;
        Ok(Self { path_template })
    }
}

/// Sink that appends one CSV row per reading.
pub struct FileSink {
    name: String,
    config: FileSinkConfig,
    current_path: Option<PathBuf>,
    writer: Option<csv::Writer<File>>,
}

impl FileSink {
    /// Create a new FileSink. The file itself is opened lazily on the first
    /// write, so a missed date boundary at startup cannot leave a stale
    /// handle open.
    pub fn new(name: impl Into<String>, config: FileSinkConfig) -> Self {
        Self {
            name: name.into(),
            config,
            current_path: None,
            writer: None,
        }
    }

    /// Create from params map (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, String> {
        let config = FileSinkConfig::from_params(params)?;
        Ok(Self::new(name, config))
    }

    /// Substitute `{date}` in the template for the given capture time.
    fn render_path(&self, timestamp: DateTime<Utc>) -> PathBuf {
        let date = timestamp.format("%Y-%m-%d").to_string();
        PathBuf::from(self.config.path_template.replace("{date}", &date))
    }

    /// Open the target file (creating parents), writing the comment header
    /// into files we create. Rotates away from a previously open file.
    fn ensure_writer(&mut self, path: &Path) -> std::io::Result<()> {
        if self.writer.is_some() && self.current_path.as_deref() == Some(path) {
            return Ok(());
        }

        if let Some(mut old) = self.writer.take() {
            let _ = old.flush();
            info!(sink = %self.name, path = %path.display(), "rotating to new file");
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let is_new = !path.exists();
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if is_new {
            write_header(&mut file)?;
        }

        self.writer = Some(csv::WriterBuilder::new().flexible(true).from_writer(file));
        self.current_path = Some(path.to_path_buf());
        debug!(sink = %self.name, path = %path.display(), new = is_new, "file opened");
        Ok(())
    }

    fn append_row(&mut self, reading: &Reading) -> std::io::Result<()> {
        let path = self.render_path(reading.timestamp);
        self.ensure_writer(&path)?;

        let mut record = Vec::with_capacity(reading.values.len() + 3);
        record.push(
            reading
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Micros, true),
        );
        record.push(reading.device_id.to_string());
        record.push(reading.seq.to_string());
        for value in &reading.values {
            record.push(value.to_string());
        }

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| std::io::Error::other("file writer unavailable"))?;
        writer.write_record(&record).map_err(std::io::Error::other)?;
        writer.flush()
    }
}

/// Comment block written at the top of every file this sink creates.
fn write_header(file: &mut File) -> std::io::Result<()> {
    let started = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    writeln!(
        file,
        "# Generated by lablogger v{}",
        env!("CARGO_PKG_VERSION")
    )?;
    writeln!(file, "# Log started at UTC: {started}")?;
    writeln!(file, "# columns: timestamp,device_id,seq,values...")
}

impl DataSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "file_sink_write",
        skip(self, reading),
        fields(sink = %self.name, device = %reading.device_id)
    )]
    async fn write(&mut self, reading: &Reading) -> Result<(), ContractError> {
        self.append_row(reading).map_err(|e| {
            error!(sink = %self.name, device = %reading.device_id, error = %e, "write failed");
            // drop the handle so the next write reopens the file
            self.writer = None;
            self.current_path = None;
            ContractError::sink_write(&self.name, e.to_string())
        })
    }

    #[instrument(name = "file_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        if let Some(writer) = self.writer.as_mut() {
            writer
                .flush()
                .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
        }
        Ok(())
    }

    #[instrument(name = "file_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
        }
        self.current_path = None;
        debug!(sink = %self.name, "file sink closed");
        Ok(())
    }
}
