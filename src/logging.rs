//! Log sink
//!
//! One line per event:
//!
//! ```text
//! 03/15/2027 14:02:11 : ERROR intersect: Failed to read certificates from EX02 Error: timed out
//! ```
//!
//! Timestamps are UTC, matching the expiry dates in candidate labels.
//!
//! The prefix is the event's `prefix` field when given, otherwise the current
//! span's name, otherwise the last segment of the event target. An `error`
//! field is rendered as the trailing `Error: <detail>` part.

use std::fmt::{self, Write as _};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use time::macros::format_description;
use time::OffsetDateTime;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::LoggingConfig;
use crate::model::DATE_FORMAT;

const TIME_FORMAT: &[time::format_description::BorrowedFormatItem<'static>] =
    format_description!("[hour]:[minute]:[second]");

/// Install the process-wide subscriber
///
/// `debug` forces DEBUG regardless of the configured level.
pub fn init(config: &LoggingConfig, debug: bool) -> anyhow::Result<()> {
    let level = if debug {
        "debug".to_string()
    } else {
        config.level.clone()
    };
    let filter = EnvFilter::try_new(&level)?;

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .event_format(LineFormat)
        .with_writer(LogSink::from_config(config))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

/// Event formatter producing `<date> <time> : <LEVEL> <prefix>: <message>[ Error: <detail>]`
#[derive(Debug, Clone, Copy, Default)]
pub struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let mut fields = LineFields::default();
        event.record(&mut fields);

        let prefix = fields
            .prefix
            .or_else(|| ctx.lookup_current().map(|span| span.name().to_string()))
            .unwrap_or_else(|| target_tail(meta.target()).to_string());

        let now = OffsetDateTime::now_utc();
        let date = now.format(DATE_FORMAT).map_err(|_| fmt::Error)?;
        let clock = now.format(TIME_FORMAT).map_err(|_| fmt::Error)?;

        write!(
            writer,
            "{date} {clock} : {} {prefix}: {}{}",
            meta.level(),
            fields.message,
            fields.extra
        )?;
        if let Some(detail) = fields.error {
            write!(writer, " Error: {detail}")?;
        }
        writeln!(writer)
    }
}

fn target_tail(target: &str) -> &str {
    target.rsplit("::").next().unwrap_or(target)
}

#[derive(Default)]
struct LineFields {
    message: String,
    prefix: Option<String>,
    error: Option<String>,
    extra: String,
}

impl Visit for LineFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "prefix" => self.prefix = Some(value.to_string()),
            "error" => self.error = Some(value.to_string()),
            name => {
                let _ = write!(self.extra, " {name}={value}");
            }
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{value:?}"),
            "prefix" => self.prefix = Some(format!("{value:?}")),
            "error" => self.error = Some(format!("{value:?}")),
            name => {
                let _ = write!(self.extra, " {name}={value:?}");
            }
        }
    }
}

/// Where formatted lines go
#[derive(Debug, Clone)]
pub enum LogSink {
    Console,
    File(Arc<LazyFile>),
}

impl LogSink {
    pub fn from_config(config: &LoggingConfig) -> Self {
        if config.enabled {
            Self::File(Arc::new(LazyFile::new(&config.file)))
        } else {
            Self::Console
        }
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = SinkWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        SinkWriter { sink: self }
    }
}

/// Writer handed out per event
pub struct SinkWriter<'a> {
    sink: &'a LogSink,
}

impl Write for SinkWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.sink {
            LogSink::Console => io::stderr().write(buf),
            LogSink::File(file) => file.append(buf).map(|()| buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.sink {
            LogSink::Console => io::stderr().flush(),
            LogSink::File(file) => file.flush(),
        }
    }
}

/// Append-only log file, opened on first write
#[derive(Debug)]
pub struct LazyFile {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl LazyFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, buf: &[u8]) -> io::Result<()> {
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            *guard = Some(file);
        }
        match guard.as_mut() {
            Some(file) => file.write_all(buf),
            None => Ok(()),
        }
    }

    fn flush(&self) -> io::Result<()> {
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{error, info, warn};

    fn file_subscriber(path: PathBuf) -> impl Subscriber + Send + Sync {
        FmtSubscriber::builder()
            .with_env_filter(EnvFilter::new("info"))
            .event_format(LineFormat)
            .with_writer(LogSink::File(Arc::new(LazyFile::new(path))))
            .finish()
    }

    #[test]
    fn test_file_created_on_first_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("hybrid-cert.log");
        let subscriber = file_subscriber(path.clone());

        tracing::subscriber::with_default(subscriber, || {
            assert!(!path.exists());
            info!("first line");
        });

        assert!(path.exists());
    }

    #[test]
    fn test_line_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hybrid-cert.log");
        let subscriber = file_subscriber(path.clone());

        tracing::subscriber::with_default(subscriber, || {
            info!(prefix = "Get-Servers", "Found {} servers", 2);
            error!(error = "access denied", "Failed to bind certificate");
            warn!(server = "EX01", "No suitable certificate");
        });

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);

        // "MM/DD/YYYY HH:MM:SS : "
        let (stamp, rest) = lines[0].split_once(" : ").unwrap();
        assert_eq!(stamp.len(), "03/15/2027 14:02:11".len());
        let today = OffsetDateTime::now_utc().format(DATE_FORMAT).unwrap();
        assert!(stamp.starts_with(&today));
        assert_eq!(rest, "INFO Get-Servers: Found 2 servers");

        assert!(lines[1].ends_with(" : ERROR tests: Failed to bind certificate Error: access denied"));
        assert!(lines[2].ends_with(" : WARN tests: No suitable certificate server=EX01"));
    }

    #[test]
    fn test_lines_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hybrid-cert.log");
        std::fs::write(&path, "existing\n").unwrap();

        tracing::subscriber::with_default(file_subscriber(path.clone()), || {
            info!("appended");
        });

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("existing\n"));
        assert!(content.contains("appended"));
    }

    #[test]
    fn test_target_tail() {
        assert_eq!(target_tail("hybrid_cert::directory::shell"), "shell");
        assert_eq!(target_tail("apply"), "apply");
    }
}
