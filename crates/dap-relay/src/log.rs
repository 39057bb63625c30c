use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

use crate::config::Config;

/// Log sink shared by every task. stdout carries the DAP client stream, so
/// log lines only ever go to the session log file.
#[derive(Clone, Default)]
pub struct SessionLogWriter {
    file: Option<Arc<Mutex<File>>>,
}

impl SessionLogWriter {
    /// Opens `path`, truncating the previous session's log.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file: Some(Arc::new(Mutex::new(file))),
        })
    }

    /// Writer that drops everything.
    pub fn disabled() -> Self {
        Self::default()
    }
}

impl Write for SessionLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file {
            Some(ref file) => file
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .write_all(buf)
                .map(|()| buf.len()),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file {
            Some(ref file) => file.lock().unwrap_or_else(PoisonError::into_inner).flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for SessionLogWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Installs the global subscriber. Failing to open the log file disables file
/// logging instead of aborting the session.
pub fn init(config: &Config) {
    let writer = match config.log_file {
        Some(ref path) => SessionLogWriter::create(path).unwrap_or_else(|e| {
            eprintln!(
                "Warning: Cannot open log file '{}': {}, logging disabled",
                path.display(),
                e
            );
            SessionLogWriter::disabled()
        }),
        None => SessionLogWriter::disabled(),
    };

    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("dap_relay=debug"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_thread_names(true)
        .with_writer(writer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_create_truncates_previous_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.log");
        fs::write(&path, "previous session\n").unwrap();

        let mut writer = SessionLogWriter::create(&path).unwrap();
        writer.write_all(b"new session\n").unwrap();
        writer.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new session\n");
    }

    #[test]
    fn test_clones_share_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.log");

        let writer = SessionLogWriter::create(&path).unwrap();
        writer.make_writer().write_all(b"a").unwrap();
        writer.make_writer().write_all(b"b").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "ab");
    }

    #[test]
    fn test_disabled_writer_accepts_everything() {
        let mut writer = SessionLogWriter::disabled();
        assert_eq!(writer.write(b"dropped").unwrap(), 7);
        assert!(writer.flush().is_ok());
    }
}
