use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use crate::error::{RelayError, Result};
use crate::inject::CodeInjector;

/// In-memory writer whose clones share one buffer.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().unwrap().clone()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Injector that records the code instead of sending it.
#[derive(Default)]
pub struct RecordingInjector {
    pub sent: Mutex<Vec<String>>,
    pub refuse: bool,
}

impl RecordingInjector {
    pub fn refusing() -> Self {
        Self {
            sent: Mutex::default(),
            refuse: true,
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

impl CodeInjector for RecordingInjector {
    fn inject(&self, code: &str) -> Result<()> {
        if self.refuse {
            return Err(RelayError::CommandSocket {
                addr: "localhost:8888".to_string(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
            });
        }
        self.sent.lock().unwrap().push(code.to_string());
        Ok(())
    }
}
