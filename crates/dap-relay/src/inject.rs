//! Delivery of Python code to the target application's command server.

use std::fs;
use std::io::{self, Write};
use std::net::TcpStream;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::error::{RelayError, Result};
use crate::templates;

/// Sends code to the interpreter embedded in the target application.
pub trait CodeInjector: Send + Sync {
    fn inject(&self, code: &str) -> Result<()>;
}

/// Injector backed by the command socket of the host application.
///
/// The code is written to a script file, then a one-shot connection delivers
/// the wrapper executing it. No response is read.
#[derive(Debug, Clone)]
pub struct CommandSocket {
    addr: String,
    script_path: PathBuf,
}

impl CommandSocket {
    pub fn new(addr: impl Into<String>, script_path: PathBuf) -> Self {
        Self {
            addr: addr.into(),
            script_path,
        }
    }

    fn failure(&self, source: io::Error) -> RelayError {
        RelayError::CommandSocket {
            addr: self.addr.clone(),
            source,
        }
    }
}

impl CodeInjector for CommandSocket {
    fn inject(&self, code: &str) -> Result<()> {
        fs::write(&self.script_path, code).map_err(|e| self.failure(e))?;
        debug!(path = %self.script_path.display(), "Wrote injected script");

        let command = templates::host_command(&self.script_path);
        info!(addr = %self.addr, "Sending code to the target application");

        let mut stream = TcpStream::connect(&self.addr).map_err(|e| self.failure(e))?;
        stream
            .write_all(command.as_bytes())
            .and_then(|()| stream.flush())
            .map_err(|e| self.failure(e))?;

        info!("Code delivered");
        Ok(())
    }
}
