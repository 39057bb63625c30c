//! Two-stage remote setup triggered by the client's `attach`.
//!
//! 1. inject the attach code, which makes the host application listen for
//!    the remote debugger
//! 2. render the run code, kept until the backend reports `configurationDone`
//! 3. connect to the remote debugger
//!
//! The relay opens the backend channel on the returned connection.

use std::io;
use std::net::TcpStream;
use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{RelayError, Result};
use crate::inject::CodeInjector;
use crate::protocol::AttachConfig;
use crate::templates::{AttachCode, RunCode};

pub struct Bootstrap<'a> {
    injector: &'a dyn CodeInjector,
    debugpy_path: &'a Path,
    connect_attempts: u32,
    retry_delay: Duration,
}

impl<'a> Bootstrap<'a> {
    pub fn new(
        injector: &'a dyn CodeInjector,
        debugpy_path: &'a Path,
        connect_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            injector,
            debugpy_path,
            connect_attempts: connect_attempts.max(1),
            retry_delay,
        }
    }

    /// Step 1: start the remote debugger inside the host application.
    /// Returns the code that was sent.
    pub fn inject_attach_code(&self, attach: &AttachConfig) -> Result<String> {
        let code = AttachCode {
            library_path: self.debugpy_path,
            interpreter: &attach.interpreter,
            host: &attach.host,
            port: attach.port,
        }
        .render();

        self.injector.inject(&code)?;
        info!(code = %code, "Sent attach code");
        Ok(code)
    }

    /// Step 2: code importing the user's module, sent after configuration.
    pub fn render_run_code(&self, attach: &AttachConfig) -> String {
        RunCode {
            working_dir: attach.program_dir(),
            module: &attach.module_name(),
        }
        .render()
    }

    /// Step 3: connect to the remote debugger. A single attempt unless more
    /// were configured.
    pub fn connect_backend(&self, attach: &AttachConfig) -> Result<TcpStream> {
        let addr = attach.address();
        let mut last_error = None;

        for attempt in 1..=self.connect_attempts {
            info!(addr = %addr, attempt, "Connecting to the remote debugger");
            match TcpStream::connect((attach.host.as_str(), attach.port)) {
                Ok(stream) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!(error = %e, "Failed to disable Nagle on the backend socket");
                    }
                    info!(addr = %addr, "Connected to the remote debugger");
                    return Ok(stream);
                }
                Err(e) => {
                    warn!(addr = %addr, attempt, error = %e, "Connection attempt failed");
                    last_error = Some(e);
                    if attempt < self.connect_attempts {
                        thread::sleep(self.retry_delay);
                    }
                }
            }
        }

        Err(RelayError::BackendConnect {
            addr,
            source: last_error.unwrap_or_else(|| io::Error::other("no connection attempt made")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingInjector;
    use std::net::TcpListener;
    use std::path::PathBuf;

    fn attach(port: u16) -> AttachConfig {
        AttachConfig {
            program: "/scripts/tools/render.py".to_string(),
            interpreter: "/usr/bin/python2".to_string(),
            host: "127.0.0.1".to_string(),
            port,
        }
    }

    #[test]
    fn test_inject_attach_code() {
        let injector = RecordingInjector::default();
        let path = PathBuf::from("/opt/debugpy");
        let bootstrap = Bootstrap::new(&injector, &path, 1, Duration::ZERO);

        let code = bootstrap.inject_attach_code(&attach(7004)).unwrap();

        let sent = injector.sent();
        assert_eq!(sent, vec![code]);
        assert!(sent[0].contains(r#"debugpy.listen((r"127.0.0.1",7004))"#));
        assert!(sent[0].contains(r#"debugpy_module = r"/opt/debugpy""#));
    }

    #[test]
    fn test_inject_failure_is_command_socket_error() {
        let injector = RecordingInjector::refusing();
        let path = PathBuf::from("/opt/debugpy");
        let bootstrap = Bootstrap::new(&injector, &path, 1, Duration::ZERO);

        let err = bootstrap.inject_attach_code(&attach(7004)).unwrap_err();
        assert!(err.to_string().starts_with("Could not connect to the target application"));
    }

    #[test]
    fn test_render_run_code_does_not_send() {
        let injector = RecordingInjector::default();
        let path = PathBuf::from("/opt/debugpy");
        let bootstrap = Bootstrap::new(&injector, &path, 1, Duration::ZERO);

        let code = bootstrap.render_run_code(&attach(7004));
        assert!(code.contains(r#"current_directory = r"/scripts/tools""#));
        assert!(code.contains("import render"));
        assert!(injector.sent().is_empty());
    }

    #[test]
    fn test_connect_backend() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let injector = RecordingInjector::default();
        let path = PathBuf::from("/opt/debugpy");
        let bootstrap = Bootstrap::new(&injector, &path, 1, Duration::ZERO);

        let stream = bootstrap.connect_backend(&attach(port)).unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);
    }

    #[test]
    fn test_connect_backend_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let injector = RecordingInjector::default();
        let path = PathBuf::from("/opt/debugpy");
        let bootstrap = Bootstrap::new(&injector, &path, 2, Duration::from_millis(1));

        let err = bootstrap.connect_backend(&attach(port)).unwrap_err();
        assert!(matches!(err, RelayError::BackendConnect { .. }));
    }
}
