use std::borrow::Cow;
use std::io;

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Error, Debug, Diagnostic)]
pub enum RelayError {
    #[error(
        "Could not connect to the target application at {addr}: {source}\n\nPlease ensure the application is running. If this is your first time using the debug adapter, try restarting the application."
    )]
    #[diagnostic(
        code(dap_relay::command_socket),
        help("The command server inside the target application must be listening before attaching.")
    )]
    CommandSocket {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to connect to the remote debugger at {addr}: {source}")]
    #[diagnostic(code(dap_relay::backend_connect))]
    BackendConnect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("Malformed message: {0}")]
    #[diagnostic(code(dap_relay::malformed_message))]
    MalformedMessage(#[from] serde_json::Error),
    #[error("Invalid attach arguments: {0}")]
    #[diagnostic(
        code(dap_relay::attach_arguments),
        help("The attach configuration needs `program`, `interpreter` and a backend `host`/`port`.")
    )]
    AttachArguments(Cow<'static, str>),
    #[error("I/O error: {0}")]
    #[diagnostic(code(dap_relay::io))]
    Io(#[from] io::Error),
}
