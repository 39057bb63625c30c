//! Debug Adapter Protocol relay for Python code running inside a host
//! application.
//!
//! The relay sits between a DAP client on stdin/stdout and a remote Python
//! debugger that the host application only starts on demand. It answers
//! `initialize` itself, bootstraps the remote debugger through the host's
//! command socket on `attach`, then bridges both framed streams while
//! rewriting the few messages the remote side expects differently.

pub mod bootstrap;
pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod inject;
pub mod interceptor;
pub mod log;
pub mod protocol;
pub mod queue;
pub mod relay;
pub mod server;
pub mod task;
pub mod templates;

#[cfg(test)]
mod testing;

pub use relay::Relay;
pub use server::start;
