use std::io;
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

/// A named thread of the relay session (client-receiver, backend-sender, ...).
#[derive(Debug)]
pub struct Task {
    name: String,
    handle: JoinHandle<()>,
}

impl Task {
    pub fn spawn<F>(name: impl Into<String>, f: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let handle = thread::Builder::new().name(name.clone()).spawn(f)?;
        Ok(Self { name, handle })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) {
        match self.handle.join() {
            Ok(()) => debug!(task = %self.name, "Task finished"),
            Err(_) => error!(task = %self.name, "Task panicked"),
        }
    }
}
