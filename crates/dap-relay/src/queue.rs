//! Outbound queues and the sender tasks draining them.

use std::io::{self, Write};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error};

use crate::codec;
use crate::task::Task;

/// Item carried by an outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized message to frame and write
    Message(String),
    /// Orderly shutdown of the sender task
    Stop,
}

/// Producer side of an outbound queue. Cloning it adds producers, the
/// queue keeps a single consumer.
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: Sender<Outbound>,
}

/// Consumer side of an outbound queue, owned by exactly one sender task.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: Receiver<Outbound>,
}

/// Creates an unbounded outbound queue.
pub fn outbound_queue() -> (QueueSender, QueueReceiver) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (QueueSender { tx }, QueueReceiver { rx })
}

impl QueueSender {
    /// Enqueues `message`. Never blocks.
    pub fn push(&self, message: impl Into<String>) {
        if self.tx.send(Outbound::Message(message.into())).is_err() {
            debug!("Outbound queue closed, message dropped");
        }
    }

    /// Enqueues the shutdown sentinel. Messages queued before it are still sent.
    pub fn stop(&self) {
        let _ = self.tx.send(Outbound::Stop);
    }
}

impl QueueReceiver {
    /// Blocks until a message is available. Returns `None` on the sentinel or
    /// when every producer is gone.
    pub fn pop(&self) -> Option<String> {
        match self.rx.recv() {
            Ok(Outbound::Message(message)) => Some(message),
            Ok(Outbound::Stop) | Err(_) => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn pop_timeout(&self, timeout: std::time::Duration) -> Option<Outbound> {
        self.rx.recv_timeout(timeout).ok()
    }
}

/// Spawns the sender task for `queue` writing framed messages to `writer`.
pub fn spawn_sender<W>(name: &'static str, queue: QueueReceiver, mut writer: W) -> io::Result<Task>
where
    W: Write + Send + 'static,
{
    Task::spawn(format!("{name}-sender"), move || {
        drain(name, &queue, &mut writer)
    })
}

/// Pops and writes until the sentinel. The first write failure ends the task;
/// the failed message is not retried and nothing is requeued.
pub fn drain<W: Write>(name: &str, queue: &QueueReceiver, writer: &mut W) {
    while let Some(message) = queue.pop() {
        if let Err(e) = codec::write_message(writer, &message) {
            error!(channel = name, error = %e, "Failed to write message, closing channel");
            return;
        }
        debug!(channel = name, message = %message, "Sent");
    }

    debug!(channel = name, "Sender stopped");
}
