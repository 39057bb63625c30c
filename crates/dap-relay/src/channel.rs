//! Channel endpoints: a receive loop and a sender task over one stream.
//!
//! The client channel runs over stdin/stdout, the backend channel over the
//! TCP connection to the remote debugger. Both close for good on the first
//! read or write failure; there is no reconnect.

use std::io::{self, BufRead, BufReader, Read, Write};

use tracing::{debug, error, info};

use crate::codec::MessageReader;
use crate::queue::{self, QueueReceiver};
use crate::task::Task;

/// Tasks of one open channel.
#[derive(Debug)]
pub struct ChannelTasks {
    pub receiver: Task,
    pub sender: Task,
}

/// Starts the sender task draining `outbound` into `writer` and the receive
/// loop handing every message read from `reader` to `on_receive`.
/// `on_close` runs on the receiver task once the receive loop has ended.
pub fn open<R, W, F, C>(
    name: &'static str,
    reader: R,
    writer: W,
    outbound: QueueReceiver,
    on_receive: F,
    on_close: C,
) -> io::Result<ChannelTasks>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
    F: FnMut(String) + Send + 'static,
    C: FnOnce() + Send + 'static,
{
    let sender = queue::spawn_sender(name, outbound, writer)?;
    let receiver = Task::spawn(format!("{name}-receiver"), move || {
        receive_loop(name, BufReader::new(reader), on_receive);
        on_close();
    })?;

    info!(channel = name, "Channel open");
    Ok(ChannelTasks { receiver, sender })
}

/// Calls `on_receive` for each message in arrival order until end of stream
/// or the first decode failure.
pub fn receive_loop<R, F>(name: &str, reader: R, mut on_receive: F)
where
    R: BufRead,
    F: FnMut(String),
{
    for message in MessageReader::new(reader) {
        match message {
            Ok(message) => {
                debug!(channel = name, message = %message, "Received");
                on_receive(message);
            }
            Err(e) => {
                error!(channel = name, error = %e, "Failed to read message, closing channel");
                return;
            }
        }
    }

    info!(channel = name, "Stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, encode};
    use crate::queue::outbound_queue;
    use crate::testing::SharedBuffer;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_receive_loop_in_order() {
        let mut input = encode("first");
        input.extend(encode("second"));

        let mut received = Vec::new();
        receive_loop("test", Cursor::new(input), |m| received.push(m));
        assert_eq!(received, vec!["first", "second"]);
    }

    #[test]
    fn test_receive_loop_stops_on_truncated_frame() {
        let mut input = encode("complete");
        input.extend(b"Content-Length: 50\r\n\r\npartial");
        input.extend(encode("never"));

        let mut received = Vec::new();
        receive_loop("test", Cursor::new(input), |m| received.push(m));
        assert_eq!(received, vec!["complete"]);
    }

    #[test]
    fn test_open_relays_both_directions() {
        let (tx, rx) = outbound_queue();
        let out = SharedBuffer::default();
        let received = Arc::new(Mutex::new(Vec::new()));

        let reply = tx.clone();
        let sink = Arc::clone(&received);
        let tasks = open(
            "test",
            Cursor::new(encode(r#"{"seq":1}"#)),
            out.clone(),
            rx,
            move |message| {
                sink.lock().unwrap().push(message.clone());
                reply.push(format!("echo:{message}"));
            },
            || {},
        )
        .unwrap();

        tasks.receiver.join();
        tx.stop();
        tasks.sender.join();

        assert_eq!(*received.lock().unwrap(), vec![r#"{"seq":1}"#]);
        let mut written = BufReader::new(Cursor::new(out.contents()));
        assert_eq!(
            codec::read_message(&mut written).unwrap().as_deref(),
            Some(r#"echo:{"seq":1}"#)
        );
    }

    #[test]
    fn test_on_close_runs_after_last_message() {
        let (_tx, rx) = outbound_queue();
        let events = Arc::new(Mutex::new(Vec::new()));

        let on_message = Arc::clone(&events);
        let on_close = Arc::clone(&events);
        let tasks = open(
            "test",
            Cursor::new(encode("only")),
            SharedBuffer::default(),
            rx,
            move |message| on_message.lock().unwrap().push(message),
            move || on_close.lock().unwrap().push("closed".to_string()),
        )
        .unwrap();

        tasks.receiver.join();
        assert_eq!(*events.lock().unwrap(), vec!["only", "closed"]);
    }
}
