//! Relay core: routes messages between the DAP client and the remote
//! debugger through the interceptor and owns the session state.
//!
//! Tasks of a session:
//! - `client-receiver` / `client-sender` over the client stream
//! - `bootstrap`, spawned by the first `attach`
//! - `backend-receiver` / `backend-sender`, once the backend is connected
//! - `run-code`, spawned by the first `configurationDone`
//!
//! They share only the two outbound queues and [`SessionState`].

use std::collections::HashSet;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tracing::{debug, error, info, warn};

use crate::bootstrap::Bootstrap;
use crate::channel::{self, ChannelTasks};
use crate::config::Config;
use crate::error::RelayError;
use crate::inject::CodeInjector;
use crate::interceptor::{self, BackendAction, ClientAction};
use crate::protocol::{self, AttachConfig};
use crate::queue::{QueueReceiver, QueueSender, outbound_queue};
use crate::task::Task;

/// State of the single debug session handled by the process.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub last_client_seq: Option<i64>,
    /// Client requests already answered by the relay; the backend's answers
    /// to them are not relayed.
    pub processed_seqs: HashSet<i64>,
    pub attach_config: Option<AttachConfig>,
    pub continue_requested: bool,
}

#[derive(Debug, Default)]
struct BackendSlot {
    stream: Option<TcpStream>,
    closing: bool,
}

pub struct Relay {
    config: Config,
    injector: Arc<dyn CodeInjector>,
    client: QueueSender,
    backend: QueueSender,
    client_outbound: Mutex<Option<QueueReceiver>>,
    /// Created with the session so early client messages wait here while the
    /// bootstrap is in flight.
    backend_outbound: Mutex<Option<QueueReceiver>>,
    session: Mutex<SessionState>,
    attach_code: OnceLock<String>,
    run_code: OnceLock<String>,
    run_code_sent: AtomicBool,
    bootstrap_started: AtomicBool,
    backend_stream: Mutex<BackendSlot>,
    tasks: Mutex<Vec<Task>>,
    // seq 1 belongs to the synthetic initialize response
    synthetic_seq: AtomicI64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Relay {
    pub fn new(config: Config, injector: Arc<dyn CodeInjector>) -> Arc<Self> {
        let (client, client_outbound) = outbound_queue();
        let (backend, backend_outbound) = outbound_queue();

        Arc::new(Self {
            config,
            injector,
            client,
            backend,
            client_outbound: Mutex::new(Some(client_outbound)),
            backend_outbound: Mutex::new(Some(backend_outbound)),
            session: Mutex::default(),
            attach_code: OnceLock::new(),
            run_code: OnceLock::new(),
            run_code_sent: AtomicBool::new(false),
            bootstrap_started: AtomicBool::new(false),
            backend_stream: Mutex::default(),
            tasks: Mutex::default(),
            synthetic_seq: AtomicI64::new(2),
        })
    }

    /// Runs the session over the client stream and tears it down once the
    /// client stream ends.
    pub fn serve<R, W>(self: &Arc<Self>, reader: R, writer: W) -> io::Result<()>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let outbound = lock(&self.client_outbound)
            .take()
            .ok_or_else(|| io::Error::other("client channel already open"))?;

        let relay = Arc::clone(self);
        let ChannelTasks { receiver, sender } =
            channel::open(
                "client",
                reader,
                writer,
                outbound,
                move |message| relay.on_client_message(message),
                || {},
            )?;
        self.track(sender);

        receiver.join();
        info!("Client stream closed, ending session");
        self.shutdown();
        Ok(())
    }

    /// Snapshot of the session state.
    pub fn session(&self) -> SessionState {
        lock(&self.session).clone()
    }

    /// Code injected to start the remote debugger, once the bootstrap sent it.
    pub fn attach_code(&self) -> Option<&str> {
        self.attach_code.get().map(String::as_str)
    }

    /// Code importing the user's module, rendered during the bootstrap.
    pub fn run_code(&self) -> Option<&str> {
        self.run_code.get().map(String::as_str)
    }

    /// Client -> backend. Runs on the client receive loop and never waits on
    /// the backend.
    pub fn on_client_message(self: &Arc<Self>, text: String) {
        let intercept = interceptor::intercept_client(text, &self.config.backend_key);
        if let Some(seq) = intercept.seq {
            lock(&self.session).last_client_seq = Some(seq);
        }

        match intercept.action {
            ClientAction::Initialize => {
                // Recorded before forwarding, the backend's answer may come back
                // at any time after that.
                if let Some(seq) = intercept.seq {
                    lock(&self.session).processed_seqs.insert(seq);
                }
                self.client.push(protocol::initialize_response());
                debug!(seq = ?intercept.seq, "Answered initialize locally");
            }
            ClientAction::Attach(attach) => self.start_bootstrap(intercept.seq, attach),
            ClientAction::InvalidAttach(e) => {
                error!(error = %e, "Cannot bootstrap the remote debugger");
                self.report_error(intercept.seq, "attach", &e);
            }
            ClientAction::Continue => {
                lock(&self.session).continue_requested = true;
                debug!(seq = ?intercept.seq, "Continue requested");
            }
            ClientAction::Forward => {}
        }

        debug!(message = %intercept.message, "client -> backend");
        self.backend.push(intercept.message);
    }

    /// Backend -> client, in arrival order.
    pub fn on_backend_message(self: &Arc<Self>, text: String) {
        let intercept = {
            let session = lock(&self.session);
            interceptor::intercept_backend(text, &session.processed_seqs)
        };

        match intercept.action {
            BackendAction::Suppress { request_seq } => {
                info!(request_seq, message = %intercept.message, "Already answered locally, not relayed");
            }
            BackendAction::ConfigurationDone => {
                debug!(message = %intercept.message, "backend -> client");
                self.client.push(intercept.message);
                self.send_run_code();
            }
            BackendAction::Relay => {
                debug!(message = %intercept.message, "backend -> client");
                self.client.push(intercept.message);
            }
        }
    }

    fn start_bootstrap(self: &Arc<Self>, seq: Option<i64>, attach: AttachConfig) {
        if self.bootstrap_started.swap(true, Ordering::SeqCst) {
            warn!("Remote debugger already bootstrapped, ignoring repeated attach");
            return;
        }

        lock(&self.session).attach_config = Some(attach.clone());

        let relay = Arc::clone(self);
        match Task::spawn("bootstrap", move || relay.run_bootstrap(seq, &attach)) {
            Ok(task) => self.track(task),
            Err(e) => error!(error = %e, "Failed to spawn bootstrap task"),
        }
    }

    fn run_bootstrap(self: &Arc<Self>, seq: Option<i64>, attach: &AttachConfig) {
        let bootstrap = Bootstrap::new(
            self.injector.as_ref(),
            &self.config.debugpy_path,
            self.config.connect_attempts,
            self.config.connect_retry_delay,
        );

        match bootstrap.inject_attach_code(attach) {
            Ok(code) => {
                let _ = self.attach_code.set(code);
            }
            Err(e) => {
                error!(error = %e, "Failed to inject attach code");
                self.report_error(seq, "attach", &e);
                return;
            }
        }

        let _ = self.run_code.set(bootstrap.render_run_code(attach));

        let stream = match bootstrap.connect_backend(attach) {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "Backend bridging disabled for this session");
                self.report_output(&e.to_string());
                return;
            }
        };

        if let Err(e) = self.open_backend(stream) {
            error!(error = %e, "Failed to open backend channel");
        }
    }

    fn open_backend(self: &Arc<Self>, stream: TcpStream) -> io::Result<()> {
        let mut slot = lock(&self.backend_stream);
        if slot.closing {
            info!("Session ending, dropping backend connection");
            return Ok(());
        }

        let outbound = lock(&self.backend_outbound)
            .take()
            .ok_or_else(|| io::Error::other("backend channel already open"))?;
        let reader = stream.try_clone()?;
        let writer = stream.try_clone()?;
        slot.stream = Some(stream);

        let relay = Arc::clone(self);
        let closed = Arc::clone(self);
        let tasks = channel::open(
            "backend",
            reader,
            writer,
            outbound,
            move |message| relay.on_backend_message(message),
            move || closed.on_backend_closed(),
        )?;
        drop(slot);

        self.track(tasks.receiver);
        self.track(tasks.sender);
        Ok(())
    }

    /// Ends the backend channel after its stream closed or failed. Messages
    /// the client sends from now on are dropped instead of written to a dead
    /// peer.
    fn on_backend_closed(&self) {
        {
            let mut slot = lock(&self.backend_stream);
            if slot.closing {
                return;
            }
            slot.closing = true;
            if let Some(stream) = slot.stream.take()
                && let Err(e) = stream.shutdown(Shutdown::Both)
            {
                debug!(error = %e, "Backend socket already closed");
            }
        }

        self.backend.stop();
        warn!("Remote debugger connection closed");
        self.report_output("Connection to the remote debugger was closed.");
    }

    /// Sends the deferred run code on its own task, at most once per session.
    fn send_run_code(self: &Arc<Self>) {
        if self.run_code.get().is_none() {
            warn!("configurationDone received before the run code was rendered");
            return;
        }
        if self.run_code_sent.swap(true, Ordering::SeqCst) {
            debug!("Run code already sent");
            return;
        }

        let relay = Arc::clone(self);
        match Task::spawn("run-code", move || relay.inject_run_code()) {
            Ok(task) => self.track(task),
            Err(e) => error!(error = %e, "Failed to spawn run code task"),
        }
    }

    fn inject_run_code(&self) {
        let Some(code) = self.run_code.get() else {
            return;
        };

        match self.injector.inject(code) {
            Ok(()) => info!(code = %code, "Sent run code"),
            Err(e) => {
                error!(error = %e, "Failed to send run code");
                self.report_output(&e.to_string());
            }
        }
    }

    /// Surfaces a failure of the client request `seq` in the debug console
    /// and as a failed response.
    fn report_error(&self, seq: Option<i64>, command: &str, err: &RelayError) {
        let text = err.to_string();
        self.report_output(&text);

        if let Some(seq) = seq {
            lock(&self.session).processed_seqs.insert(seq);
            self.client
                .push(protocol::error_response(self.next_seq(), seq, command, &text));
        }
    }

    fn report_output(&self, text: &str) {
        self.client
            .push(protocol::output_event(self.next_seq(), "stderr", &format!("{text}\n")));
    }

    fn next_seq(&self) -> i64 {
        self.synthetic_seq.fetch_add(1, Ordering::Relaxed)
    }

    fn track(&self, task: Task) {
        lock(&self.tasks).push(task);
    }

    /// Stops both sender tasks after their queued messages, closes the backend
    /// socket and joins every task of the session.
    pub fn shutdown(&self) {
        {
            let mut slot = lock(&self.backend_stream);
            slot.closing = true;
            if let Some(stream) = slot.stream.take()
                && let Err(e) = stream.shutdown(Shutdown::Both)
            {
                debug!(error = %e, "Backend socket already closed");
            }
        }

        self.client.stop();
        self.backend.stop();

        loop {
            let tasks = std::mem::take(&mut *lock(&self.tasks));
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                debug!(task = task.name(), "Joining task");
                task.join();
            }
        }

        info!("Session ended");
    }
}
