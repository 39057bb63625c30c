use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Command server embedded in the target application
    pub command_addr: String,
    /// Remote-debug library the injected code puts on `sys.path`
    pub debugpy_path: PathBuf,
    /// Directory receiving the injected script file
    pub script_dir: PathBuf,
    /// Session log file, `None` disables file logging
    pub log_file: Option<PathBuf>,
    pub log_level: String,
    /// Attach-arguments object holding the backend `host` and `port`
    pub backend_key: String,
    pub connect_attempts: u32,
    pub connect_retry_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let exe_dir = env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            command_addr: "localhost:8888".to_string(),
            debugpy_path: exe_dir.join("python"),
            script_dir: env::temp_dir(),
            log_file: Some(env::temp_dir().join("dap-relay.log")),
            log_level: "dap_relay=debug".to_string(),
            backend_key: "debugpy".to_string(),
            connect_attempts: 1,
            connect_retry_delay: Duration::from_millis(500),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("DAP_RELAY_COMMAND_ADDR") {
            config.command_addr = addr;
        }

        if let Some(path) = lookup("DAP_RELAY_DEBUGPY_PATH") {
            config.debugpy_path = PathBuf::from(path);
        }

        if let Some(dir) = lookup("DAP_RELAY_SCRIPT_DIR") {
            config.script_dir = PathBuf::from(dir);
        }

        if let Some(log_file) = lookup("DAP_RELAY_LOG_FILE") {
            config.log_file = match log_file.trim() {
                "" | "off" | "none" => None,
                path => Some(PathBuf::from(path)),
            };
        }

        if let Some(log_level) = lookup("RUST_LOG") {
            config.log_level = log_level;
        } else if let Some(log_level) = lookup("DAP_RELAY_LOG_LEVEL") {
            config.log_level = log_level;
        }

        if let Some(key) = lookup("DAP_RELAY_BACKEND_KEY") {
            config.backend_key = key;
        }

        if let Some(attempts) = lookup("DAP_RELAY_CONNECT_ATTEMPTS") {
            match attempts.parse::<u32>() {
                Ok(attempts) => config.connect_attempts = attempts.max(1),
                Err(_) => eprintln!(
                    "Warning: Invalid DAP_RELAY_CONNECT_ATTEMPTS value '{}', using default {}",
                    attempts, config.connect_attempts
                ),
            }
        }

        if let Some(delay) = lookup("DAP_RELAY_CONNECT_RETRY_MS") {
            match delay.parse::<u64>() {
                Ok(ms) => config.connect_retry_delay = Duration::from_millis(ms),
                Err(_) => eprintln!(
                    "Warning: Invalid DAP_RELAY_CONNECT_RETRY_MS value '{}', using default {}",
                    delay,
                    config.connect_retry_delay.as_millis()
                ),
            }
        }

        config
    }

    /// Script file the injected code is written to before execution.
    pub fn script_path(&self) -> PathBuf {
        self.script_dir.join("temp.py")
    }
}
