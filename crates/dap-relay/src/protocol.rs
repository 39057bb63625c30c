use std::borrow::Cow;

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::error::{RelayError, Result};

/// DAP message kind, from the `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
    Event,
}

/// A decoded DAP message. Only the fields the relay routes on are exposed,
/// everything else is carried through untouched.
#[derive(Debug, Clone)]
pub struct DapMessage {
    raw: Value,
}

impl DapMessage {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(Self {
            raw: serde_json::from_str(text)?,
        })
    }

    pub fn kind(&self) -> Option<MessageKind> {
        match self.raw.get("type")?.as_str()? {
            "request" => Some(MessageKind::Request),
            "response" => Some(MessageKind::Response),
            "event" => Some(MessageKind::Event),
            _ => None,
        }
    }

    pub fn seq(&self) -> Option<i64> {
        self.raw.get("seq").and_then(as_seq)
    }

    pub fn request_seq(&self) -> Option<i64> {
        self.raw.get("request_seq").and_then(as_seq)
    }

    pub fn command(&self) -> Option<&str> {
        self.raw.get("command").and_then(Value::as_str)
    }

    pub fn event(&self) -> Option<&str> {
        self.raw.get("event").and_then(Value::as_str)
    }

    pub fn arguments(&self) -> Option<&Value> {
        self.raw.get("arguments")
    }

    pub fn set_arguments(&mut self, arguments: Value) {
        if let Some(object) = self.raw.as_object_mut() {
            object.insert("arguments".to_string(), arguments);
        }
    }

    pub fn body_mut(&mut self) -> Option<&mut Value> {
        self.raw.get_mut("body")
    }

    pub fn to_json(&self) -> String {
        self.raw.to_string()
    }
}

/// Sequence numbers normally arrive as integers; some backends send them as
/// numeric strings.
fn as_seq(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum PortValue {
    Number(u16),
    Text(String),
}

#[derive(Deserialize, Debug)]
struct BackendAddress {
    host: String,
    port: PortValue,
}

#[derive(Deserialize, Debug)]
struct RawAttachArgs {
    program: String,
    interpreter: Option<String>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

/// The `arguments` of the client's `attach` request, cached for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachConfig {
    pub program: String,
    pub interpreter: String,
    pub host: String,
    pub port: u16,
}

impl AttachConfig {
    /// Reads the attach arguments. The backend host and port live in the
    /// object named `backend_key` (`debugpy` for the stock configuration).
    pub fn from_arguments(arguments: &Value, backend_key: &str) -> Result<Self> {
        let raw = RawAttachArgs::deserialize(arguments)
            .map_err(|e| RelayError::AttachArguments(Cow::Owned(e.to_string())))?;

        let backend = raw.rest.get(backend_key).ok_or_else(|| {
            RelayError::AttachArguments(Cow::Owned(format!("missing `{backend_key}` object")))
        })?;
        let address = BackendAddress::deserialize(backend).map_err(|e| {
            RelayError::AttachArguments(Cow::Owned(format!("`{backend_key}`: {e}")))
        })?;

        let port = match address.port {
            PortValue::Number(port) => port,
            PortValue::Text(text) => text.trim().parse().map_err(|_| {
                RelayError::AttachArguments(Cow::Owned(format!("invalid port `{text}`")))
            })?,
        };

        Ok(Self {
            program: raw.program,
            interpreter: raw.interpreter.unwrap_or_else(|| "python".to_string()),
            host: address.host,
            port,
        })
    }

    /// `host:port` of the remote debugger.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Directory of the program. Both `/` and `\` separate components, the
    /// client may run on another platform than the relay.
    pub fn program_dir(&self) -> &str {
        match self.program.rfind(['/', '\\']) {
            Some(0) => &self.program[..1],
            Some(idx) => &self.program[..idx],
            None => "",
        }
    }

    /// Module imported by the run code: the program's file name without the
    /// `.py` suffix, or the parent directory's name for a path ending in a
    /// separator.
    pub fn module_name(&self) -> String {
        let trimmed = self.program.trim_end_matches(['/', '\\']);
        let file_name = trimmed
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(trimmed);
        file_name
            .strip_suffix(".py")
            .unwrap_or(file_name)
            .to_string()
    }
}

/// Fixed capability advertisement returned for the client's `initialize`.
pub fn initialize_response() -> String {
    json!({
        "request_seq": 1,
        "body": {
            "supportsModulesRequest": true,
            "supportsConfigurationDoneRequest": true,
            "supportsDelayedStackTraceLoading": true,
            "supportsDebuggerProperties": true,
            "supportsEvaluateForHovers": true,
            "supportsSetExpression": true,
            "supportsGotoTargetsRequest": true,
            "supportsExceptionOptions": true,
            "exceptionBreakpointFilters": [
                {
                    "filter": "raised",
                    "default": false,
                    "label": "Raised Exceptions"
                },
                {
                    "filter": "uncaught",
                    "default": true,
                    "label": "Uncaught Exceptions"
                }
            ],
            "supportsCompletionsRequest": true,
            "supportsExceptionInfoRequest": true,
            "supportsLogPoints": true,
            "supportsValueFormattingOptions": true,
            "supportsHitConditionalBreakpoints": true,
            "supportsSetVariable": true,
            "supportTerminateDebuggee": true,
            "supportsConditionalBreakpoints": true
        },
        "seq": 1,
        "success": true,
        "command": "initialize",
        "message": "",
        "type": "response"
    })
    .to_string()
}

/// `output` event shown in the client's debug console.
pub fn output_event(seq: i64, category: &str, output: &str) -> String {
    json!({
        "seq": seq,
        "type": "event",
        "event": "output",
        "body": {
            "category": category,
            "output": output,
        }
    })
    .to_string()
}

/// Failed response to the client request `request_seq`.
pub fn error_response(seq: i64, request_seq: i64, command: &str, message: &str) -> String {
    json!({
        "seq": seq,
        "type": "response",
        "request_seq": request_seq,
        "command": command,
        "success": false,
        "message": message,
        "body": {
            "error": {
                "id": 1,
                "format": message,
                "showUser": true,
            }
        }
    })
    .to_string()
}
