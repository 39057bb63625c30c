//! Inspection and rewriting of messages crossing the relay.
//!
//! Both directions are pure decisions: the caller owns the session state and
//! acts on the returned action.

use std::collections::HashSet;

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::RelayError;
use crate::protocol::{AttachConfig, DapMessage, MessageKind};

/// Interpreter-internal names hidden from `variables` responses.
pub const HIDDEN_VARIABLES: [&str; 5] = [
    "__builtins__",
    "__doc__",
    "__file__",
    "__name__",
    "__package__",
];

pub const REMOTE_ATTACH_NAME: &str = "Nuke Python Debugger : Remote Attach";

/// What the relay must do with a client message besides forwarding it.
#[derive(Debug)]
pub enum ClientAction {
    /// Answer with the synthetic capabilities right away
    Initialize,
    /// Start the bootstrap; the forwarded message carries rewritten arguments
    Attach(AttachConfig),
    /// `attach` whose arguments cannot drive a bootstrap
    InvalidAttach(RelayError),
    /// Execution was resumed by the user
    Continue,
    Forward,
}

#[derive(Debug)]
pub struct ClientIntercept {
    pub seq: Option<i64>,
    /// Text to enqueue for the backend
    pub message: String,
    pub action: ClientAction,
}

/// Classifies a client message and rewrites `attach` arguments into the
/// shape the remote debugger expects.
pub fn intercept_client(text: String, backend_key: &str) -> ClientIntercept {
    let mut message = match DapMessage::parse(&text) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Forwarding unparsable client message");
            return ClientIntercept {
                seq: None,
                message: text,
                action: ClientAction::Forward,
            };
        }
    };

    let seq = message.seq();
    if message.kind() != Some(MessageKind::Request) {
        return ClientIntercept {
            seq,
            message: text,
            action: ClientAction::Forward,
        };
    }

    let action = match message.command() {
        Some("initialize") => ClientAction::Initialize,
        Some("attach") => {
            let config = message
                .arguments()
                .ok_or_else(|| RelayError::AttachArguments("missing `arguments`".into()))
                .and_then(|arguments| AttachConfig::from_arguments(arguments, backend_key));

            match config {
                Ok(config) => {
                    let arguments = remote_attach_arguments(&config);
                    debug!(arguments = %arguments, "Rewrote attach arguments");
                    message.set_arguments(arguments);
                    return ClientIntercept {
                        seq,
                        message: message.to_json(),
                        action: ClientAction::Attach(config),
                    };
                }
                Err(e) => ClientAction::InvalidAttach(e),
            }
        }
        Some("continue") => ClientAction::Continue,
        _ => ClientAction::Forward,
    };

    ClientIntercept {
        seq,
        message: text,
        action,
    }
}

/// Attach arguments in the remote debugger's native shape. The program
/// directory maps onto itself on the remote side.
pub fn remote_attach_arguments(config: &AttachConfig) -> Value {
    let dir = config.program_dir();
    json!({
        "name": REMOTE_ATTACH_NAME,
        "type": "python",
        "request": "attach",
        "port": config.port,
        "host": config.host,
        "pathMappings": [
            {
                "localRoot": dir,
                "remoteRoot": dir,
            }
        ]
    })
}

/// What the relay must do with a backend message.
#[derive(Debug, PartialEq, Eq)]
pub enum BackendAction {
    /// Relay, then send the deferred run code
    ConfigurationDone,
    /// The request was already answered locally; log only
    Suppress { request_seq: i64 },
    Relay,
}

#[derive(Debug)]
pub struct BackendIntercept {
    /// Text to enqueue for the client
    pub message: String,
    pub action: BackendAction,
}

/// Classifies a backend message against the requests already answered
/// locally and strips interpreter internals from `variables` responses.
pub fn intercept_backend(text: String, processed_seqs: &HashSet<i64>) -> BackendIntercept {
    let mut message = match DapMessage::parse(&text) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Relaying unparsable backend message");
            return BackendIntercept {
                message: text,
                action: BackendAction::Relay,
            };
        }
    };

    if message.command() == Some("configurationDone") || message.event() == Some("configurationDone")
    {
        return BackendIntercept {
            message: text,
            action: BackendAction::ConfigurationDone,
        };
    }

    if let Some(request_seq) = message.request_seq()
        && processed_seqs.contains(&request_seq)
    {
        return BackendIntercept {
            message: text,
            action: BackendAction::Suppress { request_seq },
        };
    }

    if message.kind() == Some(MessageKind::Response)
        && message.command() == Some("variables")
        && hide_internal_variables(&mut message) > 0
    {
        return BackendIntercept {
            message: message.to_json(),
            action: BackendAction::Relay,
        };
    }

    BackendIntercept {
        message: text,
        action: BackendAction::Relay,
    }
}

/// Removes [`HIDDEN_VARIABLES`] from a `variables` response body and returns
/// how many entries were dropped.
fn hide_internal_variables(message: &mut DapMessage) -> usize {
    let Some(Value::Array(variables)) = message
        .body_mut()
        .and_then(|body| body.get_mut("variables"))
    else {
        return 0;
    };

    let before = variables.len();
    variables.retain(|variable| {
        variable
            .get("name")
            .and_then(Value::as_str)
            .is_none_or(|name| !HIDDEN_VARIABLES.contains(&name))
    });
    before - variables.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn attach_request(program: &str) -> String {
        json!({
            "seq": 2,
            "type": "request",
            "command": "attach",
            "arguments": {
                "name": "Nuke: Python 2 Debugging",
                "program": program,
                "interpreter": "python",
                "debugpy": { "host": "localhost", "port": 7004 }
            }
        })
        .to_string()
    }

    #[test]
    fn test_initialize_is_answered_and_forwarded_unchanged() {
        let text = r#"{"seq":1,"type":"request","command":"initialize","arguments":{"adapterID":"x"}}"#;
        let intercept = intercept_client(text.to_string(), "debugpy");
        assert!(matches!(intercept.action, ClientAction::Initialize));
        assert_eq!(intercept.seq, Some(1));
        assert_eq!(intercept.message, text);
    }

    #[test]
    fn test_attach_arguments_rewritten() {
        let intercept = intercept_client(attach_request("/a/b/c.py"), "debugpy");
        let ClientAction::Attach(config) = intercept.action else {
            panic!("expected attach action");
        };
        assert_eq!(config.port, 7004);

        let forwarded: Value = serde_json::from_str(&intercept.message).unwrap();
        assert_eq!(forwarded["seq"], 2);
        assert_eq!(forwarded["command"], "attach");
        let arguments = &forwarded["arguments"];
        assert_eq!(arguments["host"], "localhost");
        assert_eq!(arguments["port"], 7004);
        assert_eq!(arguments["type"], "python");
        assert_eq!(arguments["request"], "attach");
        assert_eq!(arguments["name"], REMOTE_ATTACH_NAME);
        assert_eq!(arguments["pathMappings"][0]["localRoot"], "/a/b");
        assert_eq!(arguments["pathMappings"][0]["remoteRoot"], "/a/b");
        assert!(arguments.get("debugpy").is_none());
    }

    #[test]
    fn test_attach_windows_program_dir() {
        let intercept = intercept_client(attach_request(r"C:\tools\render.py"), "debugpy");
        let forwarded: Value = serde_json::from_str(&intercept.message).unwrap();
        assert_eq!(
            forwarded["arguments"]["pathMappings"][0]["localRoot"],
            r"C:\tools"
        );
        assert!(intercept.message.contains(r#""localRoot":"C:\\tools""#));
    }

    #[test]
    fn test_attach_invalid_arguments_forwarded_unchanged() {
        let text = r#"{"seq":2,"type":"request","command":"attach","arguments":{"program":"/a.py"}}"#;
        let intercept = intercept_client(text.to_string(), "debugpy");
        assert!(matches!(
            intercept.action,
            ClientAction::InvalidAttach(RelayError::AttachArguments(_))
        ));
        assert_eq!(intercept.message, text);
    }

    #[rstest]
    #[case(r#"{"seq":7,"type":"request","command":"continue","arguments":{"threadId":1}}"#, "continue")]
    #[case(r#"{"seq":7,"type":"request","command":"threads"}"#, "forward")]
    #[case(r#"{"seq":7,"type":"response","command":"runInTerminal","request_seq":3}"#, "forward")]
    #[case("not json", "forward")]
    fn test_other_client_messages(#[case] text: &str, #[case] expected: &str) {
        let intercept = intercept_client(text.to_string(), "debugpy");
        let action = match intercept.action {
            ClientAction::Continue => "continue",
            ClientAction::Forward => "forward",
            other => panic!("unexpected action {other:?}"),
        };
        assert_eq!(action, expected);
        assert_eq!(intercept.message, text);
    }

    #[test]
    fn test_backend_response_to_processed_request_suppressed() {
        let processed = HashSet::from([1]);
        let text = r#"{"seq":1,"type":"response","request_seq":1,"command":"initialize","success":true}"#;
        let intercept = intercept_backend(text.to_string(), &processed);
        assert_eq!(intercept.action, BackendAction::Suppress { request_seq: 1 });
    }

    #[test]
    fn test_backend_configuration_done() {
        let processed = HashSet::new();
        let text = r#"{"seq":9,"type":"response","request_seq":5,"command":"configurationDone","success":true}"#;
        let intercept = intercept_backend(text.to_string(), &processed);
        assert_eq!(intercept.action, BackendAction::ConfigurationDone);
        assert_eq!(intercept.message, text);
    }

    #[test]
    fn test_backend_events_relayed_unchanged() {
        let processed = HashSet::from([1]);
        let text = r#"{"seq":2,"type":"event","event":"initialized"}"#;
        let intercept = intercept_backend(text.to_string(), &processed);
        assert_eq!(intercept.action, BackendAction::Relay);
        assert_eq!(intercept.message, text);
    }

    #[test]
    fn test_variables_filtered() {
        let text = json!({
            "seq": 12,
            "type": "response",
            "request_seq": 11,
            "command": "variables",
            "success": true,
            "body": {
                "variables": [
                    { "name": "x", "value": "1", "variablesReference": 0 },
                    { "name": "__builtins__", "value": "{...}", "variablesReference": 4 },
                    { "name": "__doc__", "value": "None", "variablesReference": 0 }
                ]
            }
        })
        .to_string();

        let intercept = intercept_backend(text, &HashSet::new());
        assert_eq!(intercept.action, BackendAction::Relay);

        let relayed: Value = serde_json::from_str(&intercept.message).unwrap();
        let names = relayed["body"]["variables"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["name"].as_str().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["x"]);
        assert_eq!(relayed["request_seq"], 11);
    }

    #[test]
    fn test_variables_without_internals_untouched() {
        let text = r#"{"seq":3,"type":"response","request_seq":2,"command":"variables","body":{"variables":[{"name":"y"}]}}"#;
        let intercept = intercept_backend(text.to_string(), &HashSet::new());
        assert_eq!(intercept.message, text);
    }
}
