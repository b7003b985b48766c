//! IPC protocol between the CLI and the service daemon
//!
//! JSON-encoded, newline-delimited messages over TCP on localhost
//! (127.0.0.1). Clients send [`IpcRequest`] lines; the daemon writes
//! [`IpcMessage`] lines, which are either the response to the pending
//! request or a telemetry event for a subscribed connection.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::event::TelemetryEvent;
use crate::types::{KindSet, ProcessState, ProfileId, ProfileInfo, ProxySnapshot};

/// Default IPC port of the service daemon
pub const DEFAULT_IPC_PORT: u16 = 22240;

/// Default IPC address of the service daemon
pub fn default_ipc_address() -> String {
    format!("127.0.0.1:{}", DEFAULT_IPC_PORT)
}

/// IPC request from a client to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Keepalive
    Ping,

    /// Start the engine
    Start,

    /// Stop the engine
    Stop,

    /// Current engine lifecycle state
    GetProcessState,

    /// Snapshot of all proxy groups
    QueryAllProxies,

    /// Choose a proxy for a group
    SetSelectedProxy { group: String, proxy: String },

    /// Detach the tunnel device
    StopTunnel,

    /// Register this connection as an observer of `kinds`
    Subscribe { kinds: KindSet },

    /// Drop this connection's observer registration
    Unsubscribe,

    /// List stored profiles
    ListProfiles,

    /// Import a profile file
    CreateProfile { name: String, source: PathBuf },

    /// Make a profile active and reload it
    ActivateProfile { id: ProfileId },

    /// Delete a profile
    DeleteProfile { id: ProfileId },

    /// Reload the active profile
    ReloadProfile,

    /// Coarse foreground/background signal
    SetForeground { foreground: bool },

    /// Shut the daemon down
    Shutdown,
}

/// IPC response from the daemon to a client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Generic success
    Ok,

    /// Pong response
    Pong,

    /// Engine lifecycle state
    ProcessState { state: ProcessState },

    /// Proxy groups
    Proxies(ProxySnapshot),

    /// Stored profiles
    Profiles { profiles: Vec<ProfileInfo> },

    /// A single profile
    Profile(ProfileInfo),

    /// Subscription accepted
    Subscribed { kinds: KindSet },

    /// Error response
    Error { message: String },
}

/// Line written by the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpcMessage {
    Response(IpcResponse),
    Event(TelemetryEvent),
}

impl IpcMessage {
    /// Serialize to a JSON line (without the trailing newline)
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from a JSON line
    pub fn from_json(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

impl From<IpcResponse> for IpcMessage {
    fn from(resp: IpcResponse) -> Self {
        IpcMessage::Response(resp)
    }
}

impl From<TelemetryEvent> for IpcMessage {
    fn from(event: TelemetryEvent) -> Self {
        IpcMessage::Event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ErrorKind;
    use crate::types::EventKind;

    #[test]
    fn test_request_serialization() {
        let req = IpcRequest::SetSelectedProxy {
            group: "Proxy".to_string(),
            proxy: "tokyo-01".to_string(),
        };

        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("set_selected_proxy"));

        let decoded: IpcRequest = serde_json::from_str(&json).unwrap();
        match decoded {
            IpcRequest::SetSelectedProxy { group, proxy } => {
                assert_eq!(group, "Proxy");
                assert_eq!(proxy, "tokyo-01");
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_subscribe_request_uses_kind_names() {
        let json = r#"{"type":"subscribe","kinds":["speed","error"]}"#;
        let decoded: IpcRequest = serde_json::from_str(json).unwrap();
        match decoded {
            IpcRequest::Subscribe { kinds } => {
                assert!(kinds.contains(EventKind::Speed));
                assert!(kinds.contains(EventKind::Error));
                assert_eq!(kinds.len(), 2);
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_error_response_and_error_event_are_distinguishable() {
        let response: IpcMessage = IpcResponse::Error {
            message: "bad request".to_string(),
        }
        .into();
        let event: IpcMessage =
            TelemetryEvent::error(ErrorKind::StartFailure, "missing binary").into();

        let response = IpcMessage::from_json(&response.to_json().unwrap()).unwrap();
        let event = IpcMessage::from_json(&event.to_json().unwrap()).unwrap();

        assert!(matches!(
            response,
            IpcMessage::Response(IpcResponse::Error { .. })
        ));
        assert!(matches!(
            event,
            IpcMessage::Event(TelemetryEvent::Error {
                kind: ErrorKind::StartFailure,
                ..
            })
        ));
    }

    #[test]
    fn test_proxies_response_serialization() {
        let resp = IpcResponse::Proxies(ProxySnapshot::default());
        let json = serde_json::to_string(&resp).unwrap();
        let decoded: IpcResponse = serde_json::from_str(&json).unwrap();
        match decoded {
            IpcResponse::Proxies(snapshot) => assert!(snapshot.groups.is_empty()),
            _ => panic!("Wrong variant"),
        }
    }
}
