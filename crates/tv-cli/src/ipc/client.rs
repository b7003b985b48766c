//! IPC client for the service daemon
//!
//! One request is in flight at a time. Telemetry events that arrive while a
//! response is pending are skipped; use [`ServiceClient::next_event`] after
//! [`ServiceClient::subscribe`] to read them.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use tv_core::ipc::{default_ipc_address, IpcMessage, IpcRequest, IpcResponse};
use tv_core::{KindSet, ProcessState, ProfileId, ProfileInfo, ProxySnapshot, TelemetryEvent};

const UNREACHABLE_HINT: &str = "Is tunnelvisord running?";

/// Whether an error means the daemon could not be reached at all
pub fn is_unreachable(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        let text = cause.to_string();
        text.contains(UNREACHABLE_HINT) || text.contains("Connection refused")
    })
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

/// Client for communicating with the service daemon
pub struct ServiceClient {
    address: String,
    conn: Option<Connection>,
}

impl ServiceClient {
    /// Create a new client with the default address
    pub fn new() -> Self {
        Self::with_address(default_ipc_address())
    }

    /// Create a new client with a custom address
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            conn: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Connect to the daemon if not already connected
    pub async fn connect(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        tracing::debug!("Connecting to tunnelvisord at {}", self.address);

        let stream = TcpStream::connect(&self.address).await.with_context(|| {
            format!(
                "Failed to connect to {}. {}",
                self.address, UNREACHABLE_HINT
            )
        })?;
        let (reader, writer) = stream.into_split();

        self.conn = Some(Connection {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
        });
        Ok(())
    }

    /// Check if the daemon answers
    pub async fn ping(&mut self) -> Result<bool> {
        self.connect().await?;

        match self.send_request(IpcRequest::Ping).await {
            Ok(IpcResponse::Pong) => Ok(true),
            _ => Ok(false),
        }
    }

    /// Start the engine, returning the resulting state
    pub async fn start(&mut self) -> Result<ProcessState> {
        self.expect_state(IpcRequest::Start).await
    }

    /// Stop the engine, returning the resulting state
    pub async fn stop(&mut self) -> Result<ProcessState> {
        self.expect_state(IpcRequest::Stop).await
    }

    /// Current engine lifecycle state
    pub async fn process_state(&mut self) -> Result<ProcessState> {
        self.expect_state(IpcRequest::GetProcessState).await
    }

    /// Snapshot of all proxy groups
    pub async fn proxies(&mut self) -> Result<ProxySnapshot> {
        match self.request(IpcRequest::QueryAllProxies).await? {
            IpcResponse::Proxies(snapshot) => Ok(snapshot),
            other => unexpected(other),
        }
    }

    /// Choose `proxy` for `group`
    pub async fn select(&mut self, group: &str, proxy: &str) -> Result<()> {
        let request = IpcRequest::SetSelectedProxy {
            group: group.to_string(),
            proxy: proxy.to_string(),
        };
        self.expect_ok(request).await
    }

    /// Detach the tunnel device
    pub async fn stop_tunnel(&mut self) -> Result<()> {
        self.expect_ok(IpcRequest::StopTunnel).await
    }

    pub async fn list_profiles(&mut self) -> Result<Vec<ProfileInfo>> {
        match self.request(IpcRequest::ListProfiles).await? {
            IpcResponse::Profiles { profiles } => Ok(profiles),
            other => unexpected(other),
        }
    }

    /// Import a profile file under `name`
    pub async fn create_profile(&mut self, name: &str, source: &Path) -> Result<ProfileInfo> {
        let request = IpcRequest::CreateProfile {
            name: name.to_string(),
            source: source.to_path_buf(),
        };
        match self.request(request).await? {
            IpcResponse::Profile(info) => Ok(info),
            other => unexpected(other),
        }
    }

    pub async fn activate_profile(&mut self, id: ProfileId) -> Result<()> {
        self.expect_ok(IpcRequest::ActivateProfile { id }).await
    }

    pub async fn delete_profile(&mut self, id: ProfileId) -> Result<()> {
        self.expect_ok(IpcRequest::DeleteProfile { id }).await
    }

    /// Queue a reload of the active profile
    pub async fn reload(&mut self) -> Result<()> {
        self.expect_ok(IpcRequest::ReloadProfile).await
    }

    pub async fn set_foreground(&mut self, foreground: bool) -> Result<()> {
        self.expect_ok(IpcRequest::SetForeground { foreground }).await
    }

    /// Ask the daemon to shut down
    pub async fn shutdown(&mut self) -> Result<()> {
        self.expect_ok(IpcRequest::Shutdown).await
    }

    /// Register this connection for events of `kinds`
    pub async fn subscribe(&mut self, kinds: KindSet) -> Result<KindSet> {
        match self.request(IpcRequest::Subscribe { kinds }).await? {
            IpcResponse::Subscribed { kinds } => Ok(kinds),
            other => unexpected(other),
        }
    }

    /// Wait for the next pushed event
    ///
    /// Returns `None` when the daemon closes the connection.
    pub async fn next_event(&mut self) -> Result<Option<TelemetryEvent>> {
        loop {
            match self.read_message().await? {
                Some(IpcMessage::Event(event)) => return Ok(Some(event)),
                Some(IpcMessage::Response(response)) => {
                    tracing::debug!("Ignoring unsolicited response: {:?}", response);
                }
                None => return Ok(None),
            }
        }
    }

    async fn expect_state(&mut self, request: IpcRequest) -> Result<ProcessState> {
        match self.request(request).await? {
            IpcResponse::ProcessState { state } => Ok(state),
            other => unexpected(other),
        }
    }

    async fn expect_ok(&mut self, request: IpcRequest) -> Result<()> {
        match self.request(request).await? {
            IpcResponse::Ok => Ok(()),
            other => unexpected(other),
        }
    }

    /// Connect, send and turn daemon-side errors into `Err`
    async fn request(&mut self, request: IpcRequest) -> Result<IpcResponse> {
        self.connect().await?;

        match self.send_request(request).await? {
            IpcResponse::Error { message } => anyhow::bail!("{}", message),
            response => Ok(response),
        }
    }

    async fn send_request(&mut self, request: IpcRequest) -> Result<IpcResponse> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Not connected"))?;

        let mut request_json = serde_json::to_string(&request)?;
        request_json.push('\n');
        conn.writer.write_all(request_json.as_bytes()).await?;
        conn.writer.flush().await?;

        loop {
            match self.read_message().await? {
                Some(IpcMessage::Response(response)) => return Ok(response),
                Some(IpcMessage::Event(event)) => {
                    tracing::trace!("Skipping event while awaiting response: {:?}", event);
                }
                None => anyhow::bail!("Connection closed by tunnelvisord"),
            }
        }
    }

    async fn read_message(&mut self) -> Result<Option<IpcMessage>> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Not connected"))?;

        let mut line = String::new();
        loop {
            line.clear();
            if conn.reader.read_line(&mut line).await? == 0 {
                self.conn = None;
                return Ok(None);
            }
            if line.trim().is_empty() {
                continue;
            }
            let message = IpcMessage::from_json(&line)
                .with_context(|| format!("Malformed message from tunnelvisord: {}", line.trim()))?;
            return Ok(Some(message));
        }
    }
}

impl Default for ServiceClient {
    fn default() -> Self {
        Self::new()
    }
}

fn unexpected<T>(response: IpcResponse) -> Result<T> {
    anyhow::bail!("Unexpected response: {:?}", response)
}
