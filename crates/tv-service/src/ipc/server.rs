//! IPC server implementation
//!
//! Listens on localhost TCP for requests from the CLI. Every connection may
//! register itself as an observer; its events are interleaved with responses
//! on the same socket and its registration is dropped when it disconnects.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tv_core::ipc::{IpcMessage, IpcRequest, IpcResponse};
use tv_core::traits::Observer;
use tv_core::{ObserverId, TelemetryEvent};

use crate::service::{EventChannel, TunnelService};

/// IPC server for CLI communication
///
/// Listens on localhost (127.0.0.1) only - not accessible from network.
pub struct IpcServer {
    /// Address to bind (127.0.0.1:port)
    pub address: String,
    service: Arc<TunnelService>,
    shutdown_token: CancellationToken,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(address: String, service: Arc<TunnelService>) -> Self {
        Self {
            address,
            service,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Use `token` both to stop the server and to serve `shutdown` requests
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = token;
        self
    }

    /// Bind the listener
    pub async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("Failed to bind IPC server to {}", self.address))
    }

    /// Bind and serve until the shutdown token fires
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tracing::info!("IPC server listening on {}", listener.local_addr()?);

        loop {
            let accepted = tokio::select! {
                _ = self.shutdown_token.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    // Only accept connections from localhost
                    if !peer_addr.ip().is_loopback() {
                        tracing::warn!("Rejected non-localhost connection from {}", peer_addr);
                        continue;
                    }

                    let service = Arc::clone(&self.service);
                    let shutdown_token = self.shutdown_token.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, service, shutdown_token).await {
                            tracing::warn!("IPC client error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept IPC connection: {}", e);
                }
            }
        }

        tracing::info!("IPC server stopped");
        Ok(())
    }
}

/// Observer registration of one connection; dropped on disconnect
struct ClientObserver {
    id: ObserverId,
    channel: EventChannel,
    sender: mpsc::UnboundedSender<TelemetryEvent>,
}

impl Drop for ClientObserver {
    fn drop(&mut self) {
        self.channel.unregister_observer(self.id);
    }
}

async fn write_message(writer: &mut OwnedWriteHalf, message: IpcMessage) -> Result<()> {
    let mut json = message.to_json()?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    Ok(())
}

async fn handle_client(
    stream: TcpStream,
    service: Arc<TunnelService>,
    shutdown_token: CancellationToken,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let client = ClientObserver {
        id: ObserverId::new(),
        channel: service.event_channel(),
        sender: event_tx,
    };

    loop {
        tokio::select! {
            // Handle incoming requests
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break; // EOF
                };

                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let response = match serde_json::from_str::<IpcRequest>(trimmed) {
                    Ok(request) => handle_request(request, &service, &client, &shutdown_token).await,
                    Err(e) => IpcResponse::Error {
                        message: format!("Invalid request: {}", e),
                    },
                };

                write_message(&mut writer, response.into()).await?;
            }

            // Forward events for this connection's observer
            Some(event) = event_rx.recv() => {
                write_message(&mut writer, event.into()).await?;
            }
        }
    }

    Ok(())
}

async fn handle_request(
    request: IpcRequest,
    service: &TunnelService,
    client: &ClientObserver,
    shutdown_token: &CancellationToken,
) -> IpcResponse {
    match request {
        IpcRequest::Ping => IpcResponse::Pong,

        IpcRequest::Start => {
            service.start().await;
            IpcResponse::ProcessState {
                state: service.current_process_state(),
            }
        }

        IpcRequest::Stop => {
            service.stop().await;
            IpcResponse::ProcessState {
                state: service.current_process_state(),
            }
        }

        IpcRequest::GetProcessState => IpcResponse::ProcessState {
            state: service.current_process_state(),
        },

        IpcRequest::QueryAllProxies => IpcResponse::Proxies(service.query_all_proxies().await),

        IpcRequest::SetSelectedProxy { group, proxy } => {
            if group.trim().is_empty() || proxy.trim().is_empty() {
                return IpcResponse::Error {
                    message: "Group and proxy names must not be empty".to_string(),
                };
            }
            service.set_selected_proxy(&group, &proxy).await;
            IpcResponse::Ok
        }

        IpcRequest::StopTunnel => {
            service.stop_tunnel_device().await;
            IpcResponse::Ok
        }

        IpcRequest::Subscribe { kinds } => {
            let observer: Arc<dyn Observer> = Arc::new(client.sender.clone());
            client.channel.register_observer(client.id, observer, kinds);
            IpcResponse::Subscribed { kinds }
        }

        IpcRequest::Unsubscribe => {
            client.channel.unregister_observer(client.id);
            IpcResponse::Ok
        }

        IpcRequest::ListProfiles => match service.profile_channel().list_profiles().await {
            Ok(profiles) => IpcResponse::Profiles { profiles },
            Err(e) => IpcResponse::Error {
                message: e.to_string(),
            },
        },

        IpcRequest::CreateProfile { name, source } => {
            match service.profile_channel().create_profile(&name, &source).await {
                Ok(profile) => IpcResponse::Profile(profile),
                Err(e) => IpcResponse::Error {
                    message: e.to_string(),
                },
            }
        }

        IpcRequest::ActivateProfile { id } => {
            match service.profile_channel().activate_profile(id).await {
                Ok(()) => IpcResponse::Ok,
                Err(e) => IpcResponse::Error {
                    message: e.to_string(),
                },
            }
        }

        IpcRequest::DeleteProfile { id } => {
            match service.profile_channel().delete_profile(id).await {
                Ok(()) => IpcResponse::Ok,
                Err(e) => IpcResponse::Error {
                    message: e.to_string(),
                },
            }
        }

        IpcRequest::ReloadProfile => {
            service.profile_channel().reload();
            IpcResponse::Ok
        }

        IpcRequest::SetForeground { foreground } => {
            service.set_foreground(foreground);
            IpcResponse::Ok
        }

        IpcRequest::Shutdown => {
            tracing::info!("Shutdown requested via IPC");
            shutdown_token.cancel();
            IpcResponse::Ok
        }
    }
}
