//! Engine driven through its external controller
//!
//! Spawns the engine executable and talks to its REST controller:
//!
//! | Operation        | Request                         |
//! |------------------|---------------------------------|
//! | readiness        | `GET /version`                  |
//! | load profile     | `PUT /configs?force=true`       |
//! | list proxies     | `GET /proxies`                  |
//! | select proxy     | `PUT /proxies/{group}`          |
//! | traffic counters | `GET /connections`              |
//! | logs             | `GET /logs?level=` (streaming)  |

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::Instant;

use tv_core::config::EngineConfig;
use tv_core::traits::{Engine, LogStream};
use tv_core::{
    EngineError, LogLevel, ProxyGroup, ProxySelection, ProxySnapshot, TrafficTotals, TunDevice,
    UNKNOWN_GROUP,
};

use super::logs::LogDecoder;

/// Timeout of a single non-streaming controller request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay between readiness checks while starting
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The selector whose choice is the routed group
const GLOBAL_GROUP: &str = "GLOBAL";

#[derive(Deserialize)]
struct ProxiesResponse {
    proxies: HashMap<String, RawProxy>,
}

#[derive(Deserialize)]
struct RawProxy {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    now: Option<String>,
    #[serde(default)]
    all: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionsResponse {
    #[serde(default)]
    upload_total: u64,
    #[serde(default)]
    download_total: u64,
}

/// External engine process plus its controller client
pub struct ControllerEngine {
    config: EngineConfig,
    base: Url,
    client: reqwest::Client,
    child: Mutex<Option<Child>>,
}

impl ControllerEngine {
    /// Create an engine handle; nothing is spawned until `start`
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let base = Url::parse(&format!("http://{}/", config.controller_address)).map_err(|e| {
            EngineError::Controller(format!(
                "invalid controller address {}: {}",
                config.controller_address, e
            ))
        })?;

        let client = reqwest::Client::builder()
            .connect_timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EngineError::Controller(e.to_string()))?;

        Ok(Self {
            config,
            base,
            client,
            child: Mutex::new(None),
        })
    }

    fn child(&self) -> MutexGuard<'_, Option<Child>> {
        self.child.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn url(&self, segments: &[&str]) -> Result<Url, EngineError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| EngineError::Controller("controller URL cannot have a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, EngineError> {
        let builder = self.client.request(method, self.url(segments)?);
        Ok(match &self.config.secret {
            Some(secret) => builder.bearer_auth(secret),
            None => builder,
        })
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, EngineError> {
        let response = builder
            .send()
            .await
            .map_err(|e| EngineError::Controller(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(EngineError::Status {
            status: status.as_u16(),
            message: message.trim().to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, EngineError> {
        let builder = self.request(Method::GET, segments)?.timeout(REQUEST_TIMEOUT);
        self.send(builder)
            .await?
            .json::<T>()
            .await
            .map_err(|e| EngineError::Malformed(e.to_string()))
    }

    async fn ping(&self) -> Result<(), EngineError> {
        let builder = self.request(Method::GET, &["version"])?.timeout(READY_POLL_INTERVAL * 5);
        self.send(builder).await.map(|_| ())
    }

    fn exit_status(&self) -> Option<String> {
        let mut child = self.child();
        let exited = match child.as_mut() {
            Some(process) => match process.try_wait() {
                Ok(Some(status)) => Some(status.to_string()),
                Ok(None) => None,
                Err(e) => Some(e.to_string()),
            },
            None => Some("not spawned".to_string()),
        };
        if exited.is_some() {
            child.take();
        }
        exited
    }

    fn spawn(&self) -> Result<Child, EngineError> {
        let config = &self.config;

        let mut command = Command::new(&config.executable);
        command
            .arg("-d")
            .arg(&config.working_dir)
            .arg("-ext-ctl")
            .arg(&config.controller_address);
        if let Some(secret) = &config.secret {
            command.arg("-secret").arg(secret);
        }
        command
            .args(&config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        command.spawn().map_err(|source| EngineError::Launch {
            path: config.executable.clone(),
            source,
        })
    }
}

#[async_trait]
impl Engine for ControllerEngine {
    async fn start(&self) -> Result<(), EngineError> {
        if self.is_running() {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.config.working_dir).await?;

        let child = self.spawn()?;
        tracing::debug!(pid = ?child.id(), executable = ?self.config.executable, "Spawned engine");
        *self.child() = Some(child);

        let deadline = Instant::now() + self.config.start_timeout;
        loop {
            if let Some(status) = self.exit_status() {
                return Err(EngineError::ExitedEarly(status));
            }

            match self.ping().await {
                Ok(()) => {
                    tracing::debug!("Engine controller is ready");
                    return Ok(());
                }
                Err(e) => tracing::trace!("Controller not ready yet: {}", e),
            }

            if Instant::now() >= deadline {
                self.stop().await?;
                return Err(EngineError::StartTimeout(self.config.start_timeout));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn stop(&self) -> Result<(), EngineError> {
        let child = self.child().take();
        let Some(mut child) = child else {
            return Ok(());
        };

        child.start_kill()?;
        match tokio::time::timeout(self.config.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!("Engine exited with {}", status),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => tracing::warn!("Engine did not exit within {:?}", self.config.stop_timeout),
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        match self.child().as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn attach_tunnel(&self, device: TunDevice) -> Result<(), EngineError> {
        drop(device);
        Err(EngineError::Unsupported(
            "an external controller engine cannot take a tunnel device",
        ))
    }

    async fn detach_tunnel(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn load_profile(
        &self,
        path: &Path,
        selection: &ProxySelection,
    ) -> Result<Vec<String>, EngineError> {
        let path = tokio::fs::canonicalize(path)
            .await
            .map_err(|e| EngineError::InvalidProfile(format!("{}: {}", path.display(), e)))?;

        let body = serde_json::json!({ "path": path.to_string_lossy() });
        let builder = self
            .request(Method::PUT, &["configs"])?
            .query(&[("force", "true")])
            .json(&body)
            .timeout(REQUEST_TIMEOUT);

        match self.send(builder).await {
            Ok(_) => {}
            Err(EngineError::Status { message, .. }) => {
                return Err(EngineError::InvalidProfile(message))
            }
            Err(e) => return Err(e),
        }

        let snapshot = self.query_proxies().await?;

        let mut stale = Vec::new();
        for (group, proxy) in selection.iter() {
            let applies = snapshot
                .groups
                .get(group)
                .map(|g| g.contains(proxy))
                .unwrap_or(false);

            if !applies {
                stale.push(group.to_string());
                continue;
            }

            if let Err(e) = self.set_selected_proxy(group, proxy).await {
                tracing::warn!("Could not restore {} for {}: {}", proxy, group, e);
                stale.push(group.to_string());
            }
        }

        Ok(stale)
    }

    async fn query_proxies(&self) -> Result<ProxySnapshot, EngineError> {
        let response: ProxiesResponse = self.get_json(&["proxies"]).await?;

        let current_group = response
            .proxies
            .get(GLOBAL_GROUP)
            .and_then(|global| global.now.clone())
            .unwrap_or_else(|| UNKNOWN_GROUP.to_string());

        let groups = response
            .proxies
            .into_iter()
            .filter(|(name, _)| name != GLOBAL_GROUP)
            .filter_map(|(name, raw)| {
                raw.all.map(|proxies| {
                    (
                        name,
                        ProxyGroup {
                            kind: raw.kind,
                            now: raw.now,
                            proxies,
                        },
                    )
                })
            })
            .collect();

        Ok(ProxySnapshot {
            current_group,
            groups,
        })
    }

    async fn set_selected_proxy(&self, group: &str, proxy: &str) -> Result<(), EngineError> {
        let builder = self
            .request(Method::PUT, &["proxies", group])?
            .json(&serde_json::json!({ "name": proxy }))
            .timeout(REQUEST_TIMEOUT);
        self.send(builder).await.map(|_| ())
    }

    async fn query_traffic(&self) -> Result<TrafficTotals, EngineError> {
        let response: ConnectionsResponse = self.get_json(&["connections"]).await?;
        Ok(TrafficTotals {
            upload: response.upload_total,
            download: response.download_total,
        })
    }

    async fn open_log_stream(&self, level: LogLevel) -> Result<LogStream, EngineError> {
        let builder = self
            .request(Method::GET, &["logs"])?
            .query(&[("level", level.as_str())]);
        let response = self.send(builder).await?;

        let stream = futures::stream::unfold(
            Some((response, LogDecoder::new(), VecDeque::new())),
            |state| async move {
                let (mut response, mut decoder, mut pending) = state?;
                loop {
                    if let Some(item) = pending.pop_front() {
                        return Some((item, Some((response, decoder, pending))));
                    }
                    match response.chunk().await {
                        Ok(Some(chunk)) => pending.extend(decoder.push(&chunk)),
                        Ok(None) => return None,
                        Err(e) => {
                            return Some((Err(EngineError::Controller(e.to_string())), None))
                        }
                    }
                }
            },
        );

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(address: &str) -> ControllerEngine {
        ControllerEngine::new(EngineConfig {
            controller_address: address.to_string(),
            ..EngineConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_url_escapes_group_names() {
        let engine = engine("127.0.0.1:9090");
        let url = engine.url(&["proxies", "Auto Select/EU"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9090/proxies/Auto%20Select%2FEU");
    }

    #[test]
    fn test_invalid_controller_address() {
        let result = ControllerEngine::new(EngineConfig {
            controller_address: "not a host:port".to_string(),
            ..EngineConfig::default()
        });
        assert!(matches!(result, Err(EngineError::Controller(_))));
    }

    #[test]
    fn test_not_running_before_start() {
        assert!(!engine("127.0.0.1:9090").is_running());
    }

    #[tokio::test]
    async fn test_start_reports_missing_executable() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ControllerEngine::new(EngineConfig {
            executable: dir.path().join("no-such-engine"),
            working_dir: dir.path().join("home"),
            ..EngineConfig::default()
        })
        .unwrap();

        let result = engine.start().await;
        assert!(matches!(result, Err(EngineError::Launch { .. })));
        assert!(!engine.is_running());
    }

    #[test]
    fn test_proxies_response_parsing() {
        let json = r#"{
            "proxies": {
                "GLOBAL": {"type": "Selector", "now": "Proxy", "all": ["Proxy", "DIRECT"]},
                "Proxy": {"type": "Selector", "now": "tokyo-01", "all": ["tokyo-01", "osaka-02"]},
                "tokyo-01": {"type": "Shadowsocks"}
            }
        }"#;
        let response: ProxiesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.proxies.len(), 3);
        assert!(response.proxies["tokyo-01"].all.is_none());
        assert_eq!(response.proxies["GLOBAL"].now.as_deref(), Some("Proxy"));
    }
}
