//! Wi-Fi admin page of the tracker.
//!
//! Reads fetch `/configuration.json`, writes post the urlencoded form, and
//! liveness is `/status`. The device also exposes a couple of actions and the
//! list of received packets; those are plain methods here because the sync
//! lifecycle never needs them.
//!
//! A write is answered with `302 Location: /` right before the tracker restarts,
//! and a reboot action often gets no answer at all. Redirects are therefore never
//! followed, and a connection lost after the request went out counts as sent.

use std::collections::VecDeque;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::codec::Mode;
use crate::error::TransportError;
use crate::logutil::preview;

use super::{Request, Transport, TransportKind};

pub const CONFIGURATION_PATH: &str = "/configuration.json";
pub const STATUS_PATH: &str = "/status";
pub const ACTION_PATH: &str = "/action";
pub const RECEIVED_PACKETS_PATH: &str = "/received-packets.json";
pub const DEFAULT_WRITE_PATH: &str = "/";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One entry of `/received-packets.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivedPacket {
    pub millis: u64,
    pub packet: String,
    #[serde(rename = "RSSI")]
    pub rssi: i32,
    #[serde(rename = "SNR")]
    pub snr: f32,
}

pub struct HttpTransport {
    base_url: String,
    write_path: String,
    client: reqwest::Client,
    /// Response bodies waiting for `receive`.
    inbox: VecDeque<String>,
    open: bool,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Self {
        Self::with_write_path(base_url, DEFAULT_WRITE_PATH)
    }

    pub fn with_write_path(base_url: &str, write_path: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            write_path: normalize_path(write_path),
            client: build_client(),
            inbox: VecDeque::new(),
            open: false,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send with a deadline; any status comes back as a response.
    async fn dispatch(
        &self,
        request: reqwest::RequestBuilder,
        limit: Duration,
    ) -> Result<reqwest::Response, TransportError> {
        timeout(limit, request.send())
            .await
            .map_err(|_| TransportError::Timeout(limit))?
            .map_err(classify)
    }

    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        limit: Duration,
    ) -> Result<String, TransportError> {
        let response = self.dispatch(request, limit).await?;
        let status = response.status();
        if !status.is_success() && !status.is_redirection() {
            return Err(TransportError::Http(format!("device returned status {}", status)));
        }
        timeout(limit, response.text())
            .await
            .map_err(|_| TransportError::Timeout(limit))?
            .map_err(classify)
    }

    async fn action(&self, kind: &str) -> Result<(), TransportError> {
        let url = format!("{}?type={}", self.url(ACTION_PATH), urlencoding::encode(kind));
        debug!("POST {}", url);
        self.execute(self.client.post(&url), REQUEST_TIMEOUT).await?;
        Ok(())
    }

    /// Ask the tracker to restart. The device may go down before answering.
    pub async fn reboot(&self) -> Result<(), TransportError> {
        self.action("reboot").await.or_else(sent_anyway)
    }

    /// Ask the tracker to transmit a beacon now.
    pub async fn send_beacon(&self) -> Result<(), TransportError> {
        self.action("send-beacon").await
    }

    pub async fn received_packets(&self) -> Result<Vec<ReceivedPacket>, TransportError> {
        let body = self
            .execute(self.client.get(self.url(RECEIVED_PACKETS_PATH)), REQUEST_TIMEOUT)
            .await?;
        serde_json::from_str(&body)
            .map_err(|e| TransportError::Http(format!("bad packet list: {}", e)))
    }
}

fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap_or_else(|e| {
            warn!("HTTP client setup failed ({}); using defaults", e);
            reqwest::Client::new()
        })
}

/// Refused or unresolvable connections stay plain HTTP errors; anything that
/// breaks once the request is on the wire is a dropped connection.
fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(REQUEST_TIMEOUT)
    } else if e.is_connect() || e.is_builder() {
        TransportError::Http(e.to_string())
    } else {
        TransportError::Dropped(e.to_string())
    }
}

/// The request reached a device that is restarting; success is decided by the
/// status probe that follows.
fn sent_anyway(e: TransportError) -> Result<(), TransportError> {
    match e {
        TransportError::Timeout(_) | TransportError::Dropped(_) => {
            debug!("No reply from device ({}); relying on status probe", e);
            Ok(())
        }
        other => Err(other),
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    /// Verifies the device answers before any settings traffic.
    async fn open(&mut self) -> Result<(), TransportError> {
        self.inbox.clear();
        self.open = true;
        if let Err(e) = self.probe(REQUEST_TIMEOUT).await {
            self.open = false;
            return Err(TransportError::Open {
                target: self.base_url.clone(),
                reason: e.to_string(),
            });
        }
        debug!("HTTP device reachable at {}", self.base_url);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.open = false;
        self.inbox.clear();
        Ok(())
    }

    async fn send(&mut self, request: Request) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        match request.mode {
            Mode::HttpRead => {
                let body = self
                    .execute(self.client.get(self.url(CONFIGURATION_PATH)), REQUEST_TIMEOUT)
                    .await?;
                trace!("http rx {}", preview(&body));
                self.inbox.push_back(body);
            }
            Mode::HttpWrite => {
                debug!("POST {} {}", self.write_path, preview(&request.payload));
                let post = self
                    .client
                    .post(self.url(&self.write_path))
                    .header(
                        reqwest::header::CONTENT_TYPE,
                        "application/x-www-form-urlencoded",
                    )
                    .body(request.payload);
                self.execute(post, REQUEST_TIMEOUT)
                    .await
                    .map(|_| ())
                    .or_else(sent_anyway)?;
            }
            Mode::SerialGet | Mode::SerialSet => return Err(TransportError::Unsupported("http")),
        }
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<String, TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        self.inbox.pop_front().ok_or(TransportError::Timeout(timeout))
    }

    async fn probe(&mut self, timeout: Duration) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let url = format!("{}?_t={}", self.url(STATUS_PATH), millis);
        // Any answer at all means the web server is back.
        let response = self.dispatch(self.client.get(&url), timeout).await?;
        trace!("status probe answered {}", response.status());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_joined_without_double_slashes() {
        let t = HttpTransport::with_write_path("http://192.168.4.1/", "configuration.json");
        assert_eq!(t.base_url(), "http://192.168.4.1");
        assert_eq!(t.url(CONFIGURATION_PATH), "http://192.168.4.1/configuration.json");
        assert_eq!(t.write_path, "/configuration.json");
    }

    #[test]
    fn received_packets_use_device_field_names() {
        let body = r#"[{"millis":1200,"packet":"EA1ABC>APLRT1:!4000.00N/00300.00W>","RSSI":-97,"SNR":7.25}]"#;
        let packets: Vec<ReceivedPacket> = serde_json::from_str(body).unwrap();
        assert_eq!(packets[0].rssi, -97);
        assert_eq!(packets[0].snr, 7.25);
        assert!(packets[0].packet.starts_with("EA1ABC>"));
    }

    #[tokio::test]
    async fn closed_transport_refuses_traffic() {
        let mut t = HttpTransport::new("http://127.0.0.1:9");
        assert!(matches!(
            t.send(Request::read(TransportKind::Http)).await,
            Err(TransportError::Closed)
        ));
        assert!(matches!(
            t.receive(Duration::from_millis(1)).await,
            Err(TransportError::Closed)
        ));
    }
}
