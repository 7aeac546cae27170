//! # Sync Controller
//!
//! Drives the connection lifecycle against one [`Transport`]:
//!
//! ```text
//! Disconnected --connect--> Connecting --settings--> Connected
//!      ^                        |                     |     ^
//!      +--------failure---------+                   save    | ack / refresh
//!      +---------------disconnect / link lost----- Sending -+
//! ```
//!
//! Every wait is bounded: serial replies and acknowledgments by
//! [`SyncOptions::reply_timeout`], HTTP writes by a fixed number of status
//! probes. Results are reported both as return values and as [`Notice`]s on an
//! optional channel for whatever front end is attached.

use std::fmt;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{sleep, Instant};

use crate::codec::{self, Decoded};
use crate::error::{ProtocolError, SyncError, TransportError};
use crate::settings::Settings;
use crate::store::SettingsStore;
use crate::transport::{Request, Transport, TransportKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Disconnected,
    Connecting,
    Connected,
    Sending,
}

impl SyncState {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncState::Disconnected => "disconnected",
            SyncState::Connecting => "connecting",
            SyncState::Connected => "connected",
            SyncState::Sending => "sending",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// Short user-facing message about a lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Timing knobs for replies and acknowledgments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Deadline for a serial settings reply or `s1`/`s0` acknowledgment.
    pub reply_timeout: Duration,
    /// Pause after an HTTP write before the first status probe.
    pub status_initial_delay: Duration,
    pub status_attempt_timeout: Duration,
    pub status_max_attempts: u32,
    /// Sleep between probes grows by this much per attempt...
    pub status_backoff: Duration,
    /// ...up to this cap.
    pub status_backoff_max: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_millis(5000),
            status_initial_delay: Duration::from_millis(2000),
            status_attempt_timeout: Duration::from_millis(2000),
            status_max_attempts: 30,
            status_backoff: Duration::from_millis(250),
            status_backoff_max: Duration::from_millis(2000),
        }
    }
}

impl SyncOptions {
    /// Sleep before probe `attempt + 1`, for `attempt >= 1`.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        self.status_backoff
            .saturating_mul(attempt)
            .min(self.status_backoff_max)
    }
}

pub struct SyncController {
    transport: Box<dyn Transport>,
    store: SettingsStore,
    options: SyncOptions,
    state: SyncState,
    notices: Option<UnboundedSender<Notice>>,
    /// Settings as last read from the device.
    device_snapshot: Option<Settings>,
}

impl SyncController {
    pub fn new(transport: Box<dyn Transport>, store: SettingsStore, options: SyncOptions) -> Self {
        Self {
            transport,
            store,
            options,
            state: SyncState::Disconnected,
            notices: None,
            device_snapshot: None,
        }
    }

    pub fn with_notices(mut self, sender: UnboundedSender<Notice>) -> Self {
        self.notices = Some(sender);
        self
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub fn store(&self) -> &SettingsStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut SettingsStore {
        &mut self.store
    }

    pub fn into_store(self) -> SettingsStore {
        self.store
    }

    pub fn device_settings(&self) -> Option<&Settings> {
        self.device_snapshot.as_ref()
    }

    fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            NoticeLevel::Error => error!("{}", message),
            _ => info!("{}", message),
        }
        if let Some(tx) = &self.notices {
            let _ = tx.send(Notice { level, message });
        }
    }

    /// Open the link and pull the device's settings into the store.
    pub async fn connect(&mut self) -> Result<SyncState, SyncError> {
        match self.state {
            SyncState::Connected => return Ok(SyncState::Connected),
            SyncState::Sending => return Err(SyncError::Busy),
            SyncState::Connecting | SyncState::Disconnected => {}
        }
        self.state = SyncState::Connecting;
        debug!("Connecting over {}", self.transport.kind());

        let result = match self.transport.open().await {
            Ok(()) => self.fetch().await,
            Err(e) => Err(SyncError::Connection(e.to_string())),
        };
        match result {
            Ok(settings) => {
                self.adopt(settings);
                self.state = SyncState::Connected;
                self.notify(NoticeLevel::Success, "Connected");
                if !self.store.is_valid() {
                    warn!("Device settings fail validation: {}", self.store.report());
                }
                Ok(SyncState::Connected)
            }
            Err(e) => {
                if let Err(close_err) = self.transport.close().await {
                    debug!("Close after failed connect: {}", close_err);
                }
                self.state = SyncState::Disconnected;
                self.notify(NoticeLevel::Error, "Error during connection");
                Err(e)
            }
        }
    }

    /// Re-read the device's settings.
    pub async fn refresh(&mut self) -> Result<(), SyncError> {
        self.require_connected()?;
        match self.fetch().await {
            Ok(settings) => {
                self.adopt(settings);
                Ok(())
            }
            Err(SyncError::Connection(reason)) => {
                self.drop_link().await;
                Err(SyncError::Connection(reason))
            }
            Err(e) => Err(e),
        }
    }

    /// Validate, send and confirm `settings`, then re-read them from the device.
    pub async fn save(&mut self, settings: Settings) -> Result<(), SyncError> {
        self.require_connected()?;
        let report = self.store.schema().validate(&settings);
        if !report.is_valid() {
            self.notify(NoticeLevel::Error, format!("Settings not sent: {}", report));
            return Err(SyncError::Validation(report));
        }
        let request = Request::write(self.transport.kind(), &settings)?;

        self.state = SyncState::Sending;
        let outcome = self.transfer(request).await;
        match outcome {
            Ok(()) => {
                self.state = SyncState::Connected;
                self.store.load(settings);
                self.notify(NoticeLevel::Success, "Transfer successful");
                self.refresh().await
            }
            Err(SyncError::Transfer(reason)) => {
                self.drop_link().await;
                self.notify(NoticeLevel::Error, "Error during transfer");
                Err(SyncError::Transfer(reason))
            }
            Err(e) => {
                self.state = SyncState::Connected;
                self.notify(NoticeLevel::Error, format!("Transfer failed: {}", e));
                Err(e)
            }
        }
    }

    /// Save whatever the store currently holds.
    pub async fn save_current(&mut self) -> Result<(), SyncError> {
        let settings = self.store.settings().clone();
        self.save(settings).await
    }

    pub async fn disconnect(&mut self) -> Result<(), SyncError> {
        let result = self.transport.close().await;
        self.state = SyncState::Disconnected;
        self.device_snapshot = None;
        match result {
            Ok(()) => {
                self.notify(NoticeLevel::Info, "Disconnected");
                Ok(())
            }
            Err(e) => {
                self.notify(NoticeLevel::Error, "Error during disconnect");
                Err(SyncError::Disconnect(e.to_string()))
            }
        }
    }

    fn require_connected(&self) -> Result<(), SyncError> {
        match self.state {
            SyncState::Connected => Ok(()),
            SyncState::Sending => Err(SyncError::Busy),
            other => Err(SyncError::InvalidState(other.as_str())),
        }
    }

    fn adopt(&mut self, settings: Settings) {
        self.device_snapshot = Some(settings.clone());
        self.store.load(settings);
    }

    /// Link is gone: close best-effort and fall back to `Disconnected`.
    async fn drop_link(&mut self) {
        if let Err(e) = self.transport.close().await {
            debug!("Close after link failure: {}", e);
        }
        self.state = SyncState::Disconnected;
        self.device_snapshot = None;
    }

    async fn fetch(&mut self) -> Result<Settings, SyncError> {
        let kind = self.transport.kind();
        self.transport
            .send(Request::read(kind))
            .await
            .map_err(|e| SyncError::Connection(e.to_string()))?;

        let deadline = Instant::now() + self.options.reply_timeout;
        loop {
            let raw = self
                .receive_until(deadline, "settings reply")
                .await
                .map_err(|e| match e {
                    SyncError::Transfer(reason) => SyncError::Connection(reason),
                    other => other,
                })?;
            match codec::decode(&raw, kind.read_mode()) {
                Ok(Decoded::Settings(settings)) => return Ok(settings),
                Ok(Decoded::Ack(ok)) => debug!("Ignoring stray acknowledgment ({})", ok),
                Err(e) if is_console_chatter(&e) => skip_chatter(&raw),
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn transfer(&mut self, request: Request) -> Result<(), SyncError> {
        self.transport
            .send(request)
            .await
            .map_err(|e| SyncError::Transfer(e.to_string()))?;
        match self.transport.kind() {
            TransportKind::Serial => self.await_serial_ack().await,
            TransportKind::Http => self.await_http_ack().await,
        }
    }

    async fn await_serial_ack(&mut self) -> Result<(), SyncError> {
        let mode = self.transport.kind().write_mode();
        let deadline = Instant::now() + self.options.reply_timeout;
        loop {
            let raw = self.receive_until(deadline, "acknowledgment").await?;
            match codec::decode(&raw, mode) {
                Ok(Decoded::Ack(true)) => return Ok(()),
                Ok(Decoded::Ack(false)) => return Err(SyncError::Rejected),
                Ok(Decoded::Settings(_)) => debug!("Ignoring settings line while awaiting ack"),
                Err(e) if is_console_chatter(&e) => skip_chatter(&raw),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// The device restarts after a web write; wait for `/status` to answer again.
    async fn await_http_ack(&mut self) -> Result<(), SyncError> {
        let opts = self.options.clone();
        sleep(opts.status_initial_delay).await;
        for attempt in 1..=opts.status_max_attempts {
            match self.transport.probe(opts.status_attempt_timeout).await {
                Ok(()) => {
                    debug!("Device answered status probe {}", attempt);
                    return Ok(());
                }
                Err(e) => debug!(
                    "Status probe {}/{} failed: {}",
                    attempt, opts.status_max_attempts, e
                ),
            }
            if attempt < opts.status_max_attempts {
                sleep(opts.backoff_after(attempt)).await;
            }
        }
        Err(SyncError::Timeout(format!(
            "device did not answer after {} status checks",
            opts.status_max_attempts
        )))
    }

    async fn receive_until(&mut self, deadline: Instant, what: &str) -> Result<String, SyncError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(SyncError::Timeout(format!(
                "no {} within {:?}",
                what, self.options.reply_timeout
            )));
        }
        match self.transport.receive(remaining).await {
            Ok(raw) => Ok(raw),
            Err(TransportError::Timeout(_)) => Err(SyncError::Timeout(format!(
                "no {} within {:?}",
                what, self.options.reply_timeout
            ))),
            Err(e) => Err(SyncError::Transfer(e.to_string())),
        }
    }
}

/// Serial console output that is not a protocol reply.
fn is_console_chatter(err: &ProtocolError) -> bool {
    matches!(
        err,
        ProtocolError::UnrecognizedOpcode(_) | ProtocolError::EmptyLine
    )
}

fn skip_chatter(raw: &str) {
    debug!("Skipping console output: {}", crate::logutil::preview(raw));
}
