//! Scripted in-process tracker.
//!
//! Behaves like the firmware on either link: answers `g` with its settings,
//! applies `s<json>` or a posted form, and answers `/status` probes. Knobs on
//! [`MockHandle`] make it reject writes, stay silent, interleave console chatter,
//! normalize values the way real firmware does, or fail to open.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::time::sleep;

use crate::codec::{self, Decoded, Mode};
use crate::error::TransportError;
use crate::settings::Settings;

use super::{Request, Transport, TransportKind};

type Normalizer = Box<dyn Fn(&mut Settings) + Send>;

struct MockState {
    device: Settings,
    open: bool,
    inbox: VecDeque<String>,
    sent: Vec<Request>,
    chatter: Vec<String>,
    normalizer: Option<Normalizer>,
    reject: bool,
    silent: bool,
    fail_open: bool,
    fail_send: bool,
    probe_failures: usize,
    probes: usize,
    applied: usize,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Test-side view of a [`MockTransport`].
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    /// Settings the device currently holds.
    pub fn device(&self) -> Settings {
        lock(&self.state).device.clone()
    }

    pub fn set_device(&self, settings: Settings) {
        lock(&self.state).device = settings;
    }

    /// Every request the host sent, in order.
    pub fn sent(&self) -> Vec<Request> {
        lock(&self.state).sent.clone()
    }

    /// Number of writes the device accepted.
    pub fn applied(&self) -> usize {
        lock(&self.state).applied
    }

    pub fn probes(&self) -> usize {
        lock(&self.state).probes
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    /// Answer serial writes with `s0` and leave the device untouched.
    pub fn reject_writes(&self, reject: bool) {
        lock(&self.state).reject = reject;
    }

    /// Swallow requests without replying; HTTP probes fail.
    pub fn silence(&self, silent: bool) {
        lock(&self.state).silent = silent;
    }

    /// Console lines emitted ahead of every serial reply.
    pub fn chatter<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.state).chatter = lines.into_iter().map(Into::into).collect();
    }

    /// Adjust settings as firmware would on write (rounding, clamping).
    pub fn normalize_with<F>(&self, normalizer: F)
    where
        F: Fn(&mut Settings) + Send + 'static,
    {
        lock(&self.state).normalizer = Some(Box::new(normalizer));
    }

    pub fn fail_open(&self, fail: bool) {
        lock(&self.state).fail_open = fail;
    }

    /// Make every `send` fail with an I/O error, as an unplugged cable would.
    pub fn fail_send(&self, fail: bool) {
        lock(&self.state).fail_send = fail;
    }

    /// Fail the next `count` status probes.
    pub fn fail_probes(&self, count: usize) {
        lock(&self.state).probe_failures = count;
    }

    /// Queue a raw inbound payload (a line on serial, a body on HTTP).
    pub fn push_inbound(&self, raw: &str) {
        lock(&self.state).inbox.push_back(raw.to_string());
    }
}

pub struct MockTransport {
    kind: TransportKind,
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new(kind: TransportKind, device: Settings) -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState {
            device,
            open: false,
            inbox: VecDeque::new(),
            sent: Vec::new(),
            chatter: Vec::new(),
            normalizer: None,
            reject: false,
            silent: false,
            fail_open: false,
            fail_send: false,
            probe_failures: 0,
            probes: 0,
            applied: 0,
        }));
        let handle = MockHandle {
            state: state.clone(),
        };
        (Self { kind, state }, handle)
    }

    pub fn serial(device: Settings) -> (Self, MockHandle) {
        Self::new(TransportKind::Serial, device)
    }

    pub fn http(device: Settings) -> (Self, MockHandle) {
        Self::new(TransportKind::Http, device)
    }
}

impl MockState {
    fn apply(&mut self, mut incoming: Settings) {
        if let Some(normalize) = &self.normalizer {
            normalize(&mut incoming);
        }
        self.device = incoming;
        self.applied += 1;
    }

    fn reply_serial(&mut self, line: String) {
        let chatter = self.chatter.clone();
        self.inbox.extend(chatter);
        self.inbox.push_back(line);
    }

    fn handle(&mut self, request: &Request) -> Result<(), TransportError> {
        match request.mode {
            Mode::SerialGet => {
                let json = serde_json::to_string(&self.device)
                    .map_err(|e| TransportError::Http(e.to_string()))?;
                self.reply_serial(format!("{}{}", codec::serial::OP_GET, json));
            }
            Mode::SerialSet => {
                let accepted = !self.reject
                    && match codec::decode(&request.payload, Mode::SerialSet) {
                        Ok(Decoded::Settings(incoming)) => {
                            self.apply(incoming);
                            true
                        }
                        _ => false,
                    };
                let flag = if accepted { '1' } else { '0' };
                self.reply_serial(format!("{}{}", codec::serial::OP_SET, flag));
            }
            Mode::HttpRead => {
                let json = serde_json::to_string(&self.device)
                    .map_err(|e| TransportError::Http(e.to_string()))?;
                self.inbox.push_back(json);
            }
            Mode::HttpWrite => {
                let incoming = codec::form::decode(&request.payload)
                    .map_err(|e| TransportError::Http(format!("device returned status 400: {}", e)))?;
                if !self.reject {
                    self.apply(incoming);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if state.fail_open {
            return Err(TransportError::Open {
                target: format!("mock {}", self.kind),
                reason: "device not present".to_string(),
            });
        }
        state.open = true;
        state.inbox.clear();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.open = false;
        state.inbox.clear();
        Ok(())
    }

    async fn send(&mut self, request: Request) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(TransportError::Closed);
        }
        if state.fail_send {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "device unplugged",
            )));
        }
        if request.mode.is_serial() != (self.kind == TransportKind::Serial) {
            return Err(TransportError::Unsupported("mock"));
        }
        debug!("mock {} <- {}", self.kind, request.mode);
        state.sent.push(request.clone());
        if state.silent {
            return Ok(());
        }
        state.handle(&request)
    }

    async fn receive(&mut self, timeout: Duration) -> Result<String, TransportError> {
        let next = {
            let mut state = lock(&self.state);
            if !state.open {
                return Err(TransportError::Closed);
            }
            state.inbox.pop_front()
        };
        match next {
            Some(payload) => Ok(payload),
            None => {
                sleep(timeout).await;
                Err(TransportError::Timeout(timeout))
            }
        }
    }

    async fn probe(&mut self, _timeout: Duration) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(TransportError::Closed);
        }
        state.probes += 1;
        if state.silent {
            return Err(TransportError::Http("connection refused".to_string()));
        }
        if state.probe_failures > 0 {
            state.probe_failures -= 1;
            return Err(TransportError::Http("connection refused".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serial_get_is_preceded_by_chatter() {
        let (mut transport, handle) = MockTransport::serial(Settings::default());
        handle.chatter(["[GPS] searching"]);
        transport.open().await.unwrap();
        transport
            .send(Request::read(TransportKind::Serial))
            .await
            .unwrap();
        let first = transport.receive(Duration::from_millis(10)).await.unwrap();
        let second = transport.receive(Duration::from_millis(10)).await.unwrap();
        assert_eq!(first, "[GPS] searching");
        assert!(second.starts_with("g{"));
    }

    #[tokio::test]
    async fn rejected_write_keeps_device() {
        let (mut transport, handle) = MockTransport::serial(Settings::default());
        handle.reject_writes(true);
        transport.open().await.unwrap();
        let mut changed = Settings::default();
        changed.lora.power = 5;
        transport
            .send(Request::write(TransportKind::Serial, &changed).unwrap())
            .await
            .unwrap();
        assert_eq!(transport.receive(Duration::from_millis(10)).await.unwrap(), "s0");
        assert_eq!(handle.device().lora.power, 20);
        assert_eq!(handle.applied(), 0);
    }

    #[tokio::test]
    async fn empty_inbox_times_out() {
        let (mut transport, _handle) = MockTransport::http(Settings::default());
        transport.open().await.unwrap();
        assert!(matches!(
            transport.receive(Duration::from_millis(5)).await,
            Err(TransportError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn wrong_link_mode_is_unsupported() {
        let (mut transport, _handle) = MockTransport::http(Settings::default());
        transport.open().await.unwrap();
        assert!(matches!(
            transport.send(Request::read(TransportKind::Serial)).await,
            Err(TransportError::Unsupported(_))
        ));
    }
}
