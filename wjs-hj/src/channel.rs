//! Live event channel
//!
//! Push notifications between this client, the tournament service and peer
//! clients. Inbound events are re-broadcast on an in-process `EventBus` for
//! the reconciler to consume; outbound events are posted to the service's
//! event endpoint after successful local writes.
//!
//! Delivery is best-effort, at-most-once per connection. Payloads are
//! refresh triggers only; the reconciler re-reads state through the gateway
//! and never treats a pushed payload as authoritative.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use wjs_common::api::auth::AuthState;
use wjs_common::events::{EventBus, LiveEvent};
use wjs_common::{Error, Result};

/// Delay before reopening a dropped event stream
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Connect timeout for the event stream and the emit endpoint
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Event bus capacity for inbound live events
const EVENT_BUFFER: usize = 100;

/// Push-channel seam the reconciler depends on
#[async_trait]
pub trait LiveChannel: Send + Sync {
    /// Subscribe to inbound live events
    fn subscribe(&self) -> broadcast::Receiver<LiveEvent>;

    /// Emit an event to peers through the service
    async fn emit(&self, event: LiveEvent) -> Result<()>;
}

/// Live channel over the service's SSE stream (inbound) and event endpoint
/// (outbound)
pub struct SseLiveChannel {
    bus: EventBus,
    http: Client,
    events_url: String,
    auth: Arc<AuthState>,
}

impl SseLiveChannel {
    pub fn new(base_url: &str, auth: Arc<AuthState>) -> Result<Self> {
        // No total request timeout: the inbound stream stays open
        // indefinitely. Only the connection attempt is bounded.
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            bus: EventBus::new(EVENT_BUFFER),
            http,
            events_url: format!("{}/events", base_url.trim_end_matches('/')),
            auth,
        })
    }

    /// Spawn the intake task: reads the SSE stream and forwards each parsed
    /// event onto the bus, reconnecting with a fixed delay whenever the
    /// stream drops. Runs until the handle is aborted.
    pub fn spawn_intake(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.run_stream().await {
                    Ok(()) => info!("Event stream closed by service; reconnecting"),
                    Err(err) => warn!("Event stream error: {err}; reconnecting"),
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        })
    }

    /// Read one stream connection until it ends
    async fn run_stream(&self) -> Result<()> {
        let mut request = self
            .http
            .get(self.events_url.as_str())
            .header("Accept", "text/event-stream");
        if let Some(token) = self.auth.bearer().await {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Channel(e.to_string()))?;
        if response.status() == StatusCode::UNAUTHORIZED {
            self.auth.invalidate().await;
            return Err(Error::AuthExpired);
        }
        if !response.status().is_success() {
            return Err(Error::Channel(format!(
                "event stream returned {}",
                response.status()
            )));
        }
        info!("Connected to live event stream");

        let mut stream = response.bytes_stream();
        let mut parser = SseParser::default();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Channel(e.to_string()))?;
            for event in parser.push(&chunk) {
                debug!(event = event.event_name(), "Live event received");
                self.bus.emit_lossy(event);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LiveChannel for SseLiveChannel {
    fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.bus.subscribe()
    }

    async fn emit(&self, event: LiveEvent) -> Result<()> {
        debug!(event = event.event_name(), "Emitting live event");
        let mut request = self.http.post(self.events_url.as_str()).json(&event);
        if let Some(token) = self.auth.bearer().await {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Channel(e.to_string()))?;
        if response.status() == StatusCode::UNAUTHORIZED {
            self.auth.invalidate().await;
            return Err(Error::AuthExpired);
        }
        if !response.status().is_success() {
            return Err(Error::Channel(format!(
                "event emit returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Incremental parser for `text/event-stream` framing
///
/// Accumulates bytes until a blank line terminates a frame, then decodes
/// the frame's `event:` name and `data:` body into a `LiveEvent`. Comment
/// lines (heartbeats) and unknown event names are skipped.
#[derive(Default)]
struct SseParser {
    buffer: Vec<u8>,
    event_name: Option<String>,
    data: String,
}

impl SseParser {
    /// Feed a chunk, returning every completed event it finishes
    fn push(&mut self, chunk: &[u8]) -> Vec<LiveEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.take_frame() {
                    events.push(event);
                }
            } else if let Some(name) = line.strip_prefix("event:") {
                self.event_name = Some(name.trim().to_string());
            } else if let Some(data) = line.strip_prefix("data:") {
                self.data.push_str(data.trim());
            }
            // Anything else (comments, ids) is ignored
        }
        events
    }

    fn take_frame(&mut self) -> Option<LiveEvent> {
        let name = self.event_name.take();
        let data = std::mem::take(&mut self.data);
        let name = name?;
        if data.is_empty() {
            return None;
        }

        let payload: serde_json::Value = match serde_json::from_str(&data) {
            Ok(value) => value,
            Err(err) => {
                debug!(event = %name, "Discarding undecodable event payload: {err}");
                return None;
            }
        };
        let framed = serde_json::json!({ "event": name, "data": payload });
        match serde_json::from_value::<LiveEvent>(framed) {
            Ok(event) => Some(event),
            Err(_) => {
                debug!(event = %name, "Ignoring unknown event name");
                None
            }
        }
    }
}
