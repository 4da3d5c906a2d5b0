//! Device synchronization protocol engine
//!
//! The reactor owns the device store and is its only writer. It
//! consumes marshaled transport events from one channel, routes
//! inbound messages by topic, and publishes the canonical retained
//! state plus swap notifications. A bad inbound message never touches
//! the store.

use std::sync::Arc;

use dropsync_core::{codec, DeviceModel, DeviceParser, DeviceStore};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::bus::{BusEvent, BusSession};
use crate::config::Config;
use crate::topics::{Inbound, TopicSet};

/// Connection state of the protocol engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Disconnected,
    Connecting,
    Connected,
    ShuttingDown,
}

/// Why the run loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Clean shutdown (exit topic, interrupt, or transport task gone)
    Shutdown,
    /// Never connected within the configured attempts
    ConnectExhausted,
}

pub struct SyncReactor {
    store: DeviceStore,
    parser: Arc<dyn DeviceParser>,
    session: Arc<dyn BusSession>,
    topics: TopicSet,
    retain_query_response: bool,
    publish_errors: bool,
    max_connect_attempts: u32,
    state: State,
    ever_connected: bool,
    connect_failures: u32,
}

impl SyncReactor {
    pub fn new(
        config: &Config,
        parser: Arc<dyn DeviceParser>,
        session: Arc<dyn BusSession>,
    ) -> Self {
        Self {
            store: DeviceStore::new(),
            parser,
            session,
            topics: TopicSet::new(&config.sync.namespace),
            retain_query_response: config.sync.retain_query_response,
            publish_errors: config.sync.publish_errors,
            max_connect_attempts: config.broker.max_connect_attempts,
            state: State::Disconnected,
            ever_connected: false,
            connect_failures: 0,
        }
    }

    /// Drive the protocol until shutdown or unrecoverable startup
    /// failure.
    pub async fn run(&mut self, mut events: mpsc::Receiver<BusEvent>) -> Exit {
        self.state = State::Connecting;
        while let Some(event) = events.recv().await {
            if let Some(exit) = self.handle_event(event).await {
                return exit;
            }
        }
        // Transport task dropped its sender; nothing left to react to
        debug!("event channel closed");
        Exit::Shutdown
    }

    async fn handle_event(&mut self, event: BusEvent) -> Option<Exit> {
        match event {
            BusEvent::Connected => {
                self.on_connected().await;
                None
            }
            BusEvent::Disconnected => {
                if self.state != State::ShuttingDown {
                    warn!("bus session lost, reconnecting");
                    self.state = State::Connecting;
                }
                None
            }
            BusEvent::ConnectFailed(reason) => self.on_connect_failed(&reason),
            BusEvent::Message { topic, payload } => self.on_message(&topic, &payload).await,
            BusEvent::Shutdown => self.shutdown().await,
        }
    }

    async fn on_connected(&mut self) {
        if self.state == State::ShuttingDown {
            return;
        }
        self.state = State::Connected;
        self.ever_connected = true;
        self.connect_failures = 0;
        info!("bus session established");

        for topic in self.topics.subscriptions() {
            if let Err(e) = self.session.subscribe(topic).await {
                warn!(topic = %topic, error = %e, "subscribe failed");
            }
        }

        // Re-publish the retained state so subscribers that connected
        // while we were away resync immediately; a retained null
        // clears stale broker state.
        self.publish_state(true).await;
    }

    fn on_connect_failed(&mut self, reason: &str) -> Option<Exit> {
        if self.state == State::ShuttingDown {
            return None;
        }
        self.connect_failures += 1;
        warn!(
            attempt = self.connect_failures,
            reason = %reason,
            "bus connect failed"
        );
        if !self.ever_connected
            && self.max_connect_attempts > 0
            && self.connect_failures >= self.max_connect_attempts
        {
            error!(
                attempts = self.connect_failures,
                "could not open bus session, giving up"
            );
            return Some(Exit::ConnectExhausted);
        }
        self.state = State::Connecting;
        None
    }

    async fn on_message(&mut self, topic: &str, payload: &[u8]) -> Option<Exit> {
        if self.state != State::Connected {
            warn!(topic = %topic, "message dropped while not connected");
            return None;
        }
        match self.topics.route(topic) {
            Some(Inbound::PutDevice) => self.handle_put_device(payload).await,
            Some(Inbound::PutDeviceState) => self.handle_put_state(payload).await,
            Some(Inbound::GetDevice) => {
                // Query responses are published whether or not
                // anything changed
                self.publish_state(self.retain_query_response).await;
            }
            Some(Inbound::Exit) => return self.shutdown().await,
            None => debug!(topic = %topic, "unrecognized topic ignored"),
        }
        None
    }

    /// Load a new device from an inbound layout file
    async fn handle_put_device(&mut self, payload: &[u8]) {
        let request = match codec::decode_load(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "bad load payload dropped");
                self.publish_error(&e.to_string()).await;
                return;
            }
        };
        let model = match self.parser.parse(request.file.as_bytes(), &request.name) {
            Ok(model) => model,
            Err(e) => {
                warn!(device = %request.name, error = %e, "device file rejected");
                self.publish_error(&e.to_string()).await;
                return;
            }
        };
        info!(
            device = %model.name(),
            electrodes = model.electrode_count(),
            max_channel = model.max_channel(),
            "device loaded"
        );
        self.commit(Some(Arc::new(model))).await;
    }

    /// Replace the full device state from another process
    async fn handle_put_state(&mut self, payload: &[u8]) {
        match codec::decode_state(payload) {
            Ok(model) => {
                self.commit(model.map(Arc::new)).await;
            }
            Err(e) => {
                warn!(error = %e, "bad state payload dropped");
                self.publish_error(&e.to_string()).await;
            }
        }
    }

    /// Store the new value, re-publish the retained state, and
    /// announce a swap when the value actually changed.
    async fn commit(&mut self, model: Option<Arc<DeviceModel>>) {
        let changed = self.store.set(model);
        self.publish_state(true).await;
        if changed {
            self.publish_swapped().await;
        }
    }

    async fn publish_state(&self, retain: bool) {
        let Some(payload) = self.encode_current() else {
            return;
        };
        if let Err(e) = self
            .session
            .publish(&self.topics.device_state, payload, retain)
            .await
        {
            // Transient; the next state change republishes naturally
            warn!(error = %e, "state publish failed");
        }
    }

    async fn publish_swapped(&self) {
        let Some(payload) = self.encode_current() else {
            return;
        };
        if let Err(e) = self
            .session
            .publish(&self.topics.device_swapped, payload, false)
            .await
        {
            warn!(error = %e, "swap notification failed");
        }
    }

    /// Serialize the current store value, or `None` when it cannot be
    /// encoded (previous retained state stays intact).
    fn encode_current(&self) -> Option<Vec<u8>> {
        let model = self.store.get();
        let value = match codec::encode(model.as_deref()) {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, "device state not encodable");
                return None;
            }
        };
        match serde_json::to_vec(&value) {
            Ok(payload) => Some(payload),
            Err(e) => {
                error!(error = %e, "device state not encodable");
                None
            }
        }
    }

    async fn publish_error(&self, detail: &str) {
        if !self.publish_errors {
            return;
        }
        let payload = serde_json::json!({ "error": detail }).to_string().into_bytes();
        if let Err(e) = self.session.publish(&self.topics.error, payload, false).await {
            warn!(error = %e, "error notification failed");
        }
    }

    /// Close the session and leave the run loop. Idempotent.
    async fn shutdown(&mut self) -> Option<Exit> {
        if self.state == State::ShuttingDown {
            return Some(Exit::Shutdown);
        }
        self.state = State::ShuttingDown;
        info!("shutdown requested, closing bus session");
        if let Err(e) = self.session.disconnect().await {
            warn!(error = %e, "disconnect failed");
        }
        Some(Exit::Shutdown)
    }
}
