//! Relay session over Socket.IO

use crate::events::{InboundEvent, ItemCommand, Notification, OutboundEvent};
use crate::proxy::RequestProxy;
use crate::reconnect::ReconnectScheduler;
use crate::state::{ConnectionState, ConnectionStateMachine, DisconnectReason, ReconnectAction};
use crate::{CloudConfig, CloudError, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use rust_socketio::{
    asynchronous::{Client, ClientBuilder},
    Event, Payload,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type Outbound = mpsc::UnboundedSender<OutboundEvent>;

/// Status text sent back when the relay proxies while remote access is off
pub const REMOTE_ACCESS_DISABLED: &str = "remote access disabled";

/// Connector to an openHAB Cloud style relay.
///
/// Keeps one socket open and proxies relayed requests to the local server,
/// handing item commands to the caller. Transport drops (ping timeout,
/// network loss) are retried by the Socket.IO client itself. When the relay
/// closes the session, or a connect attempt fails, the socket is closed and
/// a fresh one is opened after a backoff delay.
pub struct CloudClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: CloudConfig,
    secret: String,
    machine: Mutex<ConnectionStateMachine>,
    scheduler: ReconnectScheduler,
    socket: Mutex<Option<Client>>,
    proxy: RequestProxy<Outbound>,
    outbound_tx: Outbound,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<OutboundEvent>>>,
    commands_tx: mpsc::UnboundedSender<ItemCommand>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
    shutdown: AtomicBool,
}

impl CloudClient {
    /// Build a client; the receiver yields item commands sent by the relay
    pub fn new(config: CloudConfig) -> Result<(Self, mpsc::UnboundedReceiver<ItemCommand>)> {
        config.validate()?;
        let secret = config.secret()?;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let proxy = RequestProxy::new(&config, outbound_tx.clone())?;
        let machine = ConnectionStateMachine::new(
            config.backoff.clone(),
            config.max_reconnect_attempts,
        );
        let inner = Arc::new(Inner {
            config,
            secret,
            machine: Mutex::new(machine),
            scheduler: ReconnectScheduler::new(),
            socket: Mutex::new(None),
            proxy,
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            commands_tx,
            forwarder: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        });
        Ok((Self { inner }, commands_rx))
    }

    /// Spawn the outbound forwarder and the first connect attempt
    pub fn start(&self) -> Result<()> {
        let rx = self
            .inner
            .outbound_rx
            .lock()
            .take()
            .ok_or(CloudError::AlreadyStarted)?;
        info!("starting relay connection to {}", self.inner.config.base_url);
        let forwarder = tokio::spawn(forward(Arc::downgrade(&self.inner), rx));
        *self.inner.forwarder.lock() = Some(forwarder);
        tokio::spawn(connect(self.inner.clone()));
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.machine.lock().state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn reconnect_pending(&self) -> bool {
        self.inner.scheduler.is_pending()
    }

    /// Proxied requests not yet finished
    pub fn in_flight(&self) -> usize {
        self.inner.proxy.in_flight()
    }

    pub fn config(&self) -> &CloudConfig {
        &self.inner.config
    }

    pub fn send_notification(&self, notification: Notification) -> Result<()> {
        self.send(OutboundEvent::Notification(notification))
    }

    pub fn send_broadcast_notification(&self, notification: Notification) -> Result<()> {
        self.send(OutboundEvent::BroadcastNotification(notification))
    }

    pub fn send_log_notification(&self, notification: Notification) -> Result<()> {
        self.send(OutboundEvent::LogNotification(notification))
    }

    pub fn send_item_update(&self, item: &str, status: &str) -> Result<()> {
        self.send(OutboundEvent::ItemUpdate {
            item_name: item.to_string(),
            item_status: status.to_string(),
        })
    }

    fn send(&self, event: OutboundEvent) -> Result<()> {
        self.inner
            .outbound_tx
            .send(event)
            .map_err(|e| CloudError::Emit(format!("outbound queue closed: {}", e.0.name())))
    }

    /// Close the socket and stop reconnecting. In-flight requests are dropped.
    pub async fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.scheduler.cancel();
        self.inner.proxy.abort_all();
        let socket = self.inner.socket.lock().take();
        if let Some(socket) = socket {
            if let Err(e) = socket.disconnect().await {
                warn!("relay disconnect failed: {}", e);
            }
        }
        self.inner
            .machine
            .lock()
            .on_disconnect(DisconnectReason::ClientInitiated);
        if let Some(forwarder) = self.inner.forwarder.lock().take() {
            forwarder.abort();
        }
    }
}

impl Inner {
    fn builder(self: &Arc<Self>) -> ClientBuilder {
        let config = &self.config;
        let mut builder = ClientBuilder::new(config.base_url.as_str())
            .reconnect(true)
            .reconnect_on_disconnect(false)
            .reconnect_delay(config.backoff.min_ms, config.backoff.max_ms);
        if let Some(max) = config.max_reconnect_attempts {
            builder = builder.max_reconnect_attempts(u8::try_from(max).unwrap_or(u8::MAX));
        }
        builder
            .opening_header("uuid", config.uuid.clone())
            .opening_header("secret", self.secret.clone())
            .opening_header("openhabversion", config.openhab_version.clone())
            .opening_header("clientversion", config.client_version.clone())
            .opening_header("remoteaccess", config.remote_access.to_string())
            .on(Event::Connect, callback(self, on_connect))
            .on(Event::Close, callback(self, on_close))
            .on(Event::Error, callback(self, on_error))
            .on("request", callback(self, on_request))
            .on("cancel", callback(self, on_cancel))
            .on("command", callback(self, on_command))
    }

    fn apply(self: &Arc<Self>, action: ReconnectAction) {
        match action {
            ReconnectAction::None => {}
            ReconnectAction::Schedule(delay) => {
                if self.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                info!("reconnecting to relay in {:?}", delay);
                self.scheduler.schedule(delay, connect(self.clone()));
            }
            ReconnectAction::GiveUp => {
                error!("relay connection failed permanently");
            }
        }
    }
}

fn connect(inner: Arc<Inner>) -> BoxFuture<'static, ()> {
    async move {
        if inner.shutdown.load(Ordering::SeqCst) {
            return;
        }
        if inner.machine.lock().state() == ConnectionState::Connected {
            debug!("transport already reconnected, skipping");
            return;
        }
        // at most one live socket
        let stale = inner.socket.lock().take();
        close_socket(stale).await;
        inner.machine.lock().on_connecting();
        match inner.builder().connect().await {
            Ok(client) => {
                debug!("socket opened to {}", inner.config.base_url);
                *inner.socket.lock() = Some(client);
            }
            Err(e) => {
                let action = inner.machine.lock().on_error(&e.to_string());
                inner.apply(action);
            }
        }
    }
    .boxed()
}

async fn close_socket(socket: Option<Client>) {
    if let Some(socket) = socket {
        if let Err(e) = socket.disconnect().await {
            debug!("closing stale socket: {}", e);
        }
    }
}

/// Writes outbound events to whichever socket is current
async fn forward(inner: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<OutboundEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let socket = inner.socket.lock().clone();
        match socket {
            Some(socket) => {
                if let Err(e) = socket.emit(event.name(), event.payload()).await {
                    warn!("emit {} failed: {}", event.name(), e);
                }
            }
            None => debug!("not connected, dropping {}", event.name()),
        }
    }
}

type Handler = fn(Arc<Inner>, Payload) -> BoxFuture<'static, ()>;

/// Socket callback holding only a weak reference, so the socket does not
/// keep the client alive
fn callback(
    inner: &Arc<Inner>,
    handler: Handler,
) -> impl FnMut(Payload, Client) -> BoxFuture<'static, ()> + Send + Sync + 'static {
    let weak = Arc::downgrade(inner);
    move |payload, _socket| match weak.upgrade() {
        Some(inner) => handler(inner, payload),
        None => futures::future::ready(()).boxed(),
    }
}

fn payload_values(payload: Payload) -> Vec<Value> {
    match payload {
        Payload::Text(values) => values,
        Payload::Binary(bytes) => {
            debug!("ignoring {} byte binary payload", bytes.len());
            Vec::new()
        }
        _ => Vec::new(),
    }
}

fn payload_text(payload: Payload) -> String {
    payload_values(payload)
        .into_iter()
        .map(|v| match v {
            Value::String(s) => s,
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn on_connect(inner: Arc<Inner>, _payload: Payload) -> BoxFuture<'static, ()> {
    async move {
        let action = inner.machine.lock().on_connect();
        inner.apply(action);
    }
    .boxed()
}

fn on_close(inner: Arc<Inner>, _payload: Payload) -> BoxFuture<'static, ()> {
    async move {
        let reason = if inner.shutdown.load(Ordering::SeqCst) {
            DisconnectReason::ClientInitiated
        } else {
            DisconnectReason::ServerInitiated
        };
        let action = inner.machine.lock().on_disconnect(reason);
        let socket = inner.socket.lock().take();
        match socket {
            // the callback runs on the socket's own poll task
            Some(socket) => {
                tokio::spawn(async move {
                    close_socket(Some(socket)).await;
                    inner.apply(action);
                });
            }
            None => inner.apply(action),
        }
    }
    .boxed()
}

fn on_error(inner: Arc<Inner>, payload: Payload) -> BoxFuture<'static, ()> {
    async move {
        let text = payload_text(payload);
        let action = inner.machine.lock().on_error(&text);
        inner.apply(action);
    }
    .boxed()
}

fn on_request(inner: Arc<Inner>, payload: Payload) -> BoxFuture<'static, ()> {
    async move {
        for value in payload_values(payload) {
            let raw_id = InboundEvent::raw_request_id(&value);
            let request = match InboundEvent::parse("request", value) {
                Ok(InboundEvent::Request(request)) => request,
                Ok(_) => continue,
                Err(e) => {
                    warn!("{}", e);
                    if let Some(id) = raw_id {
                        let _ = inner.outbound_tx.send(OutboundEvent::ResponseError {
                            id,
                            status_text: e.to_string(),
                        });
                    }
                    continue;
                }
            };
            if !inner.config.remote_access {
                warn!("remote access disabled, rejecting request {}", request.id);
                let _ = inner.outbound_tx.send(OutboundEvent::ResponseError {
                    id: request.id,
                    status_text: REMOTE_ACCESS_DISABLED.to_string(),
                });
                continue;
            }
            inner.proxy.handle_request(request);
        }
    }
    .boxed()
}

fn on_cancel(inner: Arc<Inner>, payload: Payload) -> BoxFuture<'static, ()> {
    async move {
        for value in payload_values(payload) {
            match InboundEvent::parse("cancel", value) {
                Ok(InboundEvent::Cancel { id }) => {
                    inner.proxy.cancel(id).await;
                }
                Ok(_) => {}
                Err(e) => warn!("{}", e),
            }
        }
    }
    .boxed()
}

fn on_command(inner: Arc<Inner>, payload: Payload) -> BoxFuture<'static, ()> {
    async move {
        for value in payload_values(payload) {
            match InboundEvent::parse("command", value) {
                Ok(InboundEvent::Command(command)) => {
                    debug!("command {} for {}", command.command, command.item);
                    if inner.commands_tx.send(command).is_err() {
                        debug!("command receiver dropped");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("{}", e),
            }
        }
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_text() {
        let payload = Payload::Text(vec![json!("connection refused"), json!(3)]);
        assert_eq!(payload_text(payload), "connection refused 3");
    }

    #[tokio::test]
    async fn test_start_twice() {
        let (client, _commands) = CloudClient::new(CloudConfig::new("uuid", "secret")).unwrap();
        client.inner.shutdown.store(true, Ordering::SeqCst);
        client.start().unwrap();
        assert!(matches!(client.start(), Err(CloudError::AlreadyStarted)));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_remote_access_disabled_rejects_requests() {
        let mut config = CloudConfig::new("uuid", "secret");
        config.remote_access = false;
        let (client, _commands) = CloudClient::new(config).unwrap();
        let mut rx = client.inner.outbound_rx.lock().take().unwrap();

        let payload = Payload::Text(vec![json!({
            "id": 9, "method": "GET", "path": "/rest/items"
        })]);
        on_request(client.inner.clone(), payload).await;

        assert_eq!(
            rx.recv().await,
            Some(OutboundEvent::ResponseError {
                id: 9,
                status_text: REMOTE_ACCESS_DISABLED.to_string()
            })
        );
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_unparseable_request_still_answered() {
        let (client, _commands) = CloudClient::new(CloudConfig::new("uuid", "secret")).unwrap();
        let mut rx = client.inner.outbound_rx.lock().take().unwrap();

        let payload = Payload::Text(vec![json!({ "id": 5, "path": "/rest/items" })]);
        on_request(client.inner.clone(), payload).await;

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, OutboundEvent::ResponseError { id: 5, .. }));
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_close_schedules_reconnect_until_connected() {
        let mut config = CloudConfig::new("uuid", "secret");
        config.backoff.jitter = 0.0;
        let (client, _commands) = CloudClient::new(config).unwrap();
        let inner = client.inner.clone();

        on_connect(inner.clone(), Payload::Text(vec![])).await;
        assert!(client.is_connected());

        on_close(inner.clone(), Payload::Text(vec![])).await;
        assert_eq!(client.state(), ConnectionState::Reconnecting);
        assert!(client.reconnect_pending());
        assert_eq!(inner.machine.lock().attempts(), 1);
        assert!(inner.socket.lock().is_none());

        on_connect(inner.clone(), Payload::Text(vec![])).await;
        assert!(client.is_connected());
        assert_eq!(inner.machine.lock().attempts(), 0);

        // a second close starts again from the minimum delay
        assert_eq!(
            inner.machine.lock().on_disconnect(DisconnectReason::ServerInitiated),
            ReconnectAction::Schedule(std::time::Duration::from_secs(2))
        );
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_error_while_connected_is_left_to_transport() {
        let (client, _commands) = CloudClient::new(CloudConfig::new("uuid", "secret")).unwrap();
        let inner = client.inner.clone();
        on_connect(inner.clone(), Payload::Text(vec![])).await;
        on_error(inner, Payload::Text(vec![json!("ping timeout")])).await;
        assert!(client.is_connected());
        assert!(!client.reconnect_pending());
    }

    #[tokio::test]
    async fn test_command_forwarded() {
        let (client, mut commands) =
            CloudClient::new(CloudConfig::new("uuid", "secret")).unwrap();
        let payload = Payload::Text(vec![json!({ "item": "Kitchen_Light", "command": "OFF" })]);
        on_command(client.inner.clone(), payload).await;
        assert_eq!(
            commands.recv().await,
            Some(ItemCommand {
                item: "Kitchen_Light".into(),
                command: "OFF".into()
            })
        );
    }
}
