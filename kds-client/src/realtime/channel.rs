// kds-client/src/realtime/channel.rs
// 实时通道 - WebSocket 连接任务, 订阅握手和断线重连

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use shared::message::{ClientMessage, ServerMessage};
use std::collections::{BTreeSet, VecDeque};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::{ChannelConfig, ChannelError, ChannelEvent, ConnectionState, ReconnectAction, ReconnectState};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Command {
    Connect,
    Subscribe(String),
}

/// Single push connection to the order event source
///
/// `connect` spawns one background task that owns the socket. Observers get
/// events through [`RealtimeChannel::on_message`]; the channel never calls
/// into them directly.
#[derive(Debug)]
pub struct RealtimeChannel {
    config: ChannelConfig,
    events: broadcast::Sender<ChannelEvent>,
    state: watch::Sender<ConnectionState>,
    subscriptions: watch::Sender<BTreeSet<String>>,
    commands: OnceLock<mpsc::UnboundedSender<Command>>,
    shutdown: CancellationToken,
    finished: CancellationToken,
}

impl RealtimeChannel {
    pub fn new(config: ChannelConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (subscriptions, _) = watch::channel(BTreeSet::new());

        Self {
            config,
            events,
            state,
            subscriptions,
            commands: OnceLock::new(),
            shutdown: CancellationToken::new(),
            finished: CancellationToken::new(),
        }
    }

    /// Open the connection
    ///
    /// Remembers the configured default channel as a subscription. Calling
    /// it again while connecting or connected does nothing.
    pub fn connect(&self, url: impl Into<String>) -> Result<(), ChannelError> {
        if self.shutdown.is_cancelled() {
            return Err(ChannelError::Closed);
        }

        let default_channel = self.config.channel.clone();
        self.subscriptions.send_modify(|subs| {
            subs.insert(default_channel);
        });

        let mut spawned = false;
        let url = url.into();
        let commands = self.commands.get_or_init(|| {
            spawned = true;
            let (tx, rx) = mpsc::unbounded_channel();
            let task = ChannelTask {
                url: url.clone(),
                config: self.config.clone(),
                events: self.events.clone(),
                state: self.state.clone(),
                subscriptions: self.subscriptions.subscribe(),
                commands: rx,
                shutdown: self.shutdown.clone(),
                machine: ReconnectState::new(),
                conn: None,
                reconnect_at: None,
            };
            let finished = self.finished.clone();
            tokio::spawn(async move {
                task.run().await;
                finished.cancel();
            });
            tx
        });

        if !spawned {
            tracing::debug!(%url, "connect requested on running channel");
            commands.send(Command::Connect).map_err(|_| ChannelError::Closed)?;
        }
        Ok(())
    }

    /// Add a channel subscription; sent immediately when connected and
    /// re-sent on every reconnect.
    pub fn subscribe(&self, channel: impl Into<String>) {
        let channel = channel.into();
        let mut added = false;
        self.subscriptions.send_if_modified(|subs| {
            added = subs.insert(channel.clone());
            added
        });

        if added && let Some(commands) = self.commands.get() {
            let _ = commands.send(Command::Subscribe(channel));
        }
    }

    /// Event stream for observers (cache, alerts, session)
    pub fn on_message(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Tear down: cancel any pending reconnect and close the socket
    ///
    /// Waits for the connection task to exit. No reconnect is scheduled
    /// afterwards.
    pub async fn close(&self) {
        self.shutdown.cancel();
        if self.commands.get().is_some() {
            self.finished.cancelled().await;
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct Connection {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
}

/// Owns the socket; all state transitions go through `machine`
struct ChannelTask {
    url: String,
    config: ChannelConfig,
    events: broadcast::Sender<ChannelEvent>,
    state: watch::Sender<ConnectionState>,
    subscriptions: watch::Receiver<BTreeSet<String>>,
    commands: mpsc::UnboundedReceiver<Command>,
    shutdown: CancellationToken,
    machine: ReconnectState,
    conn: Option<Connection>,
    reconnect_at: Option<Instant>,
}

impl ChannelTask {
    async fn run(mut self) {
        tracing::info!(url = %self.url, "Realtime channel started");

        let actions = self.machine.request_connect();
        self.apply(actions).await;

        let mut ping = tokio::time::interval(self.config.ping_interval);
        ping.tick().await; // skip immediate tick

        loop {
            let wake_at = self
                .reconnect_at
                .unwrap_or_else(|| Instant::now() + self.config.ping_interval);

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let actions = self.machine.teardown();
                    self.apply(actions).await;
                    break;
                }

                _ = tokio::time::sleep_until(wake_at), if self.reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    tracing::debug!("Reconnect timer fired");
                    let actions = self.machine.on_timer_fired();
                    self.apply(actions).await;
                }

                cmd = self.commands.recv() => match cmd {
                    Some(Command::Connect) => {
                        let actions = self.machine.request_connect();
                        self.apply(actions).await;
                    }
                    Some(Command::Subscribe(channel)) => {
                        if self.machine.state().is_connected()
                            && let Err(e) = self.send_subscribe(&channel).await
                        {
                            tracing::warn!(%channel, "Subscribe send failed: {e}");
                            self.handle_close().await;
                        }
                    }
                    // Handle dropped; shutdown token fires from Drop as well
                    None => {}
                },

                _ = ping.tick(), if self.conn.is_some() => {
                    if let Some(conn) = self.conn.as_mut()
                        && conn.sink.send(Message::Ping(Vec::new().into())).await.is_err()
                    {
                        tracing::warn!("WS ping failed, disconnecting");
                        self.handle_close().await;
                    }
                }

                frame = next_frame(&mut self.conn) => {
                    self.handle_frame(frame).await;
                }
            }
        }

        self.publish_state();
        tracing::info!("Realtime channel stopped");
    }

    /// Perform actions, feeding follow-up actions back in order
    async fn apply(&mut self, actions: Vec<ReconnectAction>) {
        let mut queue = VecDeque::from(actions);
        while let Some(action) = queue.pop_front() {
            let follow_up = self.perform(action).await;
            self.publish_state();
            queue.extend(follow_up);
        }
    }

    async fn perform(&mut self, action: ReconnectAction) -> Vec<ReconnectAction> {
        match action {
            ReconnectAction::Open => {
                self.publish_state();
                let result = tokio::select! {
                    _ = self.shutdown.cancelled() => return self.machine.teardown(),
                    result = open_socket(&self.url, self.config.connect_timeout) => result,
                };
                match result {
                    Ok(ws) => {
                        tracing::info!(url = %self.url, "Realtime channel connected");
                        let (sink, stream) = ws.split();
                        self.conn = Some(Connection { sink, stream });
                        self.machine.on_open()
                    }
                    Err(e) => {
                        tracing::warn!(
                            delay_ms = self.config.reconnect_delay.as_millis() as u64,
                            "Realtime connection failed: {e}"
                        );
                        self.machine.on_close()
                    }
                }
            }
            ReconnectAction::SendSubscriptions => {
                let channels: Vec<String> = self.subscriptions.borrow().iter().cloned().collect();
                for channel in channels {
                    if let Err(e) = self.send_subscribe(&channel).await {
                        tracing::warn!(%channel, "Subscription handshake failed: {e}");
                        self.conn = None;
                        return self.machine.on_close();
                    }
                }
                Vec::new()
            }
            ReconnectAction::ScheduleReconnect => {
                self.reconnect_at = Some(Instant::now() + self.config.reconnect_delay);
                Vec::new()
            }
            ReconnectAction::CancelTimer => {
                self.reconnect_at = None;
                Vec::new()
            }
            ReconnectAction::CloseSocket => {
                if let Some(mut conn) = self.conn.take() {
                    let _ = conn.sink.close().await;
                }
                Vec::new()
            }
        }
    }

    async fn send_subscribe(&mut self, channel: &str) -> Result<(), ChannelError> {
        let conn = self.conn.as_mut().ok_or(ChannelError::Closed)?;
        let json = ClientMessage::subscribe(channel).to_json()?;
        conn.sink.send(Message::Text(json.into())).await?;
        tracing::debug!(%channel, "Subscription handshake sent");
        Ok(())
    }

    async fn handle_close(&mut self) {
        self.conn = None;
        let actions = self.machine.on_close();
        self.apply(actions).await;
    }

    async fn handle_frame(&mut self, frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>) {
        match frame {
            Some(Ok(Message::Text(text))) => self.dispatch(text.as_str()),
            Some(Ok(Message::Ping(data))) => {
                if let Some(conn) = self.conn.as_mut() {
                    let _ = conn.sink.send(Message::Pong(data)).await;
                }
            }
            Some(Ok(Message::Close(_))) => {
                tracing::info!("WebSocket closed by server");
                self.handle_close().await;
            }
            Some(Err(e)) => {
                tracing::warn!("WebSocket error: {e}");
                self.handle_close().await;
            }
            None => {
                tracing::info!("WebSocket stream ended");
                self.handle_close().await;
            }
            _ => {} // Binary, Pong — ignore
        }
    }

    /// Inbound message dispatch
    fn dispatch(&self, text: &str) {
        let msg = match ServerMessage::parse(text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Invalid message on realtime channel: {e}");
                return;
            }
        };

        match msg {
            ServerMessage::Subscribed { channel } => {
                tracing::debug!(channel = channel.as_deref().unwrap_or("-"), "Subscription acknowledged");
            }
            ServerMessage::Error { message } => {
                tracing::warn!("Server reported error: {message}");
            }
            ServerMessage::NewOrder { .. }
            | ServerMessage::OrderStatusUpdated { .. }
            | ServerMessage::ActiveOrders { .. } => {
                tracing::trace!(kind = msg.kind(), "Push received");
                let _ = self.events.send(ChannelEvent::Message(msg));
            }
        }
    }

    fn publish_state(&self) {
        let state = self.machine.state();
        if *self.state.borrow() != state {
            self.state.send_replace(state);
            let _ = self.events.send(ChannelEvent::StateChanged(state));
        }
    }
}

/// Connect with a timeout; a host that never answers counts as a failed
/// attempt.
async fn open_socket(url: &str, timeout: Duration) -> Result<WsStream, ChannelError> {
    match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url)).await {
        Ok(Ok((ws, _response))) => Ok(ws),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(ChannelError::Connection(format!(
            "timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

async fn next_frame(
    conn: &mut Option<Connection>,
) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match conn {
        Some(c) => c.stream.next().await,
        None => std::future::pending().await,
    }
}
