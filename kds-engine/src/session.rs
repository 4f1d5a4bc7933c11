//! KDS Session - 单消费者事件循环
//!
//! Owns the [`KdsEngine`] and serializes every input through one loop:
//!
//! ```text
//! shutdown ─────┐
//! channel evts ─┤
//! commands ─────┼──► select! ──► KdsEngine
//! poll tick ────┤   (only in Poll mode)
//! drain tick ───┘   (only while connected)
//! ```
//!
//! UI code talks to the loop through [`KdsHandle`].

use crate::cache::{RefreshMode, SnapshotReport};
use crate::engine::{EngineError, EngineResult, KdsEngine, TransitionOutcome};
use crate::outbox::{DrainReport, OutboxEntry, QueueStatus};
use kds_client::ChannelEvent;
use shared::models::{Station, StationStats};
use shared::order::{Order, OrderStatus};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const COMMAND_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Poll period while the channel is down
    pub poll_interval: Duration,
    /// Safety-net outbox drain period
    pub drain_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            drain_interval: Duration::from_secs(15),
        }
    }
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    ActiveOrders(Reply<Vec<Order>>),
    Transition {
        order_id: String,
        to: OrderStatus,
        reply: Reply<EngineResult<TransitionOutcome>>,
    },
    Advance {
        order_id: String,
        reply: Reply<EngineResult<TransitionOutcome>>,
    },
    Assign {
        order_id: String,
        station_id: String,
        reply: Reply<EngineResult<()>>,
    },
    SetStations(Vec<Station>, Reply<()>),
    StationOrders(String, Reply<Vec<Order>>),
    UnassignedOrders(Reply<Vec<Order>>),
    StationStats(String, Reply<StationStats>),
    QueueStatus(Reply<EngineResult<QueueStatus>>),
    FailedEntries(Reply<EngineResult<Vec<OutboxEntry>>>),
    RetryFailed(String, Reply<EngineResult<DrainReport>>),
    DiscardFailed(String, Reply<EngineResult<OutboxEntry>>),
    ClearFailed(Reply<EngineResult<usize>>),
    Refresh(Reply<Option<SnapshotReport>>),
}

/// Cloneable handle into a running session
#[derive(Clone)]
pub struct KdsHandle {
    tx: mpsc::Sender<Command>,
}

impl KdsHandle {
    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> EngineResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| EngineError::SessionClosed)?;
        rx.await.map_err(|_| EngineError::SessionClosed)
    }

    pub async fn active_orders(&self) -> EngineResult<Vec<Order>> {
        self.call(Command::ActiveOrders).await
    }

    pub async fn request_transition(
        &self,
        order_id: impl Into<String>,
        to: OrderStatus,
    ) -> EngineResult<TransitionOutcome> {
        let order_id = order_id.into();
        self.call(|reply| Command::Transition { order_id, to, reply })
            .await?
    }

    pub async fn advance(&self, order_id: impl Into<String>) -> EngineResult<TransitionOutcome> {
        let order_id = order_id.into();
        self.call(|reply| Command::Advance { order_id, reply }).await?
    }

    pub async fn assign(
        &self,
        order_id: impl Into<String>,
        station_id: impl Into<String>,
    ) -> EngineResult<()> {
        let order_id = order_id.into();
        let station_id = station_id.into();
        self.call(|reply| Command::Assign {
            order_id,
            station_id,
            reply,
        })
        .await?
    }

    pub async fn set_stations(&self, stations: Vec<Station>) -> EngineResult<()> {
        self.call(|reply| Command::SetStations(stations, reply)).await
    }

    pub async fn station_orders(&self, station_id: impl Into<String>) -> EngineResult<Vec<Order>> {
        let station_id = station_id.into();
        self.call(|reply| Command::StationOrders(station_id, reply))
            .await
    }

    pub async fn unassigned_orders(&self) -> EngineResult<Vec<Order>> {
        self.call(Command::UnassignedOrders).await
    }

    pub async fn station_stats(&self, station_id: impl Into<String>) -> EngineResult<StationStats> {
        let station_id = station_id.into();
        self.call(|reply| Command::StationStats(station_id, reply))
            .await
    }

    pub async fn queue_status(&self) -> EngineResult<QueueStatus> {
        self.call(Command::QueueStatus).await?
    }

    pub async fn failed_entries(&self) -> EngineResult<Vec<OutboxEntry>> {
        self.call(Command::FailedEntries).await?
    }

    pub async fn retry_failed(&self, entry_id: impl Into<String>) -> EngineResult<DrainReport> {
        let entry_id = entry_id.into();
        self.call(|reply| Command::RetryFailed(entry_id, reply))
            .await?
    }

    pub async fn discard_failed(&self, entry_id: impl Into<String>) -> EngineResult<OutboxEntry> {
        let entry_id = entry_id.into();
        self.call(|reply| Command::DiscardFailed(entry_id, reply))
            .await?
    }

    pub async fn clear_failed(&self) -> EngineResult<usize> {
        self.call(Command::ClearFailed).await?
    }

    /// Force a refetch regardless of refresh mode
    pub async fn refresh(&self) -> EngineResult<Option<SnapshotReport>> {
        self.call(Command::Refresh).await
    }
}

pub struct KdsSession {
    engine: KdsEngine,
    events: broadcast::Receiver<ChannelEvent>,
    commands: mpsc::Receiver<Command>,
    shutdown: CancellationToken,
    config: SessionConfig,
}

impl KdsSession {
    pub fn new(
        engine: KdsEngine,
        events: broadcast::Receiver<ChannelEvent>,
        shutdown: CancellationToken,
        config: SessionConfig,
    ) -> (Self, KdsHandle) {
        let (tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let session = Self {
            engine,
            events,
            commands,
            shutdown,
            config,
        };
        (session, KdsHandle { tx })
    }

    /// Run until shutdown; returns the engine for inspection
    pub async fn run(mut self) -> KdsEngine {
        tracing::info!("KDS session started");

        // Cold start: show whatever the server has before the channel comes up
        self.engine.refresh().await;

        let mut poll = ticker(self.config.poll_interval);
        let mut drain = ticker(self.config.drain_interval);
        let mut events_open = true;

        loop {
            let polling = matches!(self.engine.refresh_mode(), RefreshMode::Poll { .. });
            let online = self.engine.connection_state().is_connected();

            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    tracing::info!("KDS session received shutdown signal");
                    break;
                }

                result = self.events.recv(), if events_open => {
                    match result {
                        Ok(event) => self.engine.handle_channel_event(event).await,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("KDS session lagged {n} channel events, refetching");
                            self.engine.refresh().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::info!("Channel event stream closed");
                            events_open = false;
                        }
                    }
                }

                Some(command) = self.commands.recv() => {
                    self.handle_command(command).await;
                }

                _ = poll.tick(), if polling => {
                    self.engine.refresh().await;
                }

                _ = drain.tick(), if online => {
                    if let Err(e) = self.engine.drain().await {
                        tracing::error!("Periodic outbox drain failed: {e}");
                    }
                }
            }
        }

        tracing::info!("KDS session stopped");
        self.engine
    }

    async fn handle_command(&mut self, command: Command) {
        let engine = &mut self.engine;
        // Send errors mean the caller stopped waiting
        match command {
            Command::ActiveOrders(reply) => {
                let _ = reply.send(engine.active_orders());
            }
            Command::Transition { order_id, to, reply } => {
                let _ = reply.send(engine.request_transition(&order_id, to).await);
            }
            Command::Advance { order_id, reply } => {
                let _ = reply.send(engine.advance(&order_id).await);
            }
            Command::Assign {
                order_id,
                station_id,
                reply,
            } => {
                let _ = reply.send(engine.assign(&order_id, &station_id));
            }
            Command::SetStations(stations, reply) => {
                engine.set_stations(stations);
                let _ = reply.send(());
            }
            Command::StationOrders(station_id, reply) => {
                let _ = reply.send(engine.station_orders(&station_id));
            }
            Command::UnassignedOrders(reply) => {
                let _ = reply.send(engine.unassigned_orders());
            }
            Command::StationStats(station_id, reply) => {
                let _ = reply.send(engine.station_stats(&station_id));
            }
            Command::QueueStatus(reply) => {
                let _ = reply.send(engine.queue_status());
            }
            Command::FailedEntries(reply) => {
                let _ = reply.send(engine.failed_entries());
            }
            Command::RetryFailed(entry_id, reply) => {
                let _ = reply.send(engine.retry_failed(&entry_id).await);
            }
            Command::DiscardFailed(entry_id, reply) => {
                let _ = reply.send(engine.discard_failed(&entry_id));
            }
            Command::ClearFailed(reply) => {
                let _ = reply.send(engine.clear_failed());
            }
            Command::Refresh(reply) => {
                let _ = reply.send(engine.refresh().await);
            }
        }
    }
}

fn ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
