//! Reconnect state machine
//!
//! Pure bookkeeping for the channel task: every socket lifecycle input
//! returns the actions the task must perform. Keeps at most one reconnect
//! timer pending and never schedules one after teardown.

use super::ConnectionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectAction {
    /// Start a socket connection attempt
    Open,
    /// Send the subscription handshake for every remembered channel
    SendSubscriptions,
    /// Arm the reconnect timer
    ScheduleReconnect,
    /// Disarm the reconnect timer
    CancelTimer,
    /// Close the socket, if any
    CloseSocket,
}

#[derive(Debug, Default)]
pub struct ReconnectState {
    state: ConnectionState,
    timer_pending: bool,
    torn_down: bool,
}

impl ReconnectState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn timer_pending(&self) -> bool {
        self.timer_pending
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Explicit connect request. No-op while connecting or connected.
    pub fn request_connect(&mut self) -> Vec<ReconnectAction> {
        if self.torn_down || self.state != ConnectionState::Disconnected {
            return Vec::new();
        }

        let mut actions = Vec::with_capacity(2);
        if self.timer_pending {
            self.timer_pending = false;
            actions.push(ReconnectAction::CancelTimer);
        }
        self.state = ConnectionState::Connecting;
        actions.push(ReconnectAction::Open);
        actions
    }

    /// Socket opened
    pub fn on_open(&mut self) -> Vec<ReconnectAction> {
        if self.torn_down {
            return vec![ReconnectAction::CloseSocket];
        }

        self.state = ConnectionState::Connected;
        let mut actions = vec![ReconnectAction::SendSubscriptions];
        if self.timer_pending {
            self.timer_pending = false;
            actions.push(ReconnectAction::CancelTimer);
        }
        actions
    }

    /// Socket closed, errored, or failed to open
    pub fn on_close(&mut self) -> Vec<ReconnectAction> {
        self.state = ConnectionState::Disconnected;
        if self.torn_down || self.timer_pending {
            return Vec::new();
        }
        self.timer_pending = true;
        vec![ReconnectAction::ScheduleReconnect]
    }

    /// Reconnect timer elapsed
    pub fn on_timer_fired(&mut self) -> Vec<ReconnectAction> {
        self.timer_pending = false;
        self.request_connect()
    }

    /// Explicit stop; terminal
    pub fn teardown(&mut self) -> Vec<ReconnectAction> {
        self.torn_down = true;
        self.state = ConnectionState::Disconnected;

        let mut actions = Vec::with_capacity(2);
        if self.timer_pending {
            self.timer_pending = false;
            actions.push(ReconnectAction::CancelTimer);
        }
        actions.push(ReconnectAction::CloseSocket);
        actions
    }
}
