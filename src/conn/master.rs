//! Master connection FSM (§4.5): request / wait-for-reply / timeout.

use crate::conn::{ConnAction, ConnTimer, ConnectionConfig, PrimitiveCallback};
use crate::error::{Error, Result};
use crate::frame;
use crate::primitive::{Operation, Primitive};
use crate::queue::MessageQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterState {
    Disconnected,
    Idle,
    /// Reserved for future broadcast support; no event ever produces a
    /// transition into this state today.
    WaitTurnaroundDelay,
    WaitReply,
}

pub struct MasterConnection {
    config: ConnectionConfig,
    state: MasterState,
    queue: MessageQueue,
    req_for_addr: Option<u16>,
    callback: Option<PrimitiveCallback>,
}

impl MasterConnection {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            state: MasterState::Disconnected,
            queue: MessageQueue::new(),
            req_for_addr: None,
            callback: None,
        }
    }

    pub fn set_callback(&mut self, callback: PrimitiveCallback) {
        self.callback = Some(callback);
    }

    pub fn state(&self) -> MasterState {
        self.state
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ConnectionConfig {
        &mut self.config
    }

    /// Called by the driving event loop once it has attempted to open the
    /// endpoint in response to `DISCONNECTED + CONNECT`.
    pub fn on_connect_result(&mut self, opened: bool) -> Vec<ConnAction> {
        if opened {
            log::info!("master connection to {} established", self.config.device_path);
            self.enter_idle()
        } else {
            log::warn!("failed to open {}", self.config.device_path);
            self.state = MasterState::Disconnected;
            Vec::new()
        }
    }

    /// `submit_prim`: validated, then enqueued, then transmitted immediately
    /// if the connection is idle.
    pub fn submit_prim(&mut self, primitive: Primitive) -> Result<Vec<ConnAction>> {
        if primitive.operation() != Operation::Request {
            return Err(Error::Submit(
                "master connections only submit REQUEST primitives",
            ));
        }
        self.queue.push(primitive);
        Ok(match self.state {
            MasterState::Disconnected => Vec::new(),
            MasterState::Idle => self.enter_wait_reply(),
            MasterState::WaitReply | MasterState::WaitTurnaroundDelay => Vec::new(),
        })
    }

    /// `RECV_PRIM` while `WAIT_REPLY`: deliver to the application without
    /// verifying address or function code (see the design's open question
    /// on reply matching — this is deliberate, not an oversight).
    pub fn recv_prim(&mut self, primitive: Primitive) -> Vec<ConnAction> {
        if self.state != MasterState::WaitReply {
            return Vec::new();
        }
        let mut actions = vec![ConnAction::CancelTimer(ConnTimer::NoResponse)];
        self.req_for_addr = None;
        self.deliver(primitive);
        actions.extend(self.enter_idle());
        actions
    }

    /// `NORESPONSE` expiry while `WAIT_REPLY`: synthesize and deliver a
    /// `Response_Timeout.indication`.
    pub fn on_no_response_timeout(&mut self) -> Vec<ConnAction> {
        if self.state != MasterState::WaitReply {
            return Vec::new();
        }
        let address = self.req_for_addr.take().unwrap_or(self.config.address);
        self.deliver(Primitive::timeout(address));
        self.enter_idle()
    }

    fn enter_idle(&mut self) -> Vec<ConnAction> {
        self.state = MasterState::Idle;
        if self.queue.is_empty() {
            Vec::new()
        } else {
            self.enter_wait_reply()
        }
    }

    fn enter_wait_reply(&mut self) -> Vec<ConnAction> {
        let primitive = self
            .queue
            .pop()
            .expect("enter_wait_reply requires a non-empty queue");
        self.req_for_addr = Some(primitive.address());
        self.state = MasterState::WaitReply;

        let mut actions = Vec::new();
        if let Some(bytes) = frame::encode(&primitive) {
            actions.push(ConnAction::Transmit(bytes));
        }
        actions.push(ConnAction::ArmTimer {
            timer: ConnTimer::NoResponse,
            ms: self.config.response_timeout_ms,
        });
        actions
    }

    fn deliver(&mut self, primitive: Primitive) {
        if let Some(callback) = self.callback.as_mut() {
            callback(primitive);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::conn::Role;
    use std::sync::{Arc, Mutex};

    fn config() -> ConnectionConfig {
        ConnectionConfig::new("/dev/ttyUSB0", 9600, Role::Master)
    }

    #[test]
    fn submit_while_disconnected_only_enqueues() {
        let mut conn = MasterConnection::new(config());
        let actions = conn
            .submit_prim(Primitive::read_holding_registers_request(1, 0x0C, 1))
            .unwrap();
        assert!(actions.is_empty());
        assert_eq!(conn.state(), MasterState::Disconnected);
    }

    #[test]
    fn connect_drains_queue_into_wait_reply() {
        let mut conn = MasterConnection::new(config());
        conn.submit_prim(Primitive::read_holding_registers_request(1, 0x0C, 1))
            .unwrap();
        let actions = conn.on_connect_result(true);
        assert_eq!(conn.state(), MasterState::WaitReply);
        assert!(matches!(actions[0], ConnAction::Transmit(_)));
    }

    #[test]
    fn happy_path_delivers_response_scenario_2() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        let mut conn = MasterConnection::new(config());
        conn.set_callback(Box::new(move |p| received_clone.lock().unwrap().push(p)));
        conn.on_connect_result(true);
        conn.submit_prim(Primitive::read_holding_registers_request(1, 0x000C, 1))
            .unwrap();

        conn.recv_prim(Primitive::read_holding_registers_response(1, vec![0x007B]));
        assert_eq!(conn.state(), MasterState::Idle);
        assert_eq!(
            received.lock().unwrap().as_slice(),
            &[Primitive::read_holding_registers_response(1, vec![0x007B])]
        );
    }

    #[test]
    fn timeout_produces_exactly_one_indication() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        let mut conn = MasterConnection::new(config());
        conn.set_callback(Box::new(move |p| received_clone.lock().unwrap().push(p)));
        conn.on_connect_result(true);
        conn.submit_prim(Primitive::read_holding_registers_request(1, 0x000C, 1))
            .unwrap();

        conn.on_no_response_timeout();
        assert_eq!(conn.state(), MasterState::Idle);
        assert_eq!(received.lock().unwrap().as_slice(), &[Primitive::timeout(1)]);

        // a second submit is accepted and transmitted normally
        let actions = conn
            .submit_prim(Primitive::read_holding_registers_request(1, 0x000C, 1))
            .unwrap();
        assert_eq!(conn.state(), MasterState::WaitReply);
        assert!(matches!(actions[0], ConnAction::Transmit(_)));
    }

    #[test]
    fn submitting_a_response_is_rejected() {
        let mut conn = MasterConnection::new(config());
        let err = conn
            .submit_prim(Primitive::read_holding_registers_response(1, vec![1]))
            .unwrap_err();
        assert!(matches!(err, Error::Submit(_)));
    }
}
