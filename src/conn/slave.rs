//! Slave connection FSM (§4.6): accept an addressed request, answer it.

use crate::conn::{ConnAction, ConnectionConfig, PrimitiveCallback};
use crate::error::{Error, Result};
use crate::frame;
use crate::primitive::{Operation, Primitive};
use crate::queue::MessageQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveState {
    Disconnected,
    Idle,
    CheckRequest,
}

pub struct SlaveConnection {
    config: ConnectionConfig,
    state: SlaveState,
    queue: MessageQueue,
    callback: Option<PrimitiveCallback>,
}

impl SlaveConnection {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            state: SlaveState::Disconnected,
            queue: MessageQueue::new(),
            callback: None,
        }
    }

    pub fn set_callback(&mut self, callback: PrimitiveCallback) {
        self.callback = Some(callback);
    }

    pub fn state(&self) -> SlaveState {
        self.state
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ConnectionConfig {
        &mut self.config
    }

    pub fn on_connect_result(&mut self, opened: bool) -> Vec<ConnAction> {
        self.state = if opened {
            SlaveState::Idle
        } else {
            SlaveState::Disconnected
        };
        Vec::new()
    }

    /// `RECV_PRIM`: drop unless addressed to us, with the monitor-mode
    /// passthrough carved out explicitly (see §4.6).
    pub fn recv_prim(&mut self, primitive: Primitive) -> Vec<ConnAction> {
        let addressed_to_us = primitive.address() == self.config.address;

        if !addressed_to_us {
            if self.config.monitor && self.callback.is_some() {
                log::debug!(
                    "monitor: delivering frame addressed to {} (local address {})",
                    primitive.address(),
                    self.config.address
                );
                self.deliver(primitive);
            }
            return Vec::new();
        }

        if self.callback.is_none() {
            log::debug!("no callback registered, dropping request");
            return Vec::new();
        }

        self.state = SlaveState::CheckRequest;
        self.deliver(primitive);
        Vec::new()
    }

    /// `submit_prim`: validated, then (if a request is being serviced)
    /// transmitted and the FSM returns to `IDLE`.
    pub fn submit_prim(&mut self, primitive: Primitive) -> Result<Vec<ConnAction>> {
        if primitive.operation() != Operation::Response {
            return Err(Error::Submit(
                "slave connections only submit RESPONSE primitives",
            ));
        }
        self.queue.push(primitive);

        if self.state != SlaveState::CheckRequest {
            return Ok(Vec::new());
        }

        let response = self
            .queue
            .pop()
            .expect("submit_prim just pushed an entry");
        self.state = SlaveState::Idle;

        Ok(match frame::encode(&response) {
            Some(bytes) => vec![ConnAction::Transmit(bytes)],
            None => Vec::new(),
        })
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

    fn config(address: u16, monitor: bool) -> ConnectionConfig {
        let mut c = ConnectionConfig::new("/dev/ttyUSB0", 9600, Role::Slave);
        c.address = address;
        c.monitor = monitor;
        c
    }

    fn with_callback(conn: &mut SlaveConnection) -> Arc<Mutex<Vec<Primitive>>> {
        let received = Arc::new(Mutex::new(Vec::new()));
        let clone = received.clone();
        conn.set_callback(Box::new(move |p| clone.lock().unwrap().push(p)));
        received
    }

    #[test]
    fn addressed_request_reaches_check_request() {
        let mut conn = SlaveConnection::new(config(1, false));
        let received = with_callback(&mut conn);
        conn.on_connect_result(true);

        conn.recv_prim(Primitive::read_holding_registers_request(1, 0, 2));
        assert_eq!(conn.state(), SlaveState::CheckRequest);
        assert_eq!(received.lock().unwrap().len(), 1);

        let actions = conn
            .submit_prim(Primitive::read_holding_registers_response(1, vec![1, 2]))
            .unwrap();
        assert_eq!(conn.state(), SlaveState::Idle);
        match &actions[0] {
            ConnAction::Transmit(bytes) => {
                assert_eq!(bytes[2], 4); // byte count for 2 registers
            }
            _ => panic!("expected transmit action"),
        }
    }

    #[test]
    fn other_address_monitor_off_is_dropped() {
        let mut conn = SlaveConnection::new(config(1, false));
        let received = with_callback(&mut conn);
        conn.on_connect_result(true);

        conn.recv_prim(Primitive::read_holding_registers_request(2, 0, 2));
        assert_eq!(conn.state(), SlaveState::Idle);
        assert!(received.lock().unwrap().is_empty());
    }

    #[test]
    fn other_address_monitor_on_is_delivered_without_state_change() {
        let mut conn = SlaveConnection::new(config(1, true));
        let received = with_callback(&mut conn);
        conn.on_connect_result(true);

        conn.recv_prim(Primitive::read_holding_registers_request(2, 0, 2));
        assert_eq!(conn.state(), SlaveState::Idle);
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[test]
    fn submitting_a_request_is_rejected() {
        let mut conn = SlaveConnection::new(config(1, false));
        let err = conn
            .submit_prim(Primitive::read_holding_registers_request(1, 0, 1))
            .unwrap_err();
        assert!(matches!(err, Error::Submit(_)));
    }
}
