//! Connections: the long-lived object an application holds, fixed to one
//! role (master or slave) and one protocol variant (RTU, for now).

pub mod master;
pub mod slave;

use crate::primitive::Primitive;

pub use master::MasterConnection;
pub use slave::SlaveConnection;

/// Master submits requests and waits for replies; slave accepts addressed
/// requests and answers them. Fixed for the lifetime of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Slave,
}

/// Default local address assigned at allocation time, before the
/// application calls `set_address`.
impl Role {
    pub fn default_address(self) -> u16 {
        match self {
            Role::Master => 0x00,
            Role::Slave => 0x01,
        }
    }
}

/// Configuration recognized at connect time (§6). Mutable after connect —
/// timeouts may be changed at any time; baud changes reprogram the RTU FSM's
/// timing and, if connected, the serial driver.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub device_path: String,
    pub baud_rate: u32,
    pub address: u16,
    pub turnaround_timeout_ms: u64,
    pub response_timeout_ms: u64,
    /// Slave-only: deliver frames not addressed to this slave to the
    /// callback without transmitting a reply.
    pub monitor: bool,
}

impl ConnectionConfig {
    pub fn new(device_path: impl Into<String>, baud_rate: u32, role: Role) -> Self {
        Self {
            device_path: device_path.into(),
            baud_rate,
            address: role.default_address(),
            turnaround_timeout_ms: 100,
            response_timeout_ms: 200,
            monitor: false,
        }
    }
}

/// Application callback: invoked with every primitive delivered upward
/// (decoded requests/responses, and synthesized timeout indications).
///
/// Submitting a new primitive from inside the callback is the normal case
/// and must be safe — see the reentrancy note in the design notes.
pub type PrimitiveCallback = Box<dyn FnMut(Primitive) + Send>;

/// An action the connection FSM wants the driving event loop to perform.
/// Keeping these as data (rather than calling out directly) is what makes
/// the FSMs themselves synchronously testable without a real transport.
#[derive(Debug)]
pub enum ConnAction {
    /// Hand `frame` to the RTU FSM for transmission.
    Transmit(Vec<u8>),
    /// Arm (or re-arm) the connection-level timer named `timer` for `ms` milliseconds.
    ArmTimer { timer: ConnTimer, ms: u64 },
    /// Cancel the connection-level timer named `timer`, if armed.
    CancelTimer(ConnTimer),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnTimer {
    Turnaround,
    NoResponse,
}
