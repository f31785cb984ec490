//! Single-threaded cooperative event loop (§5): one `poll()` over every
//! connection's file descriptor, woken early by whichever timer deadline
//! (RTU framing or connection-level) comes first.
//!
//! No core callback ever blocks; an application that blocks inside its
//! primitive callback stalls every connection driven by this loop, because
//! they all share the one thread.

use std::collections::HashMap;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use crate::conn::{ConnAction, ConnTimer, ConnectionConfig, PrimitiveCallback, Role};
use crate::conn::master::MasterConnection;
use crate::conn::slave::SlaveConnection;
use crate::error::{Error, Result};
use crate::frame::{self, DecodeError};
use crate::rtu_fsm::{ArmedTimer, FrameOutcome, RtuState, RtuTransmissionFsm, TimerArm};
use crate::transport::SerialEndpoint;

enum ConnectionKind {
    Master(MasterConnection),
    Slave(SlaveConnection),
}

/// One connection as driven by the event loop: its role-specific FSM, its
/// serial endpoint, its RTU transmission FSM, and the two timer deadlines
/// (RTU-level framing timer, connection-level turnaround/no-response timer)
/// currently armed.
struct DrivenConnection {
    kind: ConnectionKind,
    endpoint: SerialEndpoint,
    rtu_fsm: RtuTransmissionFsm,
    rtu_deadline: Option<(ArmedTimer, Instant)>,
    conn_deadline: Option<(ConnTimer, Instant)>,
    /// A frame the connection FSM has committed to transmit but the RTU FSM
    /// was not yet `IDLE` for (e.g. a submit right after connect, before the
    /// `INITIAL` bus-settle `T3.5` has fired). At most one frame is ever
    /// held here, matching the connection FSMs' own "at most one frame in
    /// flight" invariant. Sent as soon as the RTU FSM next reports `IDLE`.
    outbound_pending: Option<Vec<u8>>,
}

impl DrivenConnection {
    fn address(&self) -> u16 {
        match &self.kind {
            ConnectionKind::Master(m) => m.config().address,
            ConnectionKind::Slave(s) => s.config().address,
        }
    }

    fn arm_rtu(&mut self, arm: TimerArm) {
        self.rtu_deadline = Some((arm.timer, Instant::now() + arm.duration));
    }

    fn apply_conn_actions(&mut self, actions: Vec<ConnAction>) -> Result<()> {
        for action in actions {
            match action {
                ConnAction::Transmit(bytes) => self.enqueue_or_transmit(bytes)?,
                ConnAction::ArmTimer { timer, ms } => {
                    self.conn_deadline = Some((timer, Instant::now() + Duration::from_millis(ms)));
                }
                ConnAction::CancelTimer(timer) => {
                    if matches!(&self.conn_deadline, Some((t, _)) if *t == timer) {
                        self.conn_deadline = None;
                    }
                }
            }
        }
        Ok(())
    }

    /// A connection FSM demands emission the instant it commits to transmit,
    /// regardless of whether the bus has actually gone idle yet (§4.3's
    /// `IDLE` + `DEMAND_OF_EMISSION` is a precondition the RTU FSM enforces,
    /// not something the connection FSM tracks). Transmit now if the RTU FSM
    /// is `IDLE`; otherwise hold the frame for [`Self::try_transmit_pending`].
    fn enqueue_or_transmit(&mut self, bytes: Vec<u8>) -> Result<()> {
        if self.rtu_fsm.state() == RtuState::Idle {
            self.transmit_now(bytes)
        } else {
            self.outbound_pending = Some(bytes);
            Ok(())
        }
    }

    /// Transmits `bytes` now. Only valid while the RTU FSM is `IDLE`.
    fn transmit_now(&mut self, bytes: Vec<u8>) -> Result<()> {
        let arm = self
            .rtu_fsm
            .demand_emission(bytes.len())
            .expect("transmit_now is only called while the RTU FSM is IDLE");
        self.endpoint.queue_transmit(bytes);
        self.endpoint.flush_pending_transmit()?;
        self.arm_rtu(arm);
        Ok(())
    }

    /// Sends a frame held by [`Self::enqueue_or_transmit`] once the RTU FSM
    /// reaches `IDLE`. Called after every RTU FSM transition.
    fn try_transmit_pending(&mut self) -> Result<()> {
        if self.rtu_fsm.state() == RtuState::Idle {
            if let Some(bytes) = self.outbound_pending.take() {
                self.transmit_now(bytes)?;
            }
        }
        Ok(())
    }

    fn deliver_recv_prim(&mut self, primitive: crate::primitive::Primitive) -> Result<()> {
        let actions = match &mut self.kind {
            ConnectionKind::Master(m) => m.recv_prim(primitive),
            ConnectionKind::Slave(s) => s.recv_prim(primitive),
        };
        self.apply_conn_actions(actions)
    }

    fn handle_frame_outcome(&mut self, outcome: FrameOutcome) -> Result<()> {
        if outcome != FrameOutcome::Promote {
            log::debug!("addr={}: dropping corrupted/invalid frame", self.address());
            self.endpoint.clear_rx_buffer();
            return Ok(());
        }
        let decoded = frame::decode(self.endpoint.rx_buffer());
        self.endpoint.clear_rx_buffer();
        match decoded {
            Ok(primitive) => self.deliver_recv_prim(primitive),
            Err(DecodeError::Invalid) => {
                log::debug!("addr={}: decode failed on a CRC-valid buffer", self.address());
                Ok(())
            }
            Err(DecodeError::NeedMoreData) => Ok(()),
        }
    }

    fn on_readable(&mut self) -> Result<()> {
        let n = self.endpoint.read_available()?;
        if n == 0 {
            return Ok(());
        }
        // `None` means the RTU FSM deliberately left its current deadline
        // untouched (e.g. a half-duplex echo of our own bytes during
        // EMISSION) — the caller must not re-arm over it.
        if let Some(arm) = self.rtu_fsm.on_char_received() {
            self.arm_rtu(arm);
        }
        Ok(())
    }

    fn on_rtu_timer_fired(&mut self) -> Result<()> {
        // Snapshot the receive buffer so this borrow ends before the
        // subsequent mutable borrows of `rtu_fsm`/`rtu_deadline`.
        let rx = self.endpoint.rx_buffer().to_vec();
        let (next_arm, outcome) = self.rtu_fsm.on_timer_expired(&rx);
        match next_arm {
            Some(arm) => self.arm_rtu(arm),
            None => self.rtu_deadline = None,
        }
        if let Some(outcome) = outcome {
            self.handle_frame_outcome(outcome)?;
        }
        // The RTU FSM may have just reached IDLE (from INITIAL, EMISSION, or
        // CTRL_WAIT) — send anything a connection FSM already committed to
        // transmit while the bus was still busy.
        self.try_transmit_pending()
    }

    fn on_conn_timer_fired(&mut self, timer: ConnTimer) -> Result<()> {
        self.conn_deadline = None;
        let actions = match (&mut self.kind, timer) {
            (ConnectionKind::Master(m), ConnTimer::NoResponse) => m.on_no_response_timeout(),
            _ => Vec::new(),
        };
        self.apply_conn_actions(actions)
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.rtu_deadline, self.conn_deadline) {
            (Some((_, a)), Some((_, b))) => Some(a.min(b)),
            (Some((_, a)), None) => Some(a),
            (None, Some((_, b))) => Some(b),
            (None, None) => None,
        }
    }
}

/// Drives one or more connections sharing a single thread, per the
/// concurrency model in §5.
pub struct EventLoop {
    connections: HashMap<RawFd, DrivenConnection>,
}

impl EventLoop {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }

    /// Opens a master connection and registers it with the loop.
    pub fn add_master(
        &mut self,
        config: ConnectionConfig,
        callback: Option<PrimitiveCallback>,
    ) -> Result<RawFd> {
        self.add(ConnectionKind::Master(new_master(config, callback)))
    }

    /// Opens a slave connection and registers it with the loop.
    pub fn add_slave(
        &mut self,
        config: ConnectionConfig,
        callback: Option<PrimitiveCallback>,
    ) -> Result<RawFd> {
        self.add(ConnectionKind::Slave(new_slave(config, callback)))
    }

    fn add(&mut self, kind: ConnectionKind) -> Result<RawFd> {
        let (device_path, baud_rate) = match &kind {
            ConnectionKind::Master(m) => (m.config().device_path.clone(), m.config().baud_rate),
            ConnectionKind::Slave(s) => (s.config().device_path.clone(), s.config().baud_rate),
        };
        let endpoint = SerialEndpoint::open(&device_path, baud_rate)?;
        self.add_with_endpoint(kind, endpoint)
    }

    /// The common half of [`Self::add`], split out so tests can register a
    /// connection against an in-process loopback endpoint instead of a real
    /// tty.
    fn add_with_endpoint(&mut self, mut kind: ConnectionKind, endpoint: SerialEndpoint) -> Result<RawFd> {
        let baud_rate = endpoint.baud_rate();
        let fd = endpoint.raw_fd();
        let mut rtu_fsm = RtuTransmissionFsm::new(baud_rate);
        let arm = rtu_fsm.start();

        let connect_actions = match &mut kind {
            ConnectionKind::Master(m) => m.on_connect_result(true),
            ConnectionKind::Slave(s) => s.on_connect_result(true),
        };

        let mut driven = DrivenConnection {
            kind,
            endpoint,
            rtu_fsm,
            rtu_deadline: None,
            conn_deadline: None,
            outbound_pending: None,
        };
        driven.arm_rtu(arm);
        driven.apply_conn_actions(connect_actions)?;
        self.connections.insert(fd, driven);
        Ok(fd)
    }

    pub fn submit_prim(&mut self, fd: RawFd, primitive: crate::primitive::Primitive) -> Result<()> {
        let conn = self
            .connections
            .get_mut(&fd)
            .ok_or_else(|| Error::Config("unknown connection fd".into()))?;
        let actions = match &mut conn.kind {
            ConnectionKind::Master(m) => m.submit_prim(primitive)?,
            ConnectionKind::Slave(s) => s.submit_prim(primitive)?,
        };
        conn.apply_conn_actions(actions)
    }

    /// Runs one `poll()` cycle: waits for fd readiness or the nearest timer
    /// deadline across all connections, then dispatches whichever fired.
    pub fn tick(&mut self) -> Result<()> {
        let now = Instant::now();
        let nearest = self
            .connections
            .values()
            .filter_map(DrivenConnection::next_deadline)
            .min();
        let timeout_ms = nearest
            .map(|d| d.saturating_duration_since(now).as_millis() as i32)
            .unwrap_or(-1);

        let mut pollfds: Vec<libc::pollfd> = self
            .connections
            .keys()
            .map(|&fd| libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        let rc = unsafe {
            libc::poll(
                pollfds.as_mut_ptr(),
                pollfds.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if rc < 0 {
            return Err(Error::Transport(std::io::Error::last_os_error()));
        }

        for pfd in &pollfds {
            if pfd.revents & libc::POLLIN != 0 {
                self.dispatch(pfd.fd, DrivenConnection::on_readable)?;
            }
        }

        let now = Instant::now();
        let fired_rtu: Vec<RawFd> = self
            .connections
            .iter()
            .filter(|(_, c)| matches!(c.rtu_deadline, Some((_, d)) if d <= now))
            .map(|(&fd, _)| fd)
            .collect();
        for fd in fired_rtu {
            self.dispatch(fd, DrivenConnection::on_rtu_timer_fired)?;
        }

        let fired_conn: Vec<(RawFd, ConnTimer)> = self
            .connections
            .iter()
            .filter_map(|(&fd, c)| match c.conn_deadline {
                Some((t, d)) if d <= now => Some((fd, t)),
                _ => None,
            })
            .collect();
        for (fd, timer) in fired_conn {
            self.dispatch(fd, |conn| conn.on_conn_timer_fired(timer))?;
        }

        Ok(())
    }

    /// Runs `f` against the connection at `fd`, if still registered.
    ///
    /// An `EBADF`-equivalent transport error terminates processing for that
    /// endpoint only: the connection is torn down (removed from the loop,
    /// its file descriptor closed and its queued state released by `Drop`)
    /// and `tick()` continues driving every other connection. Any other
    /// transport error still propagates out of `tick()`.
    fn dispatch(
        &mut self,
        fd: RawFd,
        f: impl FnOnce(&mut DrivenConnection) -> Result<()>,
    ) -> Result<()> {
        let Some(conn) = self.connections.get_mut(&fd) else {
            return Ok(());
        };
        match f(conn) {
            Ok(()) => Ok(()),
            Err(err) if is_ebadf(&err) => {
                log::warn!("fd={fd}: EBADF, tearing down connection");
                self.connections.remove(&fd);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// Whether `err` is the transport error equivalent of `EBADF` — the only
/// transport failure this loop treats as endpoint-local rather than fatal.
fn is_ebadf(err: &Error) -> bool {
    matches!(err, Error::Transport(io_err) if io_err.raw_os_error() == Some(libc::EBADF))
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

fn new_master(config: ConnectionConfig, callback: Option<PrimitiveCallback>) -> MasterConnection {
    let mut conn = MasterConnection::new(config);
    if let Some(cb) = callback {
        conn.set_callback(cb);
    }
    conn
}

fn new_slave(config: ConnectionConfig, callback: Option<PrimitiveCallback>) -> SlaveConnection {
    let mut conn = SlaveConnection::new(config);
    if let Some(cb) = callback {
        conn.set_callback(cb);
    }
    conn
}

/// Convenience for building a [`ConnectionConfig`] with an explicit [`Role`],
/// used by both `add_master`/`add_slave` callers and the demos.
pub fn config_for(role: Role, device_path: impl Into<String>, baud_rate: u32) -> ConnectionConfig {
    ConnectionConfig::new(device_path, baud_rate, role)
}
