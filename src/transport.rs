//! The serial endpoint: owns the file descriptor, moves bytes in both directions.

use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};

use crate::error::{Error, Result};

/// Anything the RTU endpoint can read from, write to, and poll for
/// readiness on. Implemented for real serial ports via `serialport`, and
/// for an in-process loopback pair in tests — the FSM layer never knows
/// which one it's driving.
pub trait Transport: Read + Write + AsRawFd + Send {}
impl<T: Read + Write + AsRawFd + Send> Transport for T {}

/// Bounded accumulation buffer for one candidate frame; mirrors the
/// protocol's own 256-byte frame ceiling.
pub const RECEIVE_BUFFER_CAP: usize = 256;

/// Owns the open serial device and the byte-level read/write mechanics.
/// Framing (deciding when a buffer is a complete frame) is the RTU FSM's
/// job, not this one's — `SerialEndpoint` only ever hands up raw bytes.
pub struct SerialEndpoint {
    port: Box<dyn Transport>,
    device_path: String,
    baud_rate: u32,
    rx_buffer: Vec<u8>,
    tx_pending: Option<Vec<u8>>,
}

impl SerialEndpoint {
    /// Opens `device_path` at `baud_rate` via the `serialport` crate, in
    /// non-blocking mode so the event loop never stalls on a read.
    pub fn open(device_path: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(device_path, baud_rate)
            .timeout(std::time::Duration::from_millis(0))
            .open()
            .map_err(|e| Error::Transport(std::io::Error::other(e)))?;
        Ok(Self::from_transport(port, device_path.to_string(), baud_rate))
    }

    /// Wraps an already-open transport (real or a test loopback) as an endpoint.
    pub fn from_transport(
        port: impl Transport + 'static,
        device_path: String,
        baud_rate: u32,
    ) -> Self {
        Self {
            port: Box::new(port),
            device_path,
            baud_rate,
            rx_buffer: Vec::with_capacity(RECEIVE_BUFFER_CAP),
            tx_pending: None,
        }
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn raw_fd(&self) -> RawFd {
        self.port.as_raw_fd()
    }

    /// Queues `frame` for transmission. Replaces any still-pending buffer —
    /// the RTU FSM guarantees at most one frame is ever in flight.
    pub fn queue_transmit(&mut self, frame: Vec<u8>) {
        self.tx_pending = Some(frame);
    }

    pub fn has_pending_transmit(&self) -> bool {
        self.tx_pending.is_some()
    }

    /// Writes the queued frame fully. Partial writes are retried
    /// immediately within this call; only a hard I/O error is propagated.
    pub fn flush_pending_transmit(&mut self) -> Result<()> {
        let Some(frame) = self.tx_pending.take() else {
            return Ok(());
        };
        let mut written = 0;
        while written < frame.len() {
            match self.port.write(&frame[written..]) {
                Ok(0) => {
                    log::warn!("wrote 0 bytes to {}, retrying", self.device_path);
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(Error::Transport(e)),
            }
        }
        Ok(())
    }

    /// Reads one batch of available bytes into the receive buffer, returning
    /// the number of bytes read. `Ok(0)` means nothing was available (not an
    /// error — tolerated per the design's transport error policy).
    pub fn read_available(&mut self) -> Result<usize> {
        let mut scratch = [0u8; RECEIVE_BUFFER_CAP];
        match self.port.read(&mut scratch) {
            Ok(0) => Ok(0),
            Ok(n) => {
                self.rx_buffer.extend_from_slice(&scratch[..n]);
                if self.rx_buffer.len() > RECEIVE_BUFFER_CAP {
                    log::warn!("receive buffer exceeded {RECEIVE_BUFFER_CAP} bytes, truncating");
                    self.rx_buffer.truncate(RECEIVE_BUFFER_CAP);
                }
                Ok(n)
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(Error::Transport(e)),
        }
    }

    pub fn rx_buffer(&self) -> &[u8] {
        &self.rx_buffer
    }

    pub fn clear_rx_buffer(&mut self) {
        self.rx_buffer.clear();
    }
}
