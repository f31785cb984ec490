//! The RTU transmission FSM (§4.3): frames the bus using T1.5/T3.5 silences.
//!
//! This FSM does not own the serial file descriptor — it only decides,
//! given character-arrival and timer events, when a buffer of bytes is a
//! complete candidate frame and when the bus is free to transmit on. Byte
//! I/O lives in [`crate::transport::SerialEndpoint`]; driving both from
//! timer deadlines and fd readiness is the event loop's job.

use std::time::Duration;

use crate::crc;
use crate::timing::CharacterTiming;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtuState {
    Initial,
    Idle,
    Emission,
    Reception,
    CtrlWait,
}

/// Which one-shot timer slot is currently armed. The FSM only ever has one
/// timer in flight; re-arming replaces the previous deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmedTimer {
    T1_5,
    T3_5,
}

/// What the caller should do after a transition: (re)arm a timer, or nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerArm {
    pub timer: ArmedTimer,
    pub duration: Duration,
}

/// Outcome of a `T3.5` timeout in `CTRL_WAIT`: the only moment a frame is promoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// `rx_msg_ok` was true: the accumulated buffer is CRC-intact and ready for the codec.
    Promote,
    /// A byte arrived during `CTRL_WAIT`, or the buffer was never CRC-valid: drop it.
    Drop,
}

pub struct RtuTransmissionFsm {
    state: RtuState,
    timing: CharacterTiming,
    baud_rate: u32,
    rx_msg_ok: bool,
}

impl RtuTransmissionFsm {
    pub fn new(baud_rate: u32) -> Self {
        Self {
            state: RtuState::Initial,
            timing: CharacterTiming::for_baud_rate(baud_rate),
            baud_rate,
            rx_msg_ok: false,
        }
    }

    pub fn state(&self) -> RtuState {
        self.state
    }

    pub fn set_baud_rate(&mut self, baud_rate: u32) {
        self.baud_rate = baud_rate;
        self.timing = CharacterTiming::for_baud_rate(baud_rate);
    }

    /// `INITIAL` + `START`: the endpoint just opened the device.
    pub fn start(&mut self) -> TimerArm {
        self.state = RtuState::Initial;
        self.arm_t3_5()
    }

    /// `CHAR_RECEIVED` in any state that reacts to it.
    ///
    /// Returns the timer to (re)arm, or `None` if the event changes nothing
    /// and the currently armed deadline must be left alone.
    pub fn on_char_received(&mut self) -> Option<TimerArm> {
        match self.state {
            RtuState::Initial => Some(self.arm_t3_5()),
            RtuState::Idle => {
                self.state = RtuState::Reception;
                Some(self.arm_t1_5())
            }
            RtuState::Reception => Some(self.arm_t1_5()),
            RtuState::CtrlWait => {
                self.rx_msg_ok = false;
                Some(TimerArm {
                    timer: ArmedTimer::T3_5,
                    duration: self.timing.ctrl_wait_us_duration_remaining(),
                })
            }
            RtuState::Emission => {
                // The bus is being driven by us; on a half-duplex line the
                // endpoint reads back its own transmitted bytes. That's not
                // a framing event — the emission deadline (T3.5 + frame
                // transmit time) must keep running untouched, so the caller
                // leaves the existing deadline armed instead of re-arming it.
                None
            }
        }
    }

    /// `IDLE` + `DEMAND_OF_EMISSION` → `EMISSION`.
    ///
    /// Returns `None` without changing state if the FSM is not `IDLE` — this
    /// is a reachable path (an application may submit right after connect,
    /// before the `INITIAL` bus-settle `T3.5` has fired). Callers must hold
    /// the frame and retry once the FSM reports `IDLE`, not transmit anyway.
    pub fn demand_emission(&mut self, frame_len: usize) -> Option<TimerArm> {
        if self.state != RtuState::Idle {
            return None;
        }
        self.state = RtuState::Emission;
        let transmit_us = CharacterTiming::frame_transmit_us(self.baud_rate, frame_len);
        Some(TimerArm {
            timer: ArmedTimer::T3_5,
            duration: Duration::from_micros(self.timing.t3_5_us + transmit_us),
        })
    }

    /// A timer armed by the caller has fired. `rx_buffer` is only consulted
    /// when the fired timer is `T1.5` (to enter `CTRL_WAIT` and check the
    /// CRC) or `T3.5` while in `CTRL_WAIT` (to decide frame promotion).
    ///
    /// Returns `Some(next timer to arm)` unless the FSM is now `IDLE` with
    /// nothing further to arm, in which case `None`.
    pub fn on_timer_expired(&mut self, rx_buffer: &[u8]) -> (Option<TimerArm>, Option<FrameOutcome>) {
        match self.state {
            RtuState::Initial => {
                self.state = RtuState::Idle;
                (None, None)
            }
            RtuState::Emission => {
                self.state = RtuState::Idle;
                (None, None)
            }
            RtuState::Reception => {
                self.state = RtuState::CtrlWait;
                self.rx_msg_ok = crc::validate(rx_buffer);
                let arm = TimerArm {
                    timer: ArmedTimer::T3_5,
                    duration: self.timing.ctrl_wait_us_duration_remaining(),
                };
                (Some(arm), None)
            }
            RtuState::CtrlWait => {
                let outcome = if self.rx_msg_ok {
                    FrameOutcome::Promote
                } else {
                    FrameOutcome::Drop
                };
                self.state = RtuState::Idle;
                self.rx_msg_ok = false;
                (None, Some(outcome))
            }
            RtuState::Idle => {
                // No timer should be pending while IDLE; a stray expiry is a
                // programming error in the caller's timer bookkeeping.
                (None, None)
            }
        }
    }

    fn arm_t1_5(&self) -> TimerArm {
        TimerArm {
            timer: ArmedTimer::T1_5,
            duration: Duration::from_micros(self.timing.t1_5_us),
        }
    }

    fn arm_t3_5(&self) -> TimerArm {
        TimerArm {
            timer: ArmedTimer::T3_5,
            duration: Duration::from_micros(self.timing.t3_5_us),
        }
    }
}

impl CharacterTiming {
    fn ctrl_wait_us_duration_remaining(&self) -> Duration {
        Duration::from_micros(self.ctrl_wait_us())
    }
}
