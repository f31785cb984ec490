//! Character-time derived silences (T1.5 / T3.5) used to delimit RTU frames.

/// Bits carried by one Modbus RTU serial character: 1 start + 8 data + 1 parity + 1 stop.
const BITS_PER_CHAR: u64 = 11;

/// The inter-character and inter-frame silences at a given baud rate, in
/// microseconds, and the derived emission timeout for a frame of a given
/// length.
///
/// Above 19200 baud the Modbus spec fixes both silences regardless of the
/// actual bit rate, so `for_baud_rate` produces the same pair for any baud
/// above that threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacterTiming {
    /// T1.5: maximum gap between two characters of the same frame, in microseconds.
    pub t1_5_us: u64,
    /// T3.5: minimum silence marking the end of a frame / idle bus, in microseconds.
    pub t3_5_us: u64,
}

impl CharacterTiming {
    /// Baud rates above this threshold use the Modbus-mandated fixed silences
    /// instead of timings derived from the bit rate.
    pub const FIXED_TIMING_THRESHOLD_BAUD: u32 = 19_200;

    /// Derives T1.5/T3.5 for `baud_rate`.
    ///
    /// Uses truncating (floor) division, matching the upstream reference's
    /// own `rtu_chars2bits(...) / baudrate` integer arithmetic.
    ///
    /// # Examples
    /// ```
    /// use modbus_rtu::timing::CharacterTiming;
    ///
    /// let t = CharacterTiming::for_baud_rate(9600);
    /// assert_eq!(t.t1_5_us, 1718);
    /// assert_eq!(t.t3_5_us, 4010);
    ///
    /// let fast = CharacterTiming::for_baud_rate(115200);
    /// assert_eq!(fast.t1_5_us, 750);
    /// assert_eq!(fast.t3_5_us, 1750);
    /// ```
    pub fn for_baud_rate(baud_rate: u32) -> Self {
        if baud_rate > Self::FIXED_TIMING_THRESHOLD_BAUD {
            Self {
                t1_5_us: 750,
                t3_5_us: 1750,
            }
        } else {
            let baud = baud_rate as u64;
            Self {
                t1_5_us: (BITS_PER_CHAR * 1_500_000) / baud,
                t3_5_us: (BITS_PER_CHAR * 3_500_000) / baud,
            }
        }
    }

    /// Time to put `frame_len` bytes on the wire at `baud_rate`, in microseconds.
    pub fn frame_transmit_us(baud_rate: u32, frame_len: usize) -> u64 {
        (frame_len as u64 * BITS_PER_CHAR * 1_000_000) / baud_rate as u64
    }

    /// The residual silence after T1.5 has already elapsed: the `CTRL_WAIT`
    /// window is `T3.5 - T1.5`, roughly two character times.
    pub fn ctrl_wait_us(&self) -> u64 {
        self.t3_5_us.saturating_sub(self.t1_5_us)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ordering_invariant_holds_below_threshold() {
        for baud in [1_200, 2_400, 4_800, 9_600, 19_200] {
            let t = CharacterTiming::for_baud_rate(baud);
            assert!(t.t1_5_us < t.t3_5_us, "baud={baud}");
        }
    }

    #[test]
    fn fixed_above_threshold() {
        for baud in [38_400, 57_600, 115_200] {
            let t = CharacterTiming::for_baud_rate(baud);
            assert_eq!(t.t1_5_us, 750);
            assert_eq!(t.t3_5_us, 1750);
        }
    }
}
