//! Protocol timing windows and the pulse classifier
//!
//! Every window is expressed in true microseconds and shared by both read
//! strategies. The busy-wait reader compares them against a free-running
//! microsecond clock, the interrupt-driven machine programs them as timer
//! deadlines and compares them against the counter value captured at each
//! edge.
//!
//! ## Bus timing
//!
//! ```text
//!  host start      release   ack low   ack high   bit: sync low + data high
//! ‾‾\__________/‾‾‾‾‾‾\________/‾‾‾‾‾‾‾‾\_____/‾‾‾\_____/‾‾‾‾‾‾‾\__ ...
//!    >= 1 ms     20-40us   ~80us     ~80us     ~50us 26-28us (0) / ~70us (1)
//! ```
//!
//! Bits are decided on the width of the high phase alone. The low phase of
//! each bit is measured separately and only checked against its own window.

/// Length of one host-start timer period.
pub const HOST_START_PERIOD_US: u32 = 550;

/// Number of chained timer periods the host holds the line low for.
pub const HOST_START_PERIODS: u8 = 2;

/// Total host start hold, at least the 1 ms the datasheet asks for.
pub const HOST_START_HOLD_US: u32 = HOST_START_PERIOD_US * HOST_START_PERIODS as u32;

/// How long the busy-wait reader waits for the released bus to idle high.
pub const BUS_IDLE_TIMEOUT_US: u32 = 250;

/// Window for the sensor to pull the line low after the host releases it.
pub const PRESENCE_TIMEOUT_US: u32 = 50;

/// Longest accepted low phase of the sensor acknowledge.
pub const ACK_LOW_MAX_US: u32 = 100;

/// Longest accepted high phase of the sensor acknowledge.
pub const ACK_HIGH_MAX_US: u32 = 100;

/// Longest accepted low (sync) phase preceding every data bit.
pub const SYNC_MAX_US: u32 = 70;

/// High phases up to and including this width are a logical 0.
pub const BIT_ONE_THRESHOLD_US: u32 = 40;

/// Longest accepted high (data) phase of a bit.
pub const BIT_HIGH_MAX_US: u32 = 100;

/// Number of bits in one sensor frame.
pub const FRAME_BITS: u8 = 40;

/// Classification of a measured high-phase width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pulse {
    /// Logical 0 (nominal 26-28 us)
    Short,
    /// Logical 1 (nominal 70 us)
    Long,
    /// Wider than any valid bit
    Timeout,
}

impl Pulse {
    /// Bit value carried by the pulse, `None` for a timeout.
    pub const fn bit(self) -> Option<bool> {
        match self {
            Pulse::Short => Some(false),
            Pulse::Long => Some(true),
            Pulse::Timeout => None,
        }
    }
}

/// Classify the width of a bit's high phase.
///
/// A width exactly at [`BIT_ONE_THRESHOLD_US`] resolves to [`Pulse::Short`],
/// matching the nominal datasheet timing for a 0.
pub const fn classify_bit(high_us: u32) -> Pulse {
    if high_us <= BIT_ONE_THRESHOLD_US {
        Pulse::Short
    } else if high_us <= BIT_HIGH_MAX_US {
        Pulse::Long
    } else {
        Pulse::Timeout
    }
}

/// Whether a phase that lasted `elapsed_us` stayed inside its window.
///
/// The bound is inclusive: a phase of exactly `max_us` proceeds.
pub const fn within(elapsed_us: u32, max_us: u32) -> bool {
    elapsed_us <= max_us
}
