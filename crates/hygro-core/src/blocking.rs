//! Busy-wait read strategy
//!
//! One call runs the whole exchange (start pulse, acknowledge, 40 bits) by
//! spinning on the line and a microsecond clock, then decodes the frame.
//! Worst case the call blocks for about 6 ms.
//!
//! Bit discrimination leaves almost no slack for preemption, so the timed
//! part of the exchange runs inside a critical section.

use log::{debug, warn};

use crate::error::ErrorKind;
use crate::frame::RawFrame;
use crate::hal::{Direction, Level, Line, MicroClock};
use crate::reading::SensorReading;
use crate::timing::{
    ACK_HIGH_MAX_US, ACK_LOW_MAX_US, BIT_HIGH_MAX_US, BUS_IDLE_TIMEOUT_US, HOST_START_HOLD_US,
    PRESENCE_TIMEOUT_US, SYNC_MAX_US, classify_bit, within,
};

/// DHT22 reader that blocks the caller for the duration of a read.
pub struct BlockingSensor<L, C> {
    line: L,
    clock: C,
}

impl<L, C> BlockingSensor<L, C>
where
    L: Line,
    C: MicroClock,
{
    pub fn new(line: L, clock: C) -> Self {
        Self { line, clock }
    }

    /// Drive the line to its idle-high condition. Safe to call repeatedly.
    pub fn initialize(&mut self) {
        self.line.drive_idle();
    }

    /// Run one complete read.
    ///
    /// Datasheet asks for at least 2 s between reads of the same sensor.
    pub fn read(&mut self) -> Result<SensorReading, ErrorKind> {
        let transfer = critical_section::with(|_cs| self.transfer());
        self.line.drive_idle();

        let frame = transfer.inspect_err(|e| warn!("DHT22 read failed: {}", e))?;
        let reading = frame.decode()?;
        debug!(
            "DHT22 read: {}.{} C, {}.{} %RH",
            reading.temperature_integral(),
            reading.temperature_decimal(),
            reading.humidity_integral(),
            reading.humidity_decimal()
        );
        Ok(reading)
    }

    /// Give back the line and clock.
    pub fn release(self) -> (L, C) {
        (self.line, self.clock)
    }

    fn transfer(&mut self) -> Result<RawFrame, ErrorKind> {
        // The bus must idle high before we can signal anything on it
        self.line.set_direction(Direction::Input);
        let idle_from = self.clock.now();
        self.wait_while(Level::Low, idle_from, BUS_IDLE_TIMEOUT_US)
            .map_err(|_| ErrorKind::BusHung)?;

        // Host start
        self.line.write_level(Level::Low);
        self.line.set_direction(Direction::Output);
        self.hold(HOST_START_HOLD_US);
        self.line.set_direction(Direction::Input);
        let released = self.clock.now();

        // Acknowledge: sensor pulls low, then high, then low into the first
        // bit. Each phase is timed from the sample that ended the previous one.
        let ack_low_from = self
            .wait_while(Level::High, released, PRESENCE_TIMEOUT_US)
            .map_err(|_| ErrorKind::NotPresent)?;
        let ack_high_from = self
            .wait_while(Level::Low, ack_low_from, ACK_LOW_MAX_US)
            .map_err(|_| ErrorKind::AckTimeout)?;
        let mut sync_from = self
            .wait_while(Level::High, ack_high_from, ACK_HIGH_MAX_US)
            .map_err(|_| ErrorKind::AckTimeout)?;

        let mut frame = RawFrame::new();
        while !frame.is_complete() {
            let data_from = self
                .wait_while(Level::Low, sync_from, SYNC_MAX_US)
                .map_err(|_| ErrorKind::SyncTimeout)?;
            let data_end = self
                .wait_while(Level::High, data_from, BIT_HIGH_MAX_US)
                .map_err(|_| ErrorKind::DataTimeout)?;
            let bit = classify_bit(data_end.wrapping_sub(data_from))
                .bit()
                .ok_or(ErrorKind::DataTimeout)?;
            frame.append_bit(bit);
            sync_from = data_end;
        }

        Ok(frame)
    }

    /// Spin while the line reads `level`, for a phase that began at `since`.
    ///
    /// Returns the timestamp of the first sample at the other level, or how
    /// long the phase had lasted once it outgrew `max_us`. A phase of exactly
    /// `max_us` proceeds.
    fn wait_while(&mut self, level: Level, since: u32, max_us: u32) -> Result<u32, u32> {
        loop {
            // Sample first so the timestamp belongs to the sample
            let seen = self.line.read_level();
            let now = self.clock.now();
            // Wrapping difference keeps working across a clock rollover
            let elapsed = now.wrapping_sub(since);
            if !within(elapsed, max_us) {
                return Err(elapsed);
            }
            if seen != level {
                return Ok(now);
            }
        }
    }

    fn hold(&mut self, duration_us: u32) {
        let start = self.clock.now();
        while self.clock.now().wrapping_sub(start) < duration_us {}
    }
}
