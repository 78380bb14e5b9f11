//! Virtual-time sensor line
//!
//! Synthesizes the waveform a DHT22 drives after a valid start pulse and
//! plays it back against either read strategy:
//!
//! - [`SimBus`] is a line plus a microsecond clock for [`BlockingSensor`];
//!   every clock read advances time by one tick.
//! - [`SimWorld`] emulates the periodic timer and the edge interrupt as a
//!   discrete-event simulation and dispatches events into an
//!   [`InterruptSensor`] (or a [`SharedSensor`]).
//!
//! The edge source models a latched pending flag: a transition matching the
//! configured sense is remembered even while the interrupt is disarmed, and
//! fires as soon as it is armed again unless it was cleared first.
//!
//! [`BlockingSensor`]: crate::blocking::BlockingSensor

use core::cell::{Cell, RefCell};

use heapless::Vec;

use crate::frame::{RawFrame, checksum};
use crate::hal::{Direction, Edge, EdgeSource, Level, Line, MicroClock, PulseTimer};
use crate::machine::InterruptSensor;
use crate::reading::SensorReading;
use crate::shared::SharedSensor;
use crate::timing::FRAME_BITS;

/// Delay between the host release and the sensor pulling low
pub const RESPONSE_DELAY_US: u32 = 30;
/// Nominal width of each acknowledge phase
pub const ACK_US: u32 = 80;
/// Nominal low phase before every bit
pub const SYNC_US: u32 = 50;
/// Nominal high phase of a 0
pub const ZERO_US: u32 = 26;
/// Nominal high phase of a 1
pub const ONE_US: u32 = 70;
/// Shortest host low pulse the simulated sensor treats as a start request
pub const SENSOR_START_MIN_US: u32 = 500;

const MAX_SEGMENTS: usize = 3 + 2 * FRAME_BITS as usize + 1;
const EDGE_LOG_CAPACITY: usize = 256;
const RUN_EVENT_LIMIT: usize = 10_000;

/// A stretch of constant level driven by the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub level: Level,
    pub duration_us: u32,
}

/// Ways to make the simulated sensor misbehave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Nothing on the line; it floats high
    Absent,
    /// Line shorted low
    StuckLow,
    /// Acknowledge low phase lasts this long
    StretchAckLow(u32),
    /// Acknowledge high phase lasts this long
    StretchAckHigh(u32),
    /// Sync phase of bit `.0` lasts `.1` us
    StretchSync(u8, u32),
    /// Data phase of bit `.0` lasts `.1` us
    StretchData(u8, u32),
    /// Bit is sent inverted, checksum untouched
    FlipBit(u8),
}

/// What a sensor drives onto the line after a start request.
#[derive(Debug, Clone)]
pub struct Waveform {
    segments: Vec<Segment, MAX_SEGMENTS>,
    present: bool,
    stuck_low: bool,
}

impl Waveform {
    /// Waveform of a frame carrying exactly these fields.
    pub fn from_fields(humidity: u16, temperature: u16, checksum: u8) -> Self {
        let frame = RawFrame::from_fields(humidity, temperature, checksum);
        let mut segments = Vec::new();
        let mut push = |level, duration_us| {
            segments.push(Segment { level, duration_us }).ok();
        };

        push(Level::High, RESPONSE_DELAY_US);
        push(Level::Low, ACK_US);
        push(Level::High, ACK_US);
        for i in 0..FRAME_BITS {
            push(Level::Low, SYNC_US);
            push(Level::High, if frame.bit(i) { ONE_US } else { ZERO_US });
        }
        // Sensor pulls low once more, then lets the line go
        push(Level::Low, SYNC_US);

        Self {
            segments,
            present: true,
            stuck_low: false,
        }
    }

    /// Waveform of a well-formed frame for this reading.
    pub fn from_reading(reading: &SensorReading) -> Self {
        let (humidity, temperature) = reading.to_raw();
        Self::from_fields(humidity, temperature, checksum(humidity, temperature))
    }

    /// Copy of this waveform with a fault applied.
    ///
    /// A fault aimed at a bit outside the frame leaves the waveform as it is.
    pub fn with_fault(&self, fault: Fault) -> Self {
        let mut waveform = self.clone();
        match fault {
            Fault::Absent => waveform.present = false,
            Fault::StuckLow => waveform.stuck_low = true,
            Fault::StretchAckLow(us) => waveform.stretch(1, us),
            Fault::StretchAckHigh(us) => waveform.stretch(2, us),
            Fault::StretchSync(bit, us) => waveform.stretch(Self::sync_index(bit), us),
            Fault::StretchData(bit, us) => waveform.stretch(Self::data_index(bit), us),
            Fault::FlipBit(bit) => {
                if let Some(segment) = waveform.segments.get_mut(Self::data_index(bit)) {
                    segment.duration_us = if segment.duration_us > ZERO_US {
                        ZERO_US
                    } else {
                        ONE_US
                    };
                }
            }
        }
        waveform
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Length of the whole response
    pub fn duration_us(&self) -> u32 {
        self.segments.iter().map(|s| s.duration_us).sum()
    }

    /// Level the sensor drives `offset_us` after the host released the line.
    pub fn level_at(&self, offset_us: u32) -> Level {
        let mut end = 0;
        for segment in &self.segments {
            end += segment.duration_us;
            if offset_us < end {
                return segment.level;
            }
        }
        Level::High
    }

    /// First level change strictly after `offset_us`.
    pub fn next_transition_after(&self, offset_us: u32) -> Option<(u32, Level)> {
        let mut end = 0;
        for (i, segment) in self.segments.iter().enumerate() {
            end += segment.duration_us;
            if end > offset_us {
                let next = self.segments.get(i + 1).map_or(Level::High, |s| s.level);
                if next != segment.level {
                    return Some((end, next));
                }
            }
        }
        None
    }

    fn stretch(&mut self, index: usize, duration_us: u32) {
        if let Some(segment) = self.segments.get_mut(index) {
            segment.duration_us = duration_us;
        }
    }

    // Bit 40 would land on the trailing low; only bits inside the frame map
    // to a segment.
    fn sync_index(bit: u8) -> usize {
        if bit < FRAME_BITS {
            3 + 2 * bit as usize
        } else {
            usize::MAX
        }
    }

    fn data_index(bit: u8) -> usize {
        if bit < FRAME_BITS {
            4 + 2 * bit as usize
        } else {
            usize::MAX
        }
    }
}

/// Host side of the wire plus the simulated sensor listening on it.
struct Wire<'w> {
    waveform: &'w Waveform,
    direction: Cell<Direction>,
    driven: Cell<Level>,
    low_since: Cell<Option<u32>>,
    response_at: Cell<Option<u32>>,
}

impl<'w> Wire<'w> {
    fn new(waveform: &'w Waveform) -> Self {
        Self {
            waveform,
            direction: Cell::new(Direction::Input),
            driven: Cell::new(Level::High),
            low_since: Cell::new(None),
            response_at: Cell::new(None),
        }
    }

    fn host_pulls_low(&self) -> bool {
        self.direction.get() == Direction::Output && self.driven.get() == Level::Low
    }

    fn level(&self, now: u32) -> Level {
        if self.direction.get() == Direction::Output {
            return self.driven.get();
        }
        if self.waveform.stuck_low {
            return Level::Low;
        }
        match self.response_at.get() {
            Some(start) if now >= start => self.waveform.level_at(now - start),
            _ => Level::High,
        }
    }

    /// Apply a host-side change and let the sensor react to a finished start
    /// pulse.
    fn update(&self, now: u32, change: impl FnOnce(&Self)) {
        let was_low = self.host_pulls_low();
        change(self);
        let is_low = self.host_pulls_low();

        if !was_low && is_low {
            self.low_since.set(Some(now));
        } else if was_low && !is_low {
            let held = self
                .low_since
                .take()
                .map_or(0, |since| now.wrapping_sub(since));
            let released = self.direction.get() == Direction::Input;
            if released && held >= SENSOR_START_MIN_US && self.waveform.present {
                self.response_at.set(Some(now));
            }
        }
    }

    fn next_transition(&self, now: u32) -> Option<(u32, Level)> {
        if self.direction.get() == Direction::Output || self.waveform.stuck_low {
            return None;
        }
        let start = self.response_at.get()?;
        let offset = now.checked_sub(start)?;
        self.waveform
            .next_transition_after(offset)
            .map(|(at, level)| (start + at, level))
    }
}

// ---------------------------------------------------------------------------
// Busy-wait playback
// ---------------------------------------------------------------------------

/// Line and clock for the busy-wait reader. Implemented on `&SimBus` so one
/// bus can serve as both.
pub struct SimBus<'w> {
    wire: Wire<'w>,
    now: Cell<u32>,
}

impl<'w> SimBus<'w> {
    pub fn new(waveform: &'w Waveform) -> Self {
        Self {
            wire: Wire::new(waveform),
            now: Cell::new(0),
        }
    }

    pub fn direction(&self) -> Direction {
        self.wire.direction.get()
    }

    /// Level the host last wrote
    pub fn driven_level(&self) -> Level {
        self.wire.driven.get()
    }

    pub fn now_us(&self) -> u32 {
        self.now.get()
    }
}

impl Line for &SimBus<'_> {
    fn set_direction(&mut self, direction: Direction) {
        let now = self.now.get();
        self.wire.update(now, |w| w.direction.set(direction));
    }

    fn write_level(&mut self, level: Level) {
        let now = self.now.get();
        self.wire.update(now, |w| w.driven.set(level));
    }

    fn read_level(&mut self) -> Level {
        self.wire.level(self.now.get())
    }
}

impl MicroClock for &SimBus<'_> {
    fn now(&self) -> u32 {
        let now = self.now.get();
        self.now.set(now.wrapping_add(1));
        now
    }
}

// ---------------------------------------------------------------------------
// Interrupt playback
// ---------------------------------------------------------------------------

/// Operations issued on the simulated edge source, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeOp {
    Arm(Edge),
    Disarm,
    ClearPending,
}

/// Observable peripheral state of a [`SimWorld`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimSnapshot {
    pub direction: Direction,
    pub driven: Level,
    pub timer_running: bool,
    pub armed: Option<Edge>,
}

/// Anything the simulated interrupts can be delivered to.
pub trait EventSink {
    fn timer_compare(&mut self);
    fn edge(&mut self);
}

impl<L, T, E> EventSink for InterruptSensor<L, T, E>
where
    L: Line,
    T: PulseTimer,
    E: EdgeSource,
{
    fn timer_compare(&mut self) {
        self.on_timer_compare();
    }

    fn edge(&mut self) {
        self.on_edge();
    }
}

impl<L, T, E> EventSink for &SharedSensor<L, T, E>
where
    L: Line,
    T: PulseTimer,
    E: EdgeSource,
{
    fn timer_compare(&mut self) {
        self.on_timer_compare();
    }

    fn edge(&mut self) {
        self.on_edge();
    }
}

/// Discrete-event model of the line, timer and edge interrupt.
pub struct SimWorld<'w> {
    wire: Wire<'w>,
    now: Cell<u32>,
    timer_running: Cell<bool>,
    compare: Cell<u32>,
    counter_base: Cell<u32>,
    armed: Cell<Option<Edge>>,
    sense: Cell<Edge>,
    pending: Cell<bool>,
    ignore_clear: Cell<bool>,
    edge_log: RefCell<Vec<EdgeOp, EDGE_LOG_CAPACITY>>,
}

/// Interrupt-driven sensor wired to a [`SimWorld`]
pub type SimSensor<'a> = InterruptSensor<SimLine<'a>, SimTimer<'a>, SimEdges<'a>>;

impl<'w> SimWorld<'w> {
    pub fn new(waveform: &'w Waveform) -> Self {
        Self {
            wire: Wire::new(waveform),
            now: Cell::new(0),
            timer_running: Cell::new(false),
            compare: Cell::new(0),
            counter_base: Cell::new(0),
            armed: Cell::new(None),
            sense: Cell::new(Edge::Falling),
            pending: Cell::new(false),
            ignore_clear: Cell::new(false),
            edge_log: RefCell::new(Vec::new()),
        }
    }

    /// Peripherals for one sensor on this world.
    pub fn peripherals<'a>(&'a self) -> (SimLine<'a>, SimTimer<'a>, SimEdges<'a>)
    where
        'w: 'a,
    {
        let world: &'a SimWorld<'a> = self;
        (SimLine(world), SimTimer(world), SimEdges(world))
    }

    /// A fresh interrupt-driven sensor on this world.
    pub fn sensor<'a>(&'a self) -> SimSensor<'a>
    where
        'w: 'a,
    {
        let (line, timer, edges) = self.peripherals();
        InterruptSensor::new(line, timer, edges)
    }

    /// Make `clear_pending` a no-op, exposing stale edges.
    pub fn ignore_clear_pending(&self, ignore: bool) {
        self.ignore_clear.set(ignore);
    }

    pub fn now(&self) -> u32 {
        self.now.get()
    }

    /// Let time pass without delivering events.
    pub fn advance(&self, us: u32) {
        self.now.set(self.now.get() + us);
    }

    pub fn snapshot(&self) -> SimSnapshot {
        SimSnapshot {
            direction: self.wire.direction.get(),
            driven: self.wire.driven.get(),
            timer_running: self.timer_running.get(),
            armed: self.armed.get(),
        }
    }

    pub fn edge_log(&self) -> Vec<EdgeOp, EDGE_LOG_CAPACITY> {
        self.edge_log.borrow().clone()
    }

    /// Advance to the next event and deliver it.
    ///
    /// Returns `false` once nothing else can happen: timer stopped and no
    /// armed edge ahead.
    pub fn step<S: EventSink>(&self, sink: &mut S) -> bool {
        if self.armed.get().is_some() && self.pending.get() {
            self.pending.set(false);
            sink.edge();
            return true;
        }

        let timer_at = self
            .timer_running
            .get()
            .then(|| self.counter_base.get() + self.compare.get());
        let wire_at = self.wire.next_transition(self.now.get());

        match (wire_at, timer_at) {
            // An edge landing exactly on a deadline still counts as in time
            (Some((at, level)), Some(deadline)) if at <= deadline => self.deliver_edge(at, level, sink),
            (Some((at, level)), None) => self.deliver_edge(at, level, sink),
            (_, Some(deadline)) => {
                self.now.set(deadline);
                self.counter_base.set(deadline);
                sink.timer_compare();
            }
            (None, None) => return false,
        }
        true
    }

    /// Deliver events until the world goes quiet.
    pub fn run<S: EventSink>(&self, sink: &mut S) {
        for _ in 0..RUN_EVENT_LIMIT {
            if !self.step(sink) {
                return;
            }
        }
    }

    /// Deliver events until `done` holds or the world goes quiet.
    pub fn run_until<S: EventSink>(&self, sink: &mut S, done: impl Fn(&S) -> bool) {
        for _ in 0..RUN_EVENT_LIMIT {
            if done(sink) || !self.step(sink) {
                return;
            }
        }
    }

    fn deliver_edge<S: EventSink>(&self, at: u32, level: Level, sink: &mut S) {
        self.now.set(at);
        self.latch(level);
        if self.armed.get().is_some() && self.pending.get() {
            self.pending.set(false);
            sink.edge();
        }
    }

    fn latch(&self, level: Level) {
        if self.sense.get().matches(level) {
            self.pending.set(true);
        }
    }

    /// Host-side change; the pin sees its own transitions too.
    fn host_change(&self, change: impl FnOnce(&Wire<'w>)) {
        let now = self.now.get();
        let before = self.wire.level(now);
        self.wire.update(now, change);
        let after = self.wire.level(now);
        if before != after {
            self.latch(after);
        }
    }

    fn log(&self, op: EdgeOp) {
        self.edge_log.borrow_mut().push(op).ok();
    }
}

pub struct SimLine<'a>(&'a SimWorld<'a>);

impl Line for SimLine<'_> {
    fn set_direction(&mut self, direction: Direction) {
        self.0.host_change(|w| w.direction.set(direction));
    }

    fn write_level(&mut self, level: Level) {
        self.0.host_change(|w| w.driven.set(level));
    }

    fn read_level(&mut self) -> Level {
        self.0.wire.level(self.0.now.get())
    }
}

pub struct SimTimer<'a>(&'a SimWorld<'a>);

impl PulseTimer for SimTimer<'_> {
    fn start(&mut self, compare_us: u32) {
        self.0.counter_base.set(self.0.now.get());
        self.0.compare.set(compare_us);
        self.0.timer_running.set(true);
    }

    fn set_compare(&mut self, compare_us: u32) {
        self.0.compare.set(compare_us);
    }

    fn stop(&mut self) {
        self.0.timer_running.set(false);
    }

    fn reset_counter(&mut self) {
        self.0.counter_base.set(self.0.now.get());
    }

    fn read_counter(&self) -> u32 {
        self.0.now.get() - self.0.counter_base.get()
    }
}

pub struct SimEdges<'a>(&'a SimWorld<'a>);

impl EdgeSource for SimEdges<'_> {
    fn arm(&mut self, edge: Edge) {
        self.0.log(EdgeOp::Arm(edge));
        self.0.sense.set(edge);
        self.0.armed.set(Some(edge));
    }

    fn disarm(&mut self) {
        self.0.log(EdgeOp::Disarm);
        self.0.armed.set(None);
    }

    fn clear_pending(&mut self) {
        self.0.log(EdgeOp::ClearPending);
        if !self.0.ignore_clear.get() {
            self.0.pending.set(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waveform_shape() {
        let waveform = Waveform::from_fields(0x028D, 0x00FB, 0x8A);
        assert_eq!(waveform.segments().len(), MAX_SEGMENTS);
        assert_eq!(waveform.level_at(0), Level::High);
        assert_eq!(waveform.level_at(RESPONSE_DELAY_US), Level::Low);
        assert_eq!(waveform.level_at(waveform.duration_us()), Level::High);
    }

    #[test]
    fn test_transitions_alternate() {
        let waveform = Waveform::from_fields(0xFFFF, 0x0000, 0xFE);
        let mut offset = 0;
        let mut expected = Level::Low;
        let mut count = 0;
        while let Some((at, level)) = waveform.next_transition_after(offset) {
            assert!(at > offset);
            assert_eq!(level, expected);
            expected = if level == Level::Low { Level::High } else { Level::Low };
            offset = at;
            count += 1;
        }
        assert_eq!(count, MAX_SEGMENTS, "every segment boundary is an edge");
    }

    #[test]
    fn test_flip_bit_changes_width() {
        let waveform = Waveform::from_fields(0, 0, 0);
        let flipped = waveform.with_fault(Fault::FlipBit(3));
        assert_eq!(flipped.segments()[Waveform::data_index(3)].duration_us, ONE_US);
    }

    #[test]
    fn test_faults_outside_the_frame_are_ignored() {
        let waveform = Waveform::from_fields(0x028D, 0x00FB, 0x8A);
        for fault in [
            Fault::StretchSync(FRAME_BITS, 200),
            Fault::StretchData(FRAME_BITS, 200),
            Fault::FlipBit(FRAME_BITS),
            Fault::FlipBit(u8::MAX),
        ] {
            assert_eq!(
                waveform.with_fault(fault).segments(),
                waveform.segments(),
                "{fault:?}"
            );
        }

        let last = waveform.with_fault(Fault::FlipBit(FRAME_BITS - 1));
        assert_ne!(last.segments(), waveform.segments());
    }

    #[test]
    fn test_short_start_pulse_is_ignored() {
        let waveform = Waveform::from_fields(0, 0, 0);
        let bus = SimBus::new(&waveform);
        let mut line = &bus;
        line.write_level(Level::Low);
        line.set_direction(Direction::Output);
        line.set_direction(Direction::Input);
        assert_eq!(bus.wire.response_at.get(), None);
    }
}
