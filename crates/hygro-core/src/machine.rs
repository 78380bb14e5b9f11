//! Interrupt-driven read strategy
//!
//! The read runs as a state machine advanced by two interrupt sources: the
//! compare match of a periodic timer and an edge interrupt on the data line.
//! The foreground only starts reads and polls for the outcome, it is never
//! blocked.
//!
//! ## Phases
//!
//! | State                 | Armed edge | Timer deadline          | Timer fires → |
//! |-----------------------|------------|-------------------------|---------------|
//! | `HostStartHold`       | none       | `HOST_START_PERIOD_US`  | next period, then release |
//! | `HostStartPullup`     | falling    | `PRESENCE_TIMEOUT_US`   | `NotPresent`  |
//! | `AwaitSensorResponse` | rising     | `ACK_LOW_MAX_US`        | `AckTimeout`  |
//! | `SensorPulledUp`      | falling    | `ACK_HIGH_MAX_US`       | `AckTimeout`  |
//! | `Transferring` (sync) | any        | `SYNC_MAX_US`           | `SyncTimeout` |
//! | `Transferring` (data) | any        | `BIT_HIGH_MAX_US`       | `DataTimeout` |
//! | anything else         | none       | stopped                 | `NotResponding` |
//!
//! Each edge captures the timer counter (the width of the phase that just
//! ended) and resets it, so every deadline is measured from the last edge.
//! Every terminal transition stops the timer, disarms the edge interrupt and
//! drives the line high.

use log::{debug, trace, warn};

use crate::error::ErrorKind;
use crate::frame::RawFrame;
use crate::hal::{Direction, Edge, EdgeSource, Level, Line, PulseTimer};
use crate::reading::SensorReading;
use crate::timing::{
    ACK_HIGH_MAX_US, ACK_LOW_MAX_US, BIT_HIGH_MAX_US, HOST_START_PERIOD_US, HOST_START_PERIODS,
    PRESENCE_TIMEOUT_US, SYNC_MAX_US, classify_bit, within,
};

/// Which phase of the current bit the machine is timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitPhase {
    /// Low phase; ends on a rising edge
    Sync,
    /// High phase; ends on a falling edge
    Data,
}

/// Where the read pipeline currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    Idle,
    HostStartHold,
    HostStartPullup,
    AwaitSensorResponse,
    SensorPulledUp,
    Transferring(BitPhase),
    ChecksumPending,
    DataReady,
    Failed(ErrorKind),
}

impl ProtocolState {
    /// Terminal states accept a new start request. Nothing else does.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            ProtocolState::Idle | ProtocolState::DataReady | ProtocolState::Failed(_)
        )
    }

    /// Whether a read is currently in flight.
    pub const fn is_busy(self) -> bool {
        !self.is_terminal()
    }
}

/// Outcome of [`InterruptSensor::check_status`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No read has been started since initialization
    Idle,
    /// A read is in flight
    Pending,
    Ready(SensorReading),
    Failed(ErrorKind),
}

/// Per-read data the two handlers mutate together.
#[derive(Debug, Clone, Copy)]
struct Session {
    state: ProtocolState,
    frame: RawFrame,
    start_periods: u8,
    reading: Option<SensorReading>,
}

impl Session {
    const fn new() -> Self {
        Self {
            state: ProtocolState::Idle,
            frame: RawFrame::new(),
            start_periods: 0,
            reading: None,
        }
    }
}

/// DHT22 reader driven by a timer interrupt and an edge interrupt.
///
/// `on_timer_compare` and `on_edge` are meant to be called from the two
/// interrupt handlers; `start_reading` and `check_status` from the
/// foreground. The caller must serialize them, see
/// [`SharedSensor`](crate::shared::SharedSensor).
pub struct InterruptSensor<L, T, E> {
    line: L,
    timer: T,
    edges: E,
    session: Session,
}

impl<L, T, E> InterruptSensor<L, T, E>
where
    L: Line,
    T: PulseTimer,
    E: EdgeSource,
{
    pub fn new(line: L, timer: T, edges: E) -> Self {
        Self {
            line,
            timer,
            edges,
            session: Session::new(),
        }
    }

    /// Put the line, timer and edge interrupt into their idle condition and
    /// reset the machine to [`ProtocolState::Idle`]. Idempotent.
    pub fn initialize(&mut self) {
        self.halt();
        self.session = Session::new();
    }

    /// Begin a new read.
    ///
    /// Rejected with [`ErrorKind::Busy`] while a read is in flight; the
    /// in-flight read is left untouched.
    pub fn start_reading(&mut self) -> Result<(), ErrorKind> {
        if self.session.state.is_busy() {
            debug!("Start rejected, machine busy in {:?}", self.session.state);
            return Err(ErrorKind::Busy);
        }

        self.session = Session::new();
        self.edges.disarm();
        self.line.write_level(Level::Low);
        self.line.set_direction(Direction::Output);
        self.session.state = ProtocolState::HostStartHold;
        self.timer.start(HOST_START_PERIOD_US);
        Ok(())
    }

    /// Poll the outcome of the current read.
    ///
    /// The first call after the last bit arrived validates the checksum and
    /// decodes the frame; later calls return the stored outcome.
    pub fn check_status(&mut self) -> Status {
        if self.session.state == ProtocolState::ChecksumPending {
            match self.session.frame.decode() {
                Ok(reading) => {
                    debug!(
                        "DHT22 reading ready: {}.{} C, {}.{} %RH",
                        reading.temperature_integral(),
                        reading.temperature_decimal(),
                        reading.humidity_integral(),
                        reading.humidity_decimal()
                    );
                    self.session.reading = Some(reading);
                    self.session.state = ProtocolState::DataReady;
                }
                Err(e) => self.session.state = ProtocolState::Failed(e),
            }
        }

        match self.session.state {
            ProtocolState::Idle => Status::Idle,
            ProtocolState::DataReady => match self.session.reading {
                Some(reading) => Status::Ready(reading),
                None => Status::Failed(ErrorKind::NotResponding),
            },
            ProtocolState::Failed(e) => Status::Failed(e),
            _ => Status::Pending,
        }
    }

    /// Timer compare-match handler body.
    pub fn on_timer_compare(&mut self) {
        self.timer.acknowledge();
        match self.session.state {
            ProtocolState::HostStartHold => {
                self.session.start_periods += 1;
                if self.session.start_periods < HOST_START_PERIODS {
                    return;
                }
                self.release_line();
            }
            ProtocolState::HostStartPullup => self.fail(ErrorKind::NotPresent),
            ProtocolState::AwaitSensorResponse | ProtocolState::SensorPulledUp => {
                self.fail(ErrorKind::AckTimeout)
            }
            ProtocolState::Transferring(BitPhase::Sync) => self.fail(ErrorKind::SyncTimeout),
            ProtocolState::Transferring(BitPhase::Data) => self.fail(ErrorKind::DataTimeout),
            state => {
                warn!("Timer fired in {:?}, sensor not responding", state);
                self.fail(ErrorKind::NotResponding);
            }
        }
    }

    /// Edge interrupt handler body.
    pub fn on_edge(&mut self) {
        self.edges.clear_pending();
        let elapsed = self.timer.read_counter();
        self.timer.reset_counter();

        match self.session.state {
            ProtocolState::HostStartPullup => {
                if !within(elapsed, PRESENCE_TIMEOUT_US) {
                    return self.fail(ErrorKind::NotPresent);
                }
                self.enter(ProtocolState::AwaitSensorResponse, Edge::Rising, ACK_LOW_MAX_US);
            }
            ProtocolState::AwaitSensorResponse => {
                if !within(elapsed, ACK_LOW_MAX_US) {
                    return self.fail(ErrorKind::AckTimeout);
                }
                self.enter(ProtocolState::SensorPulledUp, Edge::Falling, ACK_HIGH_MAX_US);
            }
            ProtocolState::SensorPulledUp => {
                if !within(elapsed, ACK_HIGH_MAX_US) {
                    return self.fail(ErrorKind::AckTimeout);
                }
                self.enter(
                    ProtocolState::Transferring(BitPhase::Sync),
                    Edge::Any,
                    SYNC_MAX_US,
                );
            }
            ProtocolState::Transferring(BitPhase::Sync) => {
                if !within(elapsed, SYNC_MAX_US) {
                    return self.fail(ErrorKind::SyncTimeout);
                }
                self.session.state = ProtocolState::Transferring(BitPhase::Data);
                self.timer.set_compare(BIT_HIGH_MAX_US);
            }
            ProtocolState::Transferring(BitPhase::Data) => self.on_data_edge(elapsed),
            state => trace!("Ignoring edge in {:?}", state),
        }
    }

    /// Current state of the pipeline
    pub fn state(&self) -> ProtocolState {
        self.session.state
    }

    /// Frame as received so far
    pub fn frame(&self) -> &RawFrame {
        &self.session.frame
    }

    /// Give back the peripherals.
    pub fn release(self) -> (L, T, E) {
        (self.line, self.timer, self.edges)
    }

    fn on_data_edge(&mut self, high_us: u32) {
        let Some(bit) = classify_bit(high_us).bit() else {
            return self.fail(ErrorKind::DataTimeout);
        };
        self.session.frame.append_bit(bit);
        trace!("Bit {} = {}", self.session.frame.bits_received(), bit as u8);

        if self.session.frame.is_complete() {
            self.halt();
            self.session.state = ProtocolState::ChecksumPending;
            return;
        }

        self.session.state = ProtocolState::Transferring(BitPhase::Sync);
        self.timer.set_compare(SYNC_MAX_US);
    }

    /// End of the host start pulse: let go of the line and wait for the
    /// sensor to pull it low.
    fn release_line(&mut self) {
        self.session.start_periods = 0;
        self.line.set_direction(Direction::Input);
        self.timer.reset_counter();
        self.enter(ProtocolState::HostStartPullup, Edge::Falling, PRESENCE_TIMEOUT_US);
    }

    fn enter(&mut self, state: ProtocolState, edge: Edge, deadline_us: u32) {
        self.rearm(edge);
        self.timer.set_compare(deadline_us);
        self.session.state = state;
    }

    /// Change the edge sense without letting a stale edge from the previous
    /// phase through.
    fn rearm(&mut self, edge: Edge) {
        self.edges.disarm();
        self.edges.clear_pending();
        self.edges.arm(edge);
    }

    fn fail(&mut self, error: ErrorKind) {
        warn!(
            "DHT22 read failed in {:?} after {} bits: {}",
            self.session.state,
            self.session.frame.bits_received(),
            error
        );
        self.halt();
        self.session.state = ProtocolState::Failed(error);
    }

    /// Stop all timing hardware and drive the line to its safe idle level.
    fn halt(&mut self) {
        self.timer.stop();
        self.timer.reset_counter();
        self.edges.disarm();
        self.edges.clear_pending();
        self.line.drive_idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::checksum;
    use crate::sim::{EdgeOp, Fault, SimWorld, Waveform};
    use crate::timing::BIT_ONE_THRESHOLD_US;

    fn run_read(waveform: &Waveform) -> Status {
        let world = SimWorld::new(waveform);
        let mut sensor = world.sensor();
        sensor.initialize();
        assert_eq!(sensor.start_reading(), Ok(()));
        world.run(&mut sensor);
        sensor.check_status()
    }

    #[test]
    fn test_reference_frame() {
        let status = run_read(&Waveform::from_fields(0x028D, 0x00FB, 0x8A));
        let Status::Ready(reading) = status else {
            panic!("expected a reading, got {status:?}");
        };
        assert_eq!(reading.humidity_integral(), 65);
        assert_eq!(reading.humidity_decimal(), 3);
        assert_eq!(reading.temperature_integral(), 25);
        assert_eq!(reading.temperature_decimal(), 1);
    }

    #[test]
    fn test_negative_temperature() {
        let status = run_read(&Waveform::from_fields(0, 0x8032, checksum(0, 0x8032)));
        assert!(matches!(status, Status::Ready(r) if r.temperature == -50));
    }

    #[test]
    fn test_round_trip_through_interrupts() {
        for temperature in (-400i16..=800).step_by(41) {
            for humidity in (0u16..=1000).step_by(83) {
                let expected = SensorReading {
                    temperature,
                    humidity,
                };
                let status = run_read(&Waveform::from_reading(&expected));
                assert_eq!(status, Status::Ready(expected));
            }
        }
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let waveform = Waveform::from_fields(0x028D, 0x00FB, 0x8A);
        let world = SimWorld::new(&waveform);
        let mut sensor = world.sensor();
        sensor.initialize();
        let once = (sensor.state(), *sensor.frame(), world.snapshot());
        sensor.initialize();
        let twice = (sensor.state(), *sensor.frame(), world.snapshot());
        assert_eq!(once, twice);
        assert_eq!(sensor.state(), ProtocolState::Idle);
        assert_eq!(sensor.check_status(), Status::Idle);
    }

    #[test]
    fn test_busy_guard_preserves_in_flight_frame() {
        let waveform = Waveform::from_fields(0x028D, 0x00FB, 0x8A);
        let world = SimWorld::new(&waveform);
        let mut sensor = world.sensor();
        sensor.initialize();
        sensor.start_reading().unwrap();
        assert_eq!(sensor.start_reading(), Err(ErrorKind::Busy));

        // Stop somewhere in the middle of the transfer
        world.run_until(&mut sensor, |s| s.frame().bits_received() == 20);
        assert!(sensor.state().is_busy());
        let before = (sensor.state(), *sensor.frame());
        assert_eq!(sensor.start_reading(), Err(ErrorKind::Busy));
        assert_eq!((sensor.state(), *sensor.frame()), before);
        assert_eq!(sensor.check_status(), Status::Pending);

        world.run(&mut sensor);
        assert!(matches!(sensor.check_status(), Status::Ready(_)));
    }

    #[test]
    fn test_busy_in_every_in_flight_state() {
        let waveform = Waveform::from_fields(0x028D, 0x00FB, 0x8A);
        let world = SimWorld::new(&waveform);
        let mut sensor = world.sensor();
        sensor.initialize();
        sensor.start_reading().unwrap();

        let mut seen = 0;
        while sensor.state().is_busy() {
            let before = (sensor.state(), *sensor.frame());
            assert_eq!(sensor.start_reading(), Err(ErrorKind::Busy));
            assert_eq!((sensor.state(), *sensor.frame()), before);
            if !world.step(&mut sensor) {
                break;
            }
            seen += 1;
        }
        assert!(seen > 80, "expected to visit every bit edge, saw {seen} events");
    }

    #[test]
    fn test_restart_after_terminal_state() {
        let waveform = Waveform::from_fields(0x028D, 0x00FB, 0x8A);
        let world = SimWorld::new(&waveform);
        let mut sensor = world.sensor();
        sensor.initialize();
        sensor.start_reading().unwrap();
        world.run(&mut sensor);
        let first = sensor.check_status();
        assert!(matches!(first, Status::Ready(_)));
        assert_eq!(sensor.check_status(), first, "outcome is sticky");

        world.advance(2_000_000);
        assert_eq!(sensor.start_reading(), Ok(()));
        assert_eq!(sensor.frame().bits_received(), 0, "restart clears the frame");
        world.run(&mut sensor);
        assert_eq!(sensor.check_status(), first);
    }

    #[test]
    fn test_no_device_is_not_present() {
        let status = run_read(&Waveform::from_fields(0x028D, 0x00FB, 0x8A).with_fault(Fault::Absent));
        assert_eq!(status, Status::Failed(ErrorKind::NotPresent));
    }

    #[test]
    fn test_ack_faults() {
        let base = Waveform::from_fields(0x028D, 0x00FB, 0x8A);
        let status = run_read(&base.with_fault(Fault::StretchAckLow(150)));
        assert_eq!(status, Status::Failed(ErrorKind::AckTimeout));
        let status = run_read(&base.with_fault(Fault::StretchAckHigh(150)));
        assert_eq!(status, Status::Failed(ErrorKind::AckTimeout));
    }

    #[test]
    fn test_bit_phase_faults() {
        let base = Waveform::from_fields(0x028D, 0x00FB, 0x8A);
        let status = run_read(&base.with_fault(Fault::StretchSync(7, 90)));
        assert_eq!(status, Status::Failed(ErrorKind::SyncTimeout));
        let status = run_read(&base.with_fault(Fault::StretchData(33, 130)));
        assert_eq!(status, Status::Failed(ErrorKind::DataTimeout));
    }

    #[test]
    fn test_corrupted_bit_fails_checksum() {
        let base = Waveform::from_fields(0x028D, 0x00FB, checksum(0x028D, 0x00FB));
        assert!(
            matches!(run_read(&base), Status::Ready(_)),
            "unflipped frame must read"
        );
        for bit in 0..crate::timing::FRAME_BITS {
            let status = run_read(&base.with_fault(Fault::FlipBit(bit)));
            assert_eq!(
                status,
                Status::Failed(ErrorKind::ChecksumMismatch),
                "flipped bit {bit}"
            );
        }
    }

    #[test]
    fn test_threshold_boundary_bits() {
        // One bit of the frame at the exact threshold and one unit either side
        let base = Waveform::from_fields(0x028D, 0x00FB, 0x8A);
        let cases = [
            (BIT_ONE_THRESHOLD_US, false),
            (BIT_ONE_THRESHOLD_US - 1, false),
            (BIT_ONE_THRESHOLD_US + 1, true),
        ];
        for (width, expected) in cases {
            let waveform = base.with_fault(Fault::StretchData(0, width));
            let world = SimWorld::new(&waveform);
            let mut sensor = world.sensor();
            sensor.initialize();
            sensor.start_reading().unwrap();
            world.run_until(&mut sensor, |s| s.frame().bits_received() == 1);
            assert_eq!(
                sensor.frame().bit(0),
                expected,
                "high phase of {width} us decoded wrong"
            );
        }
    }

    #[test]
    fn test_terminal_states_halt_hardware() {
        let waveform = Waveform::from_fields(0x028D, 0x00FB, 0x8A).with_fault(Fault::Absent);
        let world = SimWorld::new(&waveform);
        let mut sensor = world.sensor();
        sensor.initialize();
        sensor.start_reading().unwrap();
        world.run(&mut sensor);

        let snapshot = world.snapshot();
        assert!(!snapshot.timer_running);
        assert_eq!(snapshot.armed, None);
        assert_eq!(snapshot.direction, Direction::Output);
        assert_eq!(snapshot.driven, Level::High);
    }

    #[test]
    fn test_stray_timer_event_is_not_responding() {
        let waveform = Waveform::from_fields(0x028D, 0x00FB, 0x8A);
        let world = SimWorld::new(&waveform);
        let mut sensor = world.sensor();
        sensor.initialize();
        sensor.start_reading().unwrap();
        world.run(&mut sensor);
        assert_eq!(sensor.state(), ProtocolState::ChecksumPending);

        sensor.on_timer_compare();
        assert_eq!(sensor.check_status(), Status::Failed(ErrorKind::NotResponding));
        assert!(!world.snapshot().timer_running);
    }

    #[test]
    fn test_edges_are_cleared_before_every_arm() {
        let waveform = Waveform::from_fields(0x028D, 0x00FB, 0x8A);
        let world = SimWorld::new(&waveform);
        let mut sensor = world.sensor();
        sensor.initialize();
        sensor.start_reading().unwrap();
        world.run(&mut sensor);

        let log = world.edge_log();
        let mut arms = 0;
        for (i, op) in log.iter().enumerate() {
            if let EdgeOp::Arm(_) = op {
                arms += 1;
                assert!(
                    i > 0 && log[i - 1] == EdgeOp::ClearPending,
                    "arm at {i} not preceded by a clear"
                );
            }
        }
        assert_eq!(arms, 4, "falling, rising, falling, then any-edge for the transfer");
    }

    #[test]
    fn test_stale_edge_hazard() {
        // The host's own falling edge at the start pulse latches a pending
        // edge. Without the clear it fires the moment presence detection is
        // armed and the acknowledge is timed from the wrong instant.
        let waveform = Waveform::from_fields(0x028D, 0x00FB, 0x8A);
        let world = SimWorld::new(&waveform);
        world.ignore_clear_pending(true);
        let mut sensor = world.sensor();
        sensor.initialize();
        sensor.start_reading().unwrap();
        world.run(&mut sensor);
        assert_eq!(sensor.check_status(), Status::Failed(ErrorKind::AckTimeout));

        let status = run_read(&waveform);
        assert!(matches!(status, Status::Ready(_)), "got {status:?}");
    }

    #[test]
    fn test_host_start_holds_two_periods() {
        let waveform = Waveform::from_fields(0x028D, 0x00FB, 0x8A);
        let world = SimWorld::new(&waveform);
        let mut sensor = world.sensor();
        sensor.initialize();
        sensor.start_reading().unwrap();

        assert!(world.step(&mut sensor));
        assert_eq!(sensor.state(), ProtocolState::HostStartHold);
        assert!(world.step(&mut sensor));
        assert_eq!(sensor.state(), ProtocolState::HostStartPullup);
        assert_eq!(world.now(), crate::timing::HOST_START_HOLD_US);
    }
}
