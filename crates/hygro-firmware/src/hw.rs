//! esp-hal backed timer, edge interrupt and clock for the DHT22 engine

use esp_hal::Blocking;
use esp_hal::gpio::{Event, Input};
use esp_hal::time::{Duration, Instant};
use esp_hal::timer::PeriodicTimer;
use hygro_core::hal::{Edge, EdgeSource, MicroClock, PulseTimer};
use log::warn;

/// Periodic timer-group timer whose compare interrupt paces the read.
///
/// The hardware counter is not readable through esp-hal, so elapsed time is
/// taken from the system timer relative to the last counter reset. Every
/// compare reload restarts the hardware counter; the engine always pairs a
/// compare change with a counter reset, so the two stay in step.
pub struct DhtTimer {
    timer: PeriodicTimer<'static, Blocking>,
    period: Duration,
    base: Instant,
}

impl DhtTimer {
    /// Wrap a timer whose interrupt handler has already been installed.
    pub fn new(mut timer: PeriodicTimer<'static, Blocking>) -> Self {
        timer.listen();
        Self {
            timer,
            period: Duration::from_micros(0),
            base: Instant::now(),
        }
    }

    fn reload(&mut self) {
        if let Err(e) = self.timer.start(self.period) {
            warn!("DHT22 timer reload failed: {:?}", e);
        }
    }
}

impl PulseTimer for DhtTimer {
    fn start(&mut self, compare_us: u32) {
        self.period = Duration::from_micros(compare_us as u64);
        self.base = Instant::now();
        self.reload();
    }

    fn set_compare(&mut self, compare_us: u32) {
        self.period = Duration::from_micros(compare_us as u64);
        self.reload();
    }

    fn stop(&mut self) {
        if let Err(e) = self.timer.cancel() {
            warn!("DHT22 timer stop failed: {:?}", e);
        }
    }

    fn reset_counter(&mut self) {
        self.base = Instant::now();
    }

    fn read_counter(&self) -> u32 {
        (Instant::now() - self.base).as_micros() as u32
    }

    fn acknowledge(&mut self) {
        self.timer.clear_interrupt();
        // Periodic mode: the counter restarted at the compare match
        self.base = Instant::now();
    }
}

/// GPIO edge interrupt on the data line.
pub struct DhtEdges {
    input: Input<'static>,
}

impl DhtEdges {
    pub fn new(input: Input<'static>) -> Self {
        Self { input }
    }
}

impl EdgeSource for DhtEdges {
    fn arm(&mut self, edge: Edge) {
        let event = match edge {
            Edge::Rising => Event::RisingEdge,
            Edge::Falling => Event::FallingEdge,
            Edge::Any => Event::AnyEdge,
        };
        self.input.listen(event);
    }

    fn disarm(&mut self) {
        self.input.unlisten();
    }

    fn clear_pending(&mut self) {
        self.input.clear_interrupt();
    }
}

/// Microsecond clock off the system timer.
pub struct EspClock;

impl MicroClock for EspClock {
    fn now(&self) -> u32 {
        // Truncation wraps every ~71 minutes; readers only use differences
        Instant::now().duration_since_epoch().as_micros() as u32
    }
}
