//! Interrupt-safe home for an [`InterruptSensor`]
//!
//! The timer handler, the edge handler and the foreground all mutate the same
//! session. Wrapping the sensor in a critical-section mutex makes every entry
//! point atomic with respect to the others, so a poll can never observe a
//! half-updated state/frame pair.
//!
//! ```ignore
//! static DHT: SharedSensor<DhtLine, DhtTimer, DhtEdges> = SharedSensor::new();
//!
//! #[handler]
//! fn timer_isr() {
//!     DHT.on_timer_compare();
//! }
//! ```

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::warn;

use crate::error::ErrorKind;
use crate::hal::{EdgeSource, Line, PulseTimer};
use crate::machine::{InterruptSensor, ProtocolState, Status};

/// An [`InterruptSensor`] behind a critical-section mutex.
///
/// Starts empty so it can live in a `static`; hand it the sensor with
/// [`SharedSensor::install`] once the peripherals exist.
pub struct SharedSensor<L, T, E> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Option<InterruptSensor<L, T, E>>>>,
}

impl<L, T, E> SharedSensor<L, T, E> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(None)),
        }
    }
}

impl<L, T, E> Default for SharedSensor<L, T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L, T, E> SharedSensor<L, T, E>
where
    L: Line,
    T: PulseTimer,
    E: EdgeSource,
{
    /// Take ownership of the sensor, returning any previously installed one.
    pub fn install(&self, sensor: InterruptSensor<L, T, E>) -> Option<InterruptSensor<L, T, E>> {
        self.inner.lock(|cell| cell.borrow_mut().replace(sensor))
    }

    /// Remove the sensor, e.g. to hand its peripherals to another driver.
    pub fn take(&self) -> Option<InterruptSensor<L, T, E>> {
        self.inner.lock(|cell| cell.borrow_mut().take())
    }

    pub fn is_installed(&self) -> bool {
        self.inner.lock(|cell| cell.borrow().is_some())
    }

    pub fn initialize(&self) {
        self.with(InterruptSensor::initialize);
    }

    /// See [`InterruptSensor::start_reading`]. Fails with
    /// [`ErrorKind::NotResponding`] when no sensor is installed.
    pub fn start_reading(&self) -> Result<(), ErrorKind> {
        self.with(InterruptSensor::start_reading)
            .unwrap_or(Err(ErrorKind::NotResponding))
    }

    /// See [`InterruptSensor::check_status`]. [`Status::Idle`] when no sensor
    /// is installed.
    pub fn check_status(&self) -> Status {
        self.with(InterruptSensor::check_status)
            .unwrap_or(Status::Idle)
    }

    pub fn state(&self) -> ProtocolState {
        self.with(|sensor| sensor.state())
            .unwrap_or(ProtocolState::Idle)
    }

    /// Timer compare-match interrupt entry point.
    pub fn on_timer_compare(&self) {
        if self.with(InterruptSensor::on_timer_compare).is_none() {
            warn!("Timer interrupt with no DHT22 sensor installed");
        }
    }

    /// Edge interrupt entry point.
    pub fn on_edge(&self) {
        if self.with(InterruptSensor::on_edge).is_none() {
            warn!("Edge interrupt with no DHT22 sensor installed");
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut InterruptSensor<L, T, E>) -> R) -> Option<R> {
        self.inner.lock(|cell| cell.borrow_mut().as_mut().map(f))
    }
}
