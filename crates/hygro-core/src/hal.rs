//! Capabilities the protocol engine needs from the board
//!
//! The engine never touches a register. Firmware implements these traits for
//! its GPIO, timer and edge interrupt; tests and the simulator implement them
//! in virtual time.

use embedded_hal::digital::{InputPin, OutputPin};
use log::warn;

/// Logic level on the data line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Direction of the data line as seen from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Released, the pull-up or the sensor sets the level
    Input,
    /// Host drives the level
    Output,
}

/// Transition an [`EdgeSource`] reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
    Any,
}

impl Edge {
    /// Whether a transition into `level` matches this sense.
    pub const fn matches(self, level: Level) -> bool {
        match self {
            Edge::Rising => matches!(level, Level::High),
            Edge::Falling => matches!(level, Level::Low),
            Edge::Any => true,
        }
    }
}

/// The single digital pin the sensor hangs off.
pub trait Line {
    fn set_direction(&mut self, direction: Direction);
    fn write_level(&mut self, level: Level);
    fn read_level(&mut self) -> Level;

    /// Put the line in its idle condition: driven high.
    fn drive_idle(&mut self) {
        self.write_level(Level::High);
        self.set_direction(Direction::Output);
    }
}

/// Periodic compare-match timer with a 1 us tick.
///
/// The compare event fires every `compare_us` microseconds of counter time;
/// the counter restarts at zero after each compare match.
pub trait PulseTimer {
    /// Reset the counter and run with the given compare value.
    fn start(&mut self, compare_us: u32);
    /// Change the compare value without touching the counter.
    fn set_compare(&mut self, compare_us: u32);
    fn stop(&mut self);
    fn reset_counter(&mut self);
    /// Microseconds since the counter was last reset.
    fn read_counter(&self) -> u32;

    /// Clear the compare-match flag. Called first thing in the compare
    /// handler.
    fn acknowledge(&mut self) {}
}

/// Pin-change interrupt on the data line.
pub trait EdgeSource {
    fn arm(&mut self, edge: Edge);
    fn disarm(&mut self);
    /// Drop any latched, not yet serviced edge.
    fn clear_pending(&mut self);
}

/// Free-running microsecond clock for the busy-wait reader.
///
/// Implementations may wrap; readers only ever look at differences.
pub trait MicroClock {
    fn now(&self) -> u32;
}

/// [`Line`] over an `embedded-hal` open-drain pin.
///
/// Releasing the line means writing a 1 and letting the pull-up win, so
/// [`Direction::Input`] is a high write and [`Direction::Output`] keeps
/// whatever level was last written.
pub struct OpenDrainLine<P> {
    pin: P,
    released: bool,
}

impl<P> OpenDrainLine<P>
where
    P: InputPin + OutputPin,
{
    pub fn new(pin: P) -> Self {
        Self {
            pin,
            released: true,
        }
    }

    /// Give the pin back.
    pub fn into_inner(self) -> P {
        self.pin
    }
}

impl<P> Line for OpenDrainLine<P>
where
    P: InputPin + OutputPin,
{
    fn set_direction(&mut self, direction: Direction) {
        self.released = matches!(direction, Direction::Input);
        if self.released && self.pin.set_high().is_err() {
            warn!("Open-drain pin refused release");
        }
    }

    fn write_level(&mut self, level: Level) {
        let result = match level {
            Level::High => self.pin.set_high(),
            Level::Low => self.pin.set_low(),
        };
        if result.is_err() {
            warn!("Open-drain pin refused {:?} write", level);
        }
    }

    fn read_level(&mut self) -> Level {
        match self.pin.is_high() {
            Ok(true) => Level::High,
            Ok(false) => Level::Low,
            Err(_) => {
                warn!("Open-drain pin read failed");
                Level::Low
            }
        }
    }
}
