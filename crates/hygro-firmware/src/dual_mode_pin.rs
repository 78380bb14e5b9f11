//! Register-level DHT22 data line for ESP32-S3
//!
//! The data line flips between host-driven output and released input several
//! times per read, with microseconds to spare. This drives the GPIO output
//! enable and output level registers directly, leaving the esp-hal `Input`
//! driver owning the pad configuration and the edge interrupt.

use core::ptr::{read_volatile, write_volatile};

use hygro_core::hal::{Direction, Level, Line};

// GPIO 0-31 (low bank)
const GPIO_OUT_W1TS_REG: u32 = 0x6000_4008;
const GPIO_OUT_W1TC_REG: u32 = 0x6000_400C;
const GPIO_ENABLE_W1TS_REG: u32 = 0x6000_4024;
const GPIO_ENABLE_W1TC_REG: u32 = 0x6000_4028;
const GPIO_IN_REG: u32 = 0x6000_403C;

// GPIO 32-48 (high bank)
const GPIO_OUT1_W1TS_REG: u32 = 0x6000_4014;
const GPIO_OUT1_W1TC_REG: u32 = 0x6000_4018;
const GPIO_ENABLE1_W1TS_REG: u32 = 0x6000_4030;
const GPIO_ENABLE1_W1TC_REG: u32 = 0x6000_4034;
const GPIO_IN1_REG: u32 = 0x6000_4040;

/// GPIO matrix output selector; 0x100 routes `GPIO_OUT_REG` to the pad
const GPIO_FUNC0_OUT_SEL_CFG_REG: u32 = 0x6000_4554;
const SIG_GPIO_OUT_IDX: u32 = 0x100;

struct Registers {
    out_set: u32,
    out_clr: u32,
    enable_set: u32,
    enable_clr: u32,
    input: u32,
    bit: u32,
}

/// The DHT22 data line on GPIO `PIN` (0-48).
///
/// The pad must already be configured as a pulled-up input by esp-hal; this
/// only toggles the output driver on top of it.
///
/// ```ignore
/// let edges = Input::new(peripherals.GPIO4, InputConfig::default().with_pull(Pull::Up));
/// let line = DualModePin::<4>::new();
/// line.route_output();
/// ```
pub struct DualModePin<const PIN: u8> {
    _private: (),
}

impl<const PIN: u8> DualModePin<PIN> {
    pub const fn new() -> Self {
        Self { _private: () }
    }

    #[inline]
    const fn registers(&self) -> Registers {
        if PIN < 32 {
            Registers {
                out_set: GPIO_OUT_W1TS_REG,
                out_clr: GPIO_OUT_W1TC_REG,
                enable_set: GPIO_ENABLE_W1TS_REG,
                enable_clr: GPIO_ENABLE_W1TC_REG,
                input: GPIO_IN_REG,
                bit: 1u32 << PIN,
            }
        } else {
            Registers {
                out_set: GPIO_OUT1_W1TS_REG,
                out_clr: GPIO_OUT1_W1TC_REG,
                enable_set: GPIO_ENABLE1_W1TS_REG,
                enable_clr: GPIO_ENABLE1_W1TC_REG,
                input: GPIO_IN1_REG,
                bit: 1u32 << (PIN - 32),
            }
        }
    }

    /// Connect the pad's output to the plain GPIO output register. Call once
    /// before the first read.
    pub fn route_output(&self) {
        let sel = GPIO_FUNC0_OUT_SEL_CFG_REG + 4 * PIN as u32;
        critical_section::with(|_| unsafe {
            write_volatile(sel as *mut u32, SIG_GPIO_OUT_IDX);
        });
    }

    fn write_reg(&self, addr: u32, bit: u32) {
        // W1TS/W1TC registers only touch the bits written as 1
        unsafe { write_volatile(addr as *mut u32, bit) }
    }
}

impl<const PIN: u8> Default for DualModePin<PIN> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const PIN: u8> Line for DualModePin<PIN> {
    fn set_direction(&mut self, direction: Direction) {
        let regs = self.registers();
        match direction {
            Direction::Input => self.write_reg(regs.enable_clr, regs.bit),
            Direction::Output => self.write_reg(regs.enable_set, regs.bit),
        }
    }

    fn write_level(&mut self, level: Level) {
        let regs = self.registers();
        match level {
            Level::High => self.write_reg(regs.out_set, regs.bit),
            Level::Low => self.write_reg(regs.out_clr, regs.bit),
        }
    }

    fn read_level(&mut self) -> Level {
        let regs = self.registers();
        let value = unsafe { read_volatile(regs.input as *const u32) };
        if value & regs.bit != 0 {
            Level::High
        } else {
            Level::Low
        }
    }
}
