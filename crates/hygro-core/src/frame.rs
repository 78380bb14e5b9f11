//! 40-bit frame accumulator and checksum validator

use log::warn;

use crate::error::ErrorKind;
use crate::reading::SensorReading;
use crate::timing::FRAME_BITS;

const HUMIDITY_END: u8 = 16;
const TEMPERATURE_END: u8 = 32;

/// Checksum the sensor appends to a frame: the four payload bytes summed
/// modulo 256.
pub const fn checksum(humidity: u16, temperature: u16) -> u8 {
    let [h_hi, h_lo] = humidity.to_be_bytes();
    let [t_hi, t_lo] = temperature.to_be_bytes();
    h_hi.wrapping_add(h_lo)
        .wrapping_add(t_hi)
        .wrapping_add(t_lo)
}

/// The frame being shifted in from the sensor.
///
/// Bits arrive MSB first: 16 bits of humidity, 16 bits of temperature
/// (bit 15 is a sign flag), then 8 bits of checksum. `cursor` is the index of
/// the next bit to be written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawFrame {
    humidity: u16,
    temperature: u16,
    checksum: u8,
    cursor: u8,
}

impl RawFrame {
    /// An empty frame with the cursor at bit 0
    pub const fn new() -> Self {
        Self {
            humidity: 0,
            temperature: 0,
            checksum: 0,
            cursor: 0,
        }
    }

    /// A complete frame built from already-known fields.
    pub const fn from_fields(humidity: u16, temperature: u16, checksum: u8) -> Self {
        Self {
            humidity,
            temperature,
            checksum,
            cursor: FRAME_BITS,
        }
    }

    /// Clear all 40 bits and rewind the cursor.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Write `bit` at the cursor and advance it.
    ///
    /// The state machines stop appending at bit 40; a call on a complete
    /// frame is dropped.
    pub fn append_bit(&mut self, bit: bool) {
        let index = self.cursor;
        if index >= FRAME_BITS {
            warn!("Frame already complete, dropping bit {}", index);
            return;
        }

        if bit {
            if index < HUMIDITY_END {
                self.humidity |= 1 << (HUMIDITY_END - 1 - index);
            } else if index < TEMPERATURE_END {
                self.temperature |= 1 << (TEMPERATURE_END - 1 - index);
            } else {
                self.checksum |= 1 << (FRAME_BITS - 1 - index);
            }
        }

        self.cursor += 1;
    }

    /// Whether all 40 bits have been written
    pub const fn is_complete(&self) -> bool {
        self.cursor == FRAME_BITS
    }

    /// Number of bits written so far
    pub const fn bits_received(&self) -> u8 {
        self.cursor
    }

    pub const fn humidity(&self) -> u16 {
        self.humidity
    }

    pub const fn temperature(&self) -> u16 {
        self.temperature
    }

    pub const fn checksum(&self) -> u8 {
        self.checksum
    }

    /// Whether the received checksum matches the received payload.
    pub const fn checksum_ok(&self) -> bool {
        checksum(self.humidity, self.temperature) == self.checksum
    }

    /// Validate the checksum and decode the payload.
    pub fn decode(&self) -> Result<SensorReading, ErrorKind> {
        if !self.checksum_ok() {
            warn!(
                "Checksum mismatch: received {:#04x}, computed {:#04x}",
                self.checksum,
                checksum(self.humidity, self.temperature)
            );
            return Err(ErrorKind::ChecksumMismatch);
        }
        Ok(SensorReading::decode(self.humidity, self.temperature))
    }

    /// Value of bit `index` (0..40) in transmission order.
    pub const fn bit(&self, index: u8) -> bool {
        if index < HUMIDITY_END {
            self.humidity & (1 << (HUMIDITY_END - 1 - index)) != 0
        } else if index < TEMPERATURE_END {
            self.temperature & (1 << (TEMPERATURE_END - 1 - index)) != 0
        } else {
            self.checksum & (1 << (FRAME_BITS - 1 - index)) != 0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shift_in(humidity: u16, temperature: u16, checksum: u8) -> RawFrame {
        let source = RawFrame::from_fields(humidity, temperature, checksum);
        let mut frame = RawFrame::new();
        for i in 0..FRAME_BITS {
            frame.append_bit(source.bit(i));
        }
        frame
    }

    #[test]
    fn test_checksum_reference_frame() {
        assert_eq!(checksum(0x028D, 0x00FB), 0x8A);
    }

    #[test]
    fn test_checksum_wraps() {
        assert_eq!(checksum(0xFFFF, 0xFFFF), 0xFC);
    }

    #[test]
    fn test_append_fills_fields_msb_first() {
        let frame = shift_in(0x028D, 0x00FB, 0x8A);
        assert!(frame.is_complete());
        assert_eq!(frame.humidity(), 0x028D);
        assert_eq!(frame.temperature(), 0x00FB);
        assert_eq!(frame.checksum(), 0x8A);
        assert!(frame.checksum_ok());
    }

    #[test]
    fn test_field_boundaries() {
        let mut frame = RawFrame::new();
        frame.append_bit(true);
        assert_eq!(frame.humidity(), 0x8000, "bit 0 is the humidity MSB");

        let mut frame = RawFrame::new();
        for i in 0..16 {
            frame.append_bit(i == 15);
        }
        frame.append_bit(true);
        assert_eq!(frame.humidity(), 0x0001, "bit 15 is the humidity LSB");
        assert_eq!(frame.temperature(), 0x8000, "bit 16 is the temperature MSB");

        let mut frame = RawFrame::new();
        for i in 0..40 {
            frame.append_bit(i == 32 || i == 39);
        }
        assert_eq!(frame.checksum(), 0x81);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut frame = shift_in(0x1234, 0x5678, 0xAC);
        frame.reset();
        assert_eq!(frame, RawFrame::new());
        assert_eq!(frame.bits_received(), 0);
        assert!(!frame.is_complete());
    }

    #[test]
    fn test_append_on_complete_frame_is_dropped() {
        let mut frame = shift_in(0xFFFF, 0xFFFF, 0xFF);
        let before = frame;
        frame.append_bit(true);
        assert_eq!(frame, before);
        assert_eq!(frame.bits_received(), 40);
    }

    #[test]
    fn test_single_bit_corruption_fails_checksum() {
        let good = RawFrame::from_fields(0x028D, 0x00FB, 0x8A);
        assert!(good.decode().is_ok());

        for flip in 0..FRAME_BITS {
            let mut corrupted = RawFrame::new();
            for i in 0..FRAME_BITS {
                corrupted.append_bit(good.bit(i) ^ (i == flip));
            }
            assert_eq!(
                corrupted.decode(),
                Err(ErrorKind::ChecksumMismatch),
                "flipping bit {flip} must be detected"
            );
        }
    }

    #[test]
    fn test_decode_reference_frame() {
        let reading = RawFrame::from_fields(653, 251, checksum(653, 251))
            .decode()
            .unwrap();
        assert_eq!(reading.humidity, 653);
        assert_eq!(reading.temperature, 251);
    }
}
