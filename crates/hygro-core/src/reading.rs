//! Decoded sensor values

use serde::{Deserialize, Serialize};

const SIGN_FLAG: u16 = 0x8000;

/// A checksum-validated reading.
///
/// Both values are kept in tenths, the sensor's native resolution:
/// `temperature` in 0.1 °C (roughly -400..=800), `humidity` in 0.1 %RH
/// (0..=1000).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorReading {
    pub temperature: i16,
    pub humidity: u16,
}

impl SensorReading {
    /// Decode the raw humidity and temperature words of a validated frame.
    ///
    /// The temperature word is sign-magnitude: bit 15 flags a negative value,
    /// the remaining 15 bits are the magnitude.
    pub const fn decode(raw_humidity: u16, raw_temperature: u16) -> Self {
        let magnitude = (raw_temperature & !SIGN_FLAG) as i16;
        let temperature = if raw_temperature & SIGN_FLAG != 0 {
            -magnitude
        } else {
            magnitude
        };

        Self {
            temperature,
            humidity: raw_humidity,
        }
    }

    /// Inverse of [`SensorReading::decode`]: the raw words a sensor would send.
    pub const fn to_raw(&self) -> (u16, u16) {
        let magnitude = self.temperature.unsigned_abs() & !SIGN_FLAG;
        let raw_temperature = if self.temperature < 0 {
            magnitude | SIGN_FLAG
        } else {
            magnitude
        };
        (self.humidity, raw_temperature)
    }

    /// Whole degrees, negative below zero.
    pub const fn temperature_integral(&self) -> i16 {
        self.temperature / 10
    }

    /// Tenths of a degree. Always unsigned, even for negative readings:
    /// -5.3 °C is integral -5, decimal 3.
    pub const fn temperature_decimal(&self) -> u8 {
        (self.temperature.unsigned_abs() % 10) as u8
    }

    pub const fn humidity_integral(&self) -> u16 {
        self.humidity / 10
    }

    pub const fn humidity_decimal(&self) -> u8 {
        (self.humidity % 10) as u8
    }

    pub fn temperature_celsius(&self) -> f32 {
        self.temperature as f32 / 10.0
    }

    pub fn humidity_percent(&self) -> f32 {
        self.humidity as f32 / 10.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_reading() {
        let reading = SensorReading::decode(0x028D, 0x00FB);
        assert_eq!(reading.humidity_integral(), 65);
        assert_eq!(reading.humidity_decimal(), 3);
        assert_eq!(reading.temperature_integral(), 25);
        assert_eq!(reading.temperature_decimal(), 1);
    }

    #[test]
    fn test_sign_flag_is_not_twos_complement() {
        let reading = SensorReading::decode(0, 0x8032);
        assert_eq!(reading.temperature, -50);
        assert_eq!(reading.temperature_integral(), -5);
        assert_eq!(reading.temperature_decimal(), 0);
        assert_eq!(reading.temperature_celsius(), -5.0);
    }

    #[test]
    fn test_negative_decimal_stays_unsigned() {
        let reading = SensorReading::decode(0, 0x8000 | 53);
        assert_eq!(reading.temperature_integral(), -5);
        assert_eq!(reading.temperature_decimal(), 3);

        // Below one degree the sign is carried by nothing but the flag
        let reading = SensorReading::decode(0, 0x8000 | 5);
        assert_eq!(reading.temperature_integral(), 0);
        assert_eq!(reading.temperature_decimal(), 5);
    }

    #[test]
    fn test_negative_zero_decodes_to_zero() {
        let reading = SensorReading::decode(0, 0x8000);
        assert_eq!(reading.temperature, 0);
    }

    #[test]
    fn test_raw_round_trip_over_legal_range() {
        for humidity in (0..=1000).step_by(7) {
            for temperature in -400..=800 {
                let reading = SensorReading {
                    temperature,
                    humidity,
                };
                let (raw_h, raw_t) = reading.to_raw();
                assert_eq!(SensorReading::decode(raw_h, raw_t), reading);
            }
        }
    }

    #[test]
    fn test_integral_and_decimal_recompose() {
        for temperature in -400i16..=800 {
            let reading = SensorReading {
                temperature,
                humidity: 0,
            };
            let whole = reading.temperature_integral().unsigned_abs() * 10
                + reading.temperature_decimal() as u16;
            assert_eq!(whole, temperature.unsigned_abs());
        }
    }
}
