//! Caller-facing read outcomes

use thiserror_no_std::Error;

/// Every way a read can end without a reading.
///
/// All variants are terminal for the read that produced them. Retrying is the
/// caller's job: issue a new start request.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("bus did not idle high before the start pulse")]
    BusHung,
    #[error("no sensor pulled the line low after the host release")]
    NotPresent,
    #[error("sensor acknowledge phase exceeded its window")]
    AckTimeout,
    #[error("bit sync (low) phase exceeded its window")]
    SyncTimeout,
    #[error("bit data (high) phase exceeded its window")]
    DataTimeout,
    #[error("deadman timer fired outside any phase expecting it")]
    NotResponding,
    #[error("frame checksum does not match its payload")]
    ChecksumMismatch,
    #[error("a read is already in progress")]
    Busy,
}

impl ErrorKind {
    /// Stable numeric code printed on the status line.
    pub const fn code(self) -> u8 {
        match self {
            ErrorKind::BusHung => 1,
            ErrorKind::NotPresent => 2,
            ErrorKind::AckTimeout => 3,
            ErrorKind::SyncTimeout => 4,
            ErrorKind::DataTimeout => 5,
            ErrorKind::ChecksumMismatch => 6,
            ErrorKind::NotResponding => 7,
            ErrorKind::Busy => 8,
        }
    }

    /// Inverse of [`ErrorKind::code`].
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ErrorKind::BusHung),
            2 => Some(ErrorKind::NotPresent),
            3 => Some(ErrorKind::AckTimeout),
            4 => Some(ErrorKind::SyncTimeout),
            5 => Some(ErrorKind::DataTimeout),
            6 => Some(ErrorKind::ChecksumMismatch),
            7 => Some(ErrorKind::NotResponding),
            8 => Some(ErrorKind::Busy),
            _ => None,
        }
    }

    /// Whether the failure points at the sensor or its wiring rather than
    /// at the caller's scheduling.
    pub const fn is_sensor_fault(self) -> bool {
        !matches!(self, ErrorKind::Busy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ErrorKind; 8] = [
        ErrorKind::BusHung,
        ErrorKind::NotPresent,
        ErrorKind::AckTimeout,
        ErrorKind::SyncTimeout,
        ErrorKind::DataTimeout,
        ErrorKind::NotResponding,
        ErrorKind::ChecksumMismatch,
        ErrorKind::Busy,
    ];

    #[test]
    fn test_codes_are_unique_and_reversible() {
        for kind in ALL {
            assert_eq!(ErrorKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ErrorKind::from_code(0), None);
        assert_eq!(ErrorKind::from_code(9), None);
    }

    #[test]
    fn test_reference_codes() {
        assert_eq!(ErrorKind::NotPresent.code(), 2);
        assert_eq!(ErrorKind::ChecksumMismatch.code(), 6);
    }

    #[test]
    fn test_busy_is_not_a_sensor_fault() {
        assert!(!ErrorKind::Busy.is_sensor_fault());
        assert!(ErrorKind::NotResponding.is_sensor_fault());
    }

    #[test]
    fn test_display_messages() {
        let msg = std::format!("{}", ErrorKind::Busy);
        assert_eq!(msg, "a read is already in progress");
    }
}
