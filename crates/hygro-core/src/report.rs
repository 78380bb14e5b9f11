//! Serial status line
//!
//! One line per read, the same on the firmware console and in the simulator:
//!
//! ```text
//! OK,25.1,65.3
//! ERROR,6
//! ```
//!
//! Temperature first, then humidity, each with one decimal. Errors carry
//! [`ErrorKind::code`].

use core::fmt::{Display, Write};

use thiserror_no_std::Error;

use crate::error::ErrorKind;
use crate::reading::SensorReading;

/// Longest line is `OK,-40.0,100.0\n` or thereabouts; leave headroom.
pub const MAX_LINE_LEN: usize = 32;

/// One parsed or to-be-printed status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportLine {
    Reading(SensorReading),
    Error(ErrorKind),
}

impl From<&Result<SensorReading, ErrorKind>> for ReportLine {
    fn from(outcome: &Result<SensorReading, ErrorKind>) -> Self {
        match outcome {
            Ok(reading) => ReportLine::Reading(*reading),
            Err(e) => ReportLine::Error(*e),
        }
    }
}

impl Display for ReportLine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ReportLine::Reading(reading) => {
                // Sign is written separately so -0.5 does not print as 0.5
                let sign = if reading.temperature < 0 { "-" } else { "" };
                write!(
                    f,
                    "OK,{}{}.{},{}.{}",
                    sign,
                    reading.temperature_integral().unsigned_abs(),
                    reading.temperature_decimal(),
                    reading.humidity_integral(),
                    reading.humidity_decimal()
                )
            }
            ReportLine::Error(e) => write!(f, "ERROR,{}", e.code()),
        }
    }
}

/// Why a status line could not be parsed
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportError {
    #[error("empty line")]
    Empty,
    #[error("line does not start with OK or ERROR")]
    UnknownTag,
    #[error("line has the wrong number of fields")]
    FieldCount,
    #[error("malformed number")]
    BadNumber,
    #[error("unknown error code {0}")]
    UnknownCode(u8),
}

/// Render the outcome of a read as a newline-terminated status line.
pub fn format_outcome(outcome: &Result<SensorReading, ErrorKind>) -> heapless::String<MAX_LINE_LEN> {
    let mut line = heapless::String::new();
    // Cannot overflow: every rendering fits in MAX_LINE_LEN
    let _ = writeln!(line, "{}", ReportLine::from(outcome));
    line
}

/// Parse one status line. Surrounding whitespace, including the trailing
/// newline, is ignored.
pub fn parse_line(line: &str) -> Result<ReportLine, ReportError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ReportError::Empty);
    }

    let mut fields = line.split(',');
    let tag = fields.next().unwrap_or_default();
    let parsed = match tag {
        "OK" => {
            let temperature = fields.next().ok_or(ReportError::FieldCount)?;
            let humidity = fields.next().ok_or(ReportError::FieldCount)?;
            let temperature = parse_tenths(temperature)?;
            let humidity = parse_tenths(humidity)?;
            ReportLine::Reading(SensorReading {
                temperature: i16::try_from(temperature).map_err(|_| ReportError::BadNumber)?,
                humidity: u16::try_from(humidity).map_err(|_| ReportError::BadNumber)?,
            })
        }
        "ERROR" => {
            let code = fields.next().ok_or(ReportError::FieldCount)?;
            let code: u8 = code.parse().map_err(|_| ReportError::BadNumber)?;
            ReportLine::Error(ErrorKind::from_code(code).ok_or(ReportError::UnknownCode(code))?)
        }
        _ => return Err(ReportError::UnknownTag),
    };

    if fields.next().is_some() {
        return Err(ReportError::FieldCount);
    }
    Ok(parsed)
}

/// `-12.3` → `-123`. Exactly one decimal digit.
fn parse_tenths(field: &str) -> Result<i32, ReportError> {
    let (negative, digits) = match field.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, field),
    };
    let (whole, tenth) = digits.split_once('.').ok_or(ReportError::BadNumber)?;
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ReportError::BadNumber);
    }
    let [tenth] = tenth.as_bytes() else {
        return Err(ReportError::BadNumber);
    };
    if !tenth.is_ascii_digit() {
        return Err(ReportError::BadNumber);
    }

    let whole: i32 = whole.parse().map_err(|_| ReportError::BadNumber)?;
    let magnitude = whole
        .checked_mul(10)
        .and_then(|w| w.checked_add(i32::from(tenth - b'0')))
        .ok_or(ReportError::BadNumber)?;
    Ok(if negative { -magnitude } else { magnitude })
}
