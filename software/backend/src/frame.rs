// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Filename: <frame.rs>

//! Weight frame decoding.
//!
//! The indicator sends fixed-offset frames:
//!
//! ```text
//! +--------+---------------------------+---------+
//! | 4 byte | ASCII digits, 1 implied   | 6 byte  |
//! | header | decimal place             | trailer |
//! +--------+---------------------------+---------+
//! ```
//!
//! Header and trailer (status and checksum bytes) are not interpreted.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::error::DecodeError;

pub const HEADER_LEN: usize = 4;
pub const TRAILER_LEN: usize = 6;

/// Windows of this length or shorter carry no payload.
pub const MIN_FRAME_LEN: usize = HEADER_LEN + TRAILER_LEN;

/// A decoded weight, held as integer tenths so that `value / 10` stays exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WeightReading {
    tenths: i64,
}

impl WeightReading {
    pub fn from_tenths(tenths: i64) -> Self {
        Self { tenths }
    }

    pub fn tenths(&self) -> i64 {
        self.tenths
    }

    pub fn as_f64(&self) -> f64 {
        self.tenths as f64 / 10.0
    }

    /// Absolute difference, used for the net weight of a ticket. Saturates at
    /// `i64::MAX` tenths.
    pub fn abs_diff(&self, other: &WeightReading) -> WeightReading {
        let diff = self.tenths.abs_diff(other.tenths);
        WeightReading::from_tenths(i64::try_from(diff).unwrap_or(i64::MAX))
    }
}

impl fmt::Display for WeightReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.tenths < 0 { "-" } else { "" };
        let abs = self.tenths.unsigned_abs();
        write!(f, "{}{}.{}", sign, abs / 10, abs % 10)
    }
}

impl Serialize for WeightReading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

/// Uppercase hex rendering of a byte window, for logs and events.
pub struct HexDump<'a>(pub &'a [u8]);

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

/// Decodes one candidate window into a weight.
pub fn decode(window: &[u8]) -> Result<WeightReading, DecodeError> {
    if window.len() <= MIN_FRAME_LEN {
        return Err(DecodeError::TooShort { len: window.len() });
    }

    let payload = &window[HEADER_LEN..window.len() - TRAILER_LEN];
    let non_numeric = || DecodeError::NonNumeric {
        payload: payload.to_vec(),
    };
    if !payload.is_ascii() {
        return Err(non_numeric());
    }

    let text = std::str::from_utf8(payload).map_err(|_| non_numeric())?;
    parse_leading_integer(text)
        .map(WeightReading::from_tenths)
        .ok_or_else(non_numeric)
}

/// Lenient base-10 parse: leading whitespace, optional sign, then digits up to
/// the first non-digit. Indicators pad the payload with spaces or follow it
/// with a unit, both of which are tolerated.
fn parse_leading_integer(text: &str) -> Option<i64> {
    let s = text.trim_start_matches(|c: char| c.is_ascii_whitespace());
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let end = digits
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }

    let value: i64 = digits[..end].parse().ok()?;
    Some(if negative { -value } else { value })
}
