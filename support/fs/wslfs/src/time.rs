// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Conversion between Unix timestamps and NT file times.

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// The number of 100ns intervals between 1601-01-01 and 1970-01-01.
pub const NT_EPOCH_OFFSET: i64 = 116_444_736_000_000_000;

const TICKS_PER_SECOND: i64 = 10_000_000;
const NANOSECONDS_PER_TICK: u32 = 100;

/// A Unix timestamp, in seconds and nanoseconds since the Unix epoch (UTC).
///
/// Times before the epoch are stored as the two's-complement of the negative
/// second count, which is how the packed `LXATTRB` record stores them.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnixTime {
    pub seconds: u64,
    pub nanoseconds: u32,
}

impl UnixTime {
    pub const fn new(seconds: u64, nanoseconds: u32) -> Self {
        Self {
            seconds,
            nanoseconds,
        }
    }

    /// Returns the current system time.
    pub fn now() -> Self {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => Self::new(d.as_secs(), d.subsec_nanos()),
            Err(e) => {
                // The clock is before 1970; round toward negative infinity.
                let d = e.duration();
                if d.subsec_nanos() == 0 {
                    Self::new((d.as_secs() as i64).wrapping_neg() as u64, 0)
                } else {
                    Self::new(
                        (-(d.as_secs() as i64) - 1) as u64,
                        1_000_000_000 - d.subsec_nanos(),
                    )
                }
            }
        }
    }

    /// Converts to an NT file time (100ns intervals since 1601-01-01).
    pub fn to_nt(self) -> i64 {
        unix_to_nt(self)
    }

    /// Converts from an NT file time.
    pub fn from_nt(time: i64) -> Self {
        nt_to_unix(time)
    }
}

/// Converts a Unix timestamp to an NT file time.
///
/// Sub-100ns precision is truncated.
pub fn unix_to_nt(time: UnixTime) -> i64 {
    (time.seconds as i64)
        .wrapping_mul(TICKS_PER_SECOND)
        .wrapping_add((time.nanoseconds / NANOSECONDS_PER_TICK) as i64)
        .wrapping_add(NT_EPOCH_OFFSET)
}

/// Converts an NT file time to a Unix timestamp.
pub fn nt_to_unix(time: i64) -> UnixTime {
    let ticks = time.wrapping_sub(NT_EPOCH_OFFSET);
    UnixTime {
        seconds: ticks.div_euclid(TICKS_PER_SECOND) as u64,
        nanoseconds: ticks.rem_euclid(TICKS_PER_SECOND) as u32 * NANOSECONDS_PER_TICK,
    }
}
