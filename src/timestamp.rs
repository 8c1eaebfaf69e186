use std::fmt;

use chrono::{DateTime, SecondsFormat};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// A point in UTC time, along with its ISO-8601 rendering.
///
/// The rendering is produced once, when the timestamp is built, so displaying a decoded value
/// never has to redo the calendar math. Timestamps outside the range `chrono` can represent keep
/// their raw seconds and nanoseconds and render those instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timestamp {
    sec: i64,
    nano: u32,
    iso: String,
}

impl Timestamp {
    /// Create a timestamp from seconds and nanoseconds since the UNIX epoch. Nanoseconds outside
    /// `0..1_000_000_000`, including negative ones, are folded into the seconds.
    pub fn from_utc(sec: i64, nanos: i64) -> Timestamp {
        let sec = sec.saturating_add(nanos.div_euclid(NANOS_PER_SEC));
        let nano = nanos.rem_euclid(NANOS_PER_SEC) as u32;
        let iso = match DateTime::from_timestamp(sec, nano) {
            Some(time) => time.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            None => format!("{}.{:09}s", sec, nano),
        };
        Timestamp { sec, nano, iso }
    }

    /// Create a timestamp from milliseconds since the UNIX epoch. Always renders with millisecond
    /// precision.
    pub fn from_millis(millis: i64) -> Timestamp {
        let sec = millis.div_euclid(1000);
        let nano = (millis.rem_euclid(1000) * 1_000_000) as u32;
        let iso = match DateTime::from_timestamp_millis(millis) {
            Some(time) => time.to_rfc3339_opts(SecondsFormat::Millis, true),
            None => format!("{}ms", millis),
        };
        Timestamp { sec, nano, iso }
    }

    /// Return the UNIX timestamp (number of seconds since January 1, 1970 0:00:00 UTC).
    pub fn timestamp_utc(&self) -> i64 {
        self.sec
    }

    /// Returns the number of nanoseconds past the second count.
    pub fn timestamp_subsec_nanos(&self) -> u32 {
        self.nano
    }

    /// Milliseconds since the UNIX epoch, truncating any finer precision.
    pub fn timestamp_millis(&self) -> i64 {
        let millis = i128::from(self.sec) * 1000 + i128::from(self.nano / 1_000_000);
        millis.clamp(i64::MIN.into(), i64::MAX.into()) as i64
    }

    /// The ISO-8601 rendering, e.g. `2021-03-04T05:06:07.089Z`.
    pub fn iso8601(&self) -> &str {
        &self.iso
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.iso)
    }
}
