use std::{fmt::Debug, ops::Deref};

use binrw::prelude::*;
use time::{macros::datetime, Duration, OffsetDateTime, PrimitiveDateTime};

/// A Windows FILETIME: count of 100ns intervals since 1601-01-01 UTC.
#[derive(BinRead, BinWrite, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileTime {
    value: u64,
}

impl FileTime {
    const EPOCH: PrimitiveDateTime = datetime!(1601-01-01 00:00:00);
    const TICKS_PER_SECOND: u64 = 10_000_000;
    const NANOS_PER_TICK: u64 = 100;

    pub fn now() -> Self {
        Self::from(OffsetDateTime::now_utc())
    }

    pub fn date_time(&self) -> PrimitiveDateTime {
        let seconds = (self.value / Self::TICKS_PER_SECOND) as i64;
        let nanos = ((self.value % Self::TICKS_PER_SECOND) * Self::NANOS_PER_TICK) as i64;
        Self::EPOCH + Duration::seconds(seconds) + Duration::nanoseconds(nanos)
    }
}

impl From<u64> for FileTime {
    fn from(value: u64) -> Self {
        Self { value }
    }
}

impl From<PrimitiveDateTime> for FileTime {
    fn from(dt: PrimitiveDateTime) -> Self {
        let ticks = (dt - Self::EPOCH).whole_nanoseconds() / Self::NANOS_PER_TICK as i128;
        Self {
            value: ticks.clamp(0, u64::MAX as i128) as u64,
        }
    }
}

impl From<OffsetDateTime> for FileTime {
    fn from(dt: OffsetDateTime) -> Self {
        let utc = dt.to_offset(time::UtcOffset::UTC);
        Self::from(PrimitiveDateTime::new(utc.date(), utc.time()))
    }
}

impl Deref for FileTime {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl Debug for FileTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FileTime").field(&self.date_time()).finish()
    }
}
