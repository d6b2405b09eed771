use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Mutex;

/// UTC time source consumed by the mount for sidereal-time conversion.
///
/// `set_time` exists so a front end can discipline the controller clock from
/// GPS or NTP without the mount caring where time comes from.
pub trait UTCClock: Send + Sync {
    fn get_time(&self) -> DateTime<Utc>;
    fn set_time(&self, time: DateTime<Utc>);
}

/// System clock with a settable offset, so `set_time` survives without
/// touching the OS clock.
#[derive(Default)]
pub struct SystemClock {
    offset: Mutex<Duration>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UTCClock for SystemClock {
    fn get_time(&self) -> DateTime<Utc> {
        Utc::now() + *self.offset.lock().unwrap()
    }

    fn set_time(&self, time: DateTime<Utc>) {
        *self.offset.lock().unwrap() = time - Utc::now();
    }
}

/// A clock that only moves when told to. Used in tests and calibration
/// replay, where conversions must be reproducible.
pub struct ManualClock {
    time: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time: Mutex::new(time),
        }
    }

    pub fn at_unix(secs: i64) -> Self {
        Self::new(Utc.timestamp_opt(secs, 0).unwrap())
    }
}

impl UTCClock for ManualClock {
    fn get_time(&self) -> DateTime<Utc> {
        *self.time.lock().unwrap()
    }

    fn set_time(&self, time: DateTime<Utc>) {
        *self.time.lock().unwrap() = time;
    }
}
