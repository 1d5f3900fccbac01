//! Monotonic authoritative clock abstraction.
//!
//! `SystemClock::now_utc` is latched through an atomic high-water mark so
//! that a backward NTP step never produces a decreasing value within one
//! process, matching the monotonic-non-decreasing guarantee the scheduler
//! relies on.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Shared read-only clock handle, implemented by [`SystemClock`] in
/// production and [`FrozenClock`] in tests.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;

    fn now_local(&self, tz: Tz) -> DateTime<Tz> {
        self.now_utc().with_timezone(&tz)
    }

    fn seconds_since(&self, t: DateTime<Utc>) -> f64 {
        let delta = self.now_utc().signed_duration_since(t);
        (delta.num_milliseconds().max(0) as f64) / 1000.0
    }

    fn to_utc(&self, local: DateTime<Tz>) -> DateTime<Utc> {
        local.with_timezone(&Utc)
    }

    fn to_local(&self, utc: DateTime<Utc>, tz: Tz) -> DateTime<Tz> {
        utc.with_timezone(&tz)
    }
}

/// Production clock. Monotonic non-decreasing across calls within one
/// process: each observation is compared against the last and clamped
/// forward if the wall clock ever appears to move backwards.
pub struct SystemClock {
    watermark_ms: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            watermark_ms: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        let observed_ms = Utc::now().timestamp_millis();
        let mut previous = self.watermark_ms.load(Ordering::Acquire);
        loop {
            if observed_ms <= previous {
                // Wall clock moved backwards (or stayed flat): hold the
                // watermark rather than returning a decreasing value.
                return Utc.timestamp_millis_opt(previous).single().unwrap_or(Utc::now());
            }
            match self.watermark_ms.compare_exchange_weak(
                previous,
                observed_ms,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Utc.timestamp_millis_opt(observed_ms).single().unwrap_or(Utc::now()),
                Err(current) => previous = current,
            }
        }
    }
}

/// Test double: returns a fixed instant until explicitly advanced.
pub struct FrozenClock {
    now_ms: AtomicI64,
}

impl FrozenClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now_ms: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn advance(&self, duration: chrono::Duration) {
        self.now_ms
            .fetch_add(duration.num_milliseconds(), Ordering::AcqRel);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.now_ms.store(at.timestamp_millis(), Ordering::Release);
    }
}

impl Clock for FrozenClock {
    fn now_utc(&self) -> DateTime<Utc> {
        let ms = self.now_ms.load(Ordering::Acquire);
        Utc.timestamp_millis_opt(ms).single().expect("valid frozen timestamp")
    }
}
