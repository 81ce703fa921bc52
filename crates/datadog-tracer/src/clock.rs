// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wall-clock and monotonic time sources.
//!
//! Spans record their `start` from the wall clock and their `duration` from
//! the monotonic clock, so a single reading captures both. The clock is an
//! injectable function so tests can freeze or step time.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// One simultaneous reading of both clocks.
#[derive(Debug, Clone, Copy)]
pub struct TimePoint {
    /// Wall-clock time, used for span start timestamps.
    pub wall: SystemTime,
    /// Monotonic time, used for span durations.
    pub tick: Instant,
}

pub type Clock = Arc<dyn Fn() -> TimePoint + Send + Sync>;

pub fn default_clock() -> Clock {
    Arc::new(|| TimePoint {
        wall: SystemTime::now(),
        tick: Instant::now(),
    })
}

/// Nanoseconds since the Unix epoch, saturating at zero for pre-epoch
/// readings (possible on hosts with a badly set wall clock).
pub fn wall_nanos(wall: SystemTime) -> u64 {
    wall.duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn wall_nanos_is_monotone_for_later_times() {
        let earlier = UNIX_EPOCH + Duration::from_secs(1);
        let later = UNIX_EPOCH + Duration::from_secs(2);
        assert!(wall_nanos(earlier) < wall_nanos(later));
    }

    #[test]
    fn wall_nanos_saturates_before_epoch() {
        let before = UNIX_EPOCH - Duration::from_secs(1);
        assert_eq!(wall_nanos(before), 0);
    }
}
