//
// Copyright 2022 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

use pacing_common::{DataRate, DataSize, Duration};

/// A token bucket measured in bytes, refilled by a target rate and drained
/// by sends.
///
/// Two rules give it its shaping behavior: budget left over from a quiet
/// interval does not carry into the next one, and spending may run the
/// balance negative (one send can cross zero) down to a floor of
/// [`IntervalBudget::MAX_DEBT_INTERVAL`] worth of the target rate.
pub struct IntervalBudget {
    target_rate: DataRate,
    bytes_remaining: i64,
}

impl IntervalBudget {
    /// A single oversized send can eat at most this much of future intervals.
    const MAX_DEBT_INTERVAL: Duration = Duration::from_millis(100);

    pub fn new(target_rate: DataRate) -> Self {
        Self {
            target_rate,
            bytes_remaining: 0,
        }
    }

    /// Changes the refill rate. The current balance, including debt, is kept.
    pub fn set_target_rate(&mut self, target_rate: DataRate) {
        self.target_rate = target_rate;
    }

    pub fn increase(&mut self, delta: Duration) {
        let bytes = (self.target_rate * delta).as_bytes() as i64;
        if self.bytes_remaining < 0 {
            // We overused last interval, compensate this interval.
            self.bytes_remaining += bytes;
        } else {
            // If we underused last interval we can't use it this interval.
            self.bytes_remaining = bytes;
        }
    }

    pub fn use_budget(&mut self, size: DataSize) {
        let floor = -((self.target_rate * Self::MAX_DEBT_INTERVAL).as_bytes() as i64);
        self.bytes_remaining = (self.bytes_remaining - size.as_bytes() as i64).max(floor);
    }

    pub fn bytes_remaining(&self) -> i64 {
        self.bytes_remaining
    }
}
