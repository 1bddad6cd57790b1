//
// Copyright 2022 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

use std::{
    mem,
    sync::atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;

use crate::metrics::histogram::Histogram;

/// How many samples per reporting period a reporter aims for. The sample
/// interval adjusts itself after each report to hit this.
const TARGET_SAMPLE_RATE: usize = 1000;

/// Collects a histogram of values of any unit, e.g. delays or packet sizes.
///
/// Every event is counted; only 1 in `sample_interval` invokes the sampler,
/// so a sampler on a hot path stays cheap.
pub struct ValueReporter {
    name: &'static str,
    samples_since_last_report: Mutex<SinceLastReport>,
    event_counter: AtomicUsize,
    sample_interval: AtomicUsize,
}

struct SinceLastReport {
    histogram: Histogram<usize>,
    initial_event_counter: usize,
    sample_count: usize,
}

impl SinceLastReport {
    fn new(event_counter: usize) -> SinceLastReport {
        SinceLastReport {
            histogram: Histogram::default(),
            initial_event_counter: event_counter,
            sample_count: 0,
        }
    }
}

impl ValueReporter {
    pub fn new(name: &'static str) -> ValueReporter {
        ValueReporter {
            name,
            samples_since_last_report: Mutex::new(SinceLastReport::new(0)),
            event_counter: AtomicUsize::new(0),
            sample_interval: AtomicUsize::new(1),
        }
    }

    /// Counts an event and, on every `sample_interval`th call, runs the
    /// sampler and records its value with the weight of the whole interval.
    pub fn push(&self, sampler: impl FnOnce() -> usize) {
        let sample_interval = self.sample_interval.load(Ordering::Relaxed);
        let previous_counter = self.event_counter.fetch_add(1, Ordering::AcqRel);
        if previous_counter % sample_interval == (sample_interval - 1) {
            let mut samples = self.samples_since_last_report.lock();
            samples.histogram.push_n(sampler(), sample_interval);
            samples.sample_count += 1;
        }
    }

    /// Creates a report and resets the reporter.
    pub fn report(&self) -> HistogramReport {
        let event_count = self.event_counter.load(Ordering::Relaxed);
        let last_sample_interval = self.sample_interval.load(Ordering::Relaxed);

        let since_last_report = {
            let mut samples = self.samples_since_last_report.lock();
            mem::replace(&mut *samples, SinceLastReport::new(event_count))
        };

        let events_since_last_report = event_count - since_last_report.initial_event_counter;
        self.sample_interval.store(
            Self::calculate_sample_interval(events_since_last_report, TARGET_SAMPLE_RATE),
            Ordering::Relaxed,
        );

        HistogramReport {
            name: self.name,
            sample_interval: last_sample_interval,
            histogram: since_last_report.histogram,
            event_count: events_since_last_report,
            sample_count: since_last_report.sample_count,
        }
    }

    fn calculate_sample_interval(actual_count: usize, target_rate: usize) -> usize {
        (actual_count / target_rate).max(1)
    }
}

#[derive(Debug)]
pub struct HistogramReport {
    name: &'static str,
    sample_interval: usize,
    event_count: usize,
    sample_count: usize,
    pub histogram: Histogram<usize>,
}

impl HistogramReport {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of events in this reporting period, sampled or not.
    pub fn event_count(&self) -> usize {
        self.event_count
    }

    /// Number of events whose sampler actually ran in this reporting period.
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// 1 in `sample_interval` events were recorded.
    pub fn sample_interval(&self) -> usize {
        self.sample_interval
    }
}

/// Counts occurrences of a named event.
pub struct EventCountReporter {
    name: &'static str,
    event_count: AtomicUsize,
}

impl EventCountReporter {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            event_count: AtomicUsize::new(0),
        }
    }

    pub fn count(&self) {
        self.count_n(1);
    }

    pub fn count_n(&self, n: usize) {
        self.event_count.fetch_add(n, Ordering::Relaxed);
    }

    /// Grab the event count and reset to zero.
    pub fn report(&self) -> EventReport {
        EventReport {
            name: self.name,
            event_count: self.event_count.swap(0, Ordering::Relaxed),
        }
    }
}

#[derive(PartialEq, Eq, Debug)]
pub struct EventReport {
    name: &'static str,
    event_count: usize,
}

impl EventReport {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn event_count(&self) -> usize {
        self.event_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_a_value_sample() {
        let reporter = ValueReporter::new("test");

        reporter.push(|| 100);

        let report = reporter.report();
        assert_eq!("test", report.name());
        assert_eq!(1, report.event_count());
        assert_eq!(1, report.sample_count());
        assert_eq!(
            vec![(&100, &1)],
            report.histogram.iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn once_report_is_taken_a_new_report_starts() {
        let reporter = ValueReporter::new("test");

        reporter.push(|| 100);

        assert_eq!(1, reporter.report().event_count());
        assert_eq!(0, reporter.report().event_count());
    }

    #[test]
    fn sample_interval_adjusts_toward_target_rate() {
        let reporter = ValueReporter::new("test");

        for _ in 0..10_000 {
            reporter.push(|| 1);
        }

        let report = reporter.report();
        assert_eq!(1, report.sample_interval());
        assert_eq!(10_000, report.event_count());
        assert_eq!(10_000, report.sample_count());

        // 10K events in the last period moves the interval to 10.
        for _ in 0..10_000 {
            reporter.push(|| 1);
        }

        let report = reporter.report();
        assert_eq!(10, report.sample_interval());
        assert_eq!(10_000, report.event_count());
        assert_eq!(1_000, report.sample_count());
        // Each sample carries the weight of its whole interval.
        assert_eq!(10_000, report.histogram.total_count());
    }

    #[test]
    fn only_the_nth_sample_runs_the_sampler() {
        let reporter = ValueReporter::new("test");
        for _ in 0..10_000 {
            reporter.push(|| 1);
        }
        let _ = reporter.report();

        for _ in 0..10_000 {
            reporter.push(|| 1);
        }
        let _ = reporter.report();

        // Interval is now 10; 9x1 then 1x3 shows exactly the 10th value lands.
        for _ in 0..9 {
            reporter.push(|| 1);
        }
        reporter.push(|| 3);

        let report = reporter.report();
        assert_eq!(1, report.sample_count());
        assert_eq!(
            vec![(&3, &10)],
            report.histogram.iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn event_counting() {
        let event_reporter = EventCountReporter::new("event");

        event_reporter.count();

        let report = event_reporter.report();
        assert_eq!("event", report.name());
        assert_eq!(1, report.event_count());

        event_reporter.count();
        event_reporter.count_n(3);

        let report = event_reporter.report();
        assert_eq!(4, report.event_count());

        assert_eq!(0, event_reporter.report().event_count());
    }
}
