//
// Copyright 2022 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

use std::{collections::HashSet, sync::Arc};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::metrics::{EventCountReporter, EventReport, HistogramReport, ValueReporter};

/// A global structure that contains a map to each of the registered reporters.
///
/// The mutex lock is only used once to register a new reporter, and then once
/// by the report generation.
pub struct Metrics {
    registry: Mutex<Registry>,
}

#[derive(Default)]
struct Registry {
    registered_names: HashSet<&'static str>,
    value_reporters: Vec<Arc<ValueReporter>>,
    event_reporters: Vec<Arc<EventCountReporter>>,
}

pub struct Report {
    pub histograms: Vec<HistogramReport>,
    pub events: Vec<EventReport>,
}

pub static __METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

impl Metrics {
    fn new() -> Metrics {
        Metrics {
            registry: Default::default(),
        }
    }

    /// Locks the internal structure and adds a new value reporter.
    pub fn create_and_register_value(&self, name: &'static str) -> Arc<ValueReporter> {
        let value_reporter = Arc::new(ValueReporter::new(name));

        let mut registry = self.registry.lock();

        if !registry.registered_names.insert(name) {
            panic!("The metric name \"{}\" has been used elsewhere.", name);
        }

        registry.value_reporters.push(Arc::clone(&value_reporter));
        value_reporter
    }

    /// Locks the internal structure and adds a new event counter.
    pub fn create_and_register_event(&self, name: &'static str) -> Arc<EventCountReporter> {
        let event_reporter = Arc::new(EventCountReporter::new(name));

        let mut registry = self.registry.lock();

        if !registry.registered_names.insert(name) {
            panic!("The metric name \"{}\" has been used elsewhere.", name);
        }

        registry.event_reporters.push(Arc::clone(&event_reporter));
        event_reporter
    }

    /// Returns reports, reset and sorted by name.
    ///
    /// The lock is held this whole time, but the only other use of the lock
    /// is registering new reporters.
    pub fn report(&self) -> Report {
        let registry = self.registry.lock();

        let mut histograms = registry
            .value_reporters
            .iter()
            .map(|reporter| reporter.report())
            .collect::<Vec<_>>();
        histograms.sort_unstable_by_key(|report| report.name());

        let mut events = registry
            .event_reporters
            .iter()
            .map(|reporter| reporter.report())
            .collect::<Vec<_>>();
        events.sort_unstable_by_key(|report| report.name());

        Report { histograms, events }
    }
}

#[macro_export]
macro_rules! reporter {
    ($name:expr) => {{
        static __REPORTER: once_cell::sync::Lazy<
            std::sync::Arc<$crate::metrics::ValueReporter>,
        > = once_cell::sync::Lazy::new(|| {
            $crate::metrics::__METRICS.create_and_register_value($name)
        });

        &__REPORTER
    }};
}

#[macro_export]
macro_rules! event_reporter {
    ($name:expr) => {{
        static __REPORTER: once_cell::sync::Lazy<
            std::sync::Arc<$crate::metrics::EventCountReporter>,
        > = once_cell::sync::Lazy::new(|| {
            $crate::metrics::__METRICS.create_and_register_event($name)
        });

        &__REPORTER
    }};
}

#[macro_export]
macro_rules! event {
    ($name:expr) => {
        $crate::event_reporter!($name).count();
    };
    ($name:expr, $count:expr) => {
        $crate::event_reporter!($name).count_n($count);
    };
}

/// Sample the value produced by the supplied function and produce a histogram.
#[macro_export]
macro_rules! sampling_histogram {
    ($name:expr, $sampler:expr) => {
        $crate::reporter!($name).push($sampler)
    };
}

#[macro_export]
macro_rules! metrics {
    () => {{
        &$crate::metrics::__METRICS
    }};
}
