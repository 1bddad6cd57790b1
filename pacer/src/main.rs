//
// Copyright 2022 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Demo driver for the paced sender: a bursty simulated video encoder on
//! one thread, the pacing tick on another, and a counting "wire" standing
//! in for the transport.

#[macro_use]
extern crate log;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
};

use anyhow::{ensure, Result};
use clap::Parser;
use env_logger::Env;
use once_cell::sync::Lazy;
use paced_sender::{
    config,
    pacer::{Pacer, PacketSender, Priority, PACING_INTERVAL},
    rtp::{Ssrc, TruncatedSequenceNumber},
};
use pacing_common::{DataRate, DataRateTracker, DataSize, Duration, Instant};
use parking_lot::Mutex;
use rand::{thread_rng, Rng};

// Load the config and treat it as a read-only static value.
static CONFIG: Lazy<config::Config> = Lazy::new(config::Config::parse);

const MEDIA_SSRC: Ssrc = 10_000;

#[rustfmt::skip]
fn print_config(config: &'static config::Config) {
    info!("config:");
    info!("  {:28}{} ({})", "target_send_rate_kbps:", config.target_send_rate_kbps, DataRate::from_kbps(config.target_send_rate_kbps));
    info!("  {:28}{} ({})", "pad_up_to_rate_kbps:", config.pad_up_to_rate_kbps, DataRate::from_kbps(config.pad_up_to_rate_kbps));
    info!("  {:28}{}", "pace_multiplier:", config.pace_multiplier);
    info!("  {:28}{}", "frame_interval_ms:", config.frame_interval_ms);
    info!("  {:28}{}", "keyframe_interval_frames:", config.keyframe_interval_frames);
    info!("  {:28}{}", "packet_size_bytes:", config.packet_size_bytes);
    info!("  {:28}{}", "duration_secs:", config.duration_secs);
}

/// Stands in for the transport. Payloads (here, just their sizes) wait in
/// the store from enqueue until the pacer hands their identity back.
struct Wire {
    payloads: Mutex<HashMap<(Ssrc, TruncatedSequenceNumber), DataSize>>,
    egress: Mutex<DataRateTracker>,
    media_bytes: AtomicU64,
    padding_bytes: AtomicU64,
}

impl Wire {
    fn new() -> Self {
        Self {
            payloads: Mutex::new(HashMap::new()),
            egress: Mutex::new(DataRateTracker::default()),
            media_bytes: AtomicU64::new(0),
            padding_bytes: AtomicU64::new(0),
        }
    }

    fn store(&self, ssrc: Ssrc, seqnum: TruncatedSequenceNumber, size: DataSize) {
        self.payloads.lock().insert((ssrc, seqnum), size);
    }

    fn transmit(&self, ssrc: Ssrc, seqnum: TruncatedSequenceNumber) {
        if let Some(size) = self.payloads.lock().remove(&(ssrc, seqnum)) {
            self.media_bytes
                .fetch_add(size.as_bytes(), Ordering::Relaxed);
            self.egress.lock().push(size, Instant::now());
        } else {
            warn!("no payload stored for ssrc {} seqnum {}", ssrc, seqnum);
        }
    }

    fn egress_rate(&self, now: Instant) -> Option<DataRate> {
        let mut egress = self.egress.lock();
        egress.update(now);
        egress.smoothed_rate()
    }
}

impl PacketSender for Wire {
    fn send_packet(
        &self,
        ssrc: Ssrc,
        seqnum: TruncatedSequenceNumber,
        _capture_time: Instant,
    ) {
        self.transmit(ssrc, seqnum);
    }

    fn send_padding(&self, requested: DataSize) -> DataSize {
        self.padding_bytes
            .fetch_add(requested.as_bytes(), Ordering::Relaxed);
        self.egress.lock().push(requested, Instant::now());
        requested
    }
}

fn run_driver(pacer: Arc<Pacer>, stop: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            pacer.process(Instant::now());
            let wait = pacer.time_until_next_process(Instant::now());
            if !wait.is_zero() {
                thread::sleep(wait.into());
            }
        }
    })
}

fn main() -> Result<()> {
    // Initialize logging.
    env_logger::Builder::from_env(
        Env::default()
            .default_filter_or("paced_sender=info")
            .default_write_style_or("never"),
    )
    .init();

    info!("paced sender demo starting up...");
    info!(
        "paced_sender: v{}",
        option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
    );

    let config = &CONFIG;
    print_config(config);
    ensure!(
        config.target_send_rate_kbps > 0,
        "target-send-rate-kbps must be nonzero"
    );
    ensure!(
        config.pace_multiplier >= 1.0,
        "pace-multiplier must be at least 1.0"
    );
    ensure!(
        config.frame_interval_ms > 0 && config.keyframe_interval_frames > 0,
        "frame intervals must be nonzero"
    );

    let wire = Arc::new(Wire::new());
    let pacer = Arc::new(Pacer::new(
        wire.clone(),
        paced_sender::pacer::Config {
            target_send_rate: DataRate::from_kbps(config.target_send_rate_kbps),
            pace_multiplier: config.pace_multiplier,
        },
        Instant::now(),
    ));
    pacer.set_enabled(true);
    pacer.update_send_rates(
        DataRate::from_kbps(config.target_send_rate_kbps),
        DataRate::from_kbps(config.pad_up_to_rate_kbps),
    );

    let stop = Arc::new(AtomicBool::new(false));
    let driver = run_driver(pacer.clone(), stop.clone());

    // A video-encoder-like producer: a frame's worth of packets every frame
    // interval, with periodic keyframes several times the size. The
    // keyframes are the bursts the pacer exists to smooth out.
    let frame_interval = Duration::from_millis(config.frame_interval_ms);
    let frame_count = config.duration_secs * 1000 / config.frame_interval_ms;
    let bytes_per_frame =
        (DataRate::from_kbps(config.target_send_rate_kbps) * frame_interval).as_bytes();
    let mut seqnum: TruncatedSequenceNumber = 1;
    let mut last_report = Instant::now();
    for frame in 0..frame_count {
        let mut frame_bytes = bytes_per_frame as f64 * thread_rng().gen_range(0.9..1.1);
        if frame % config.keyframe_interval_frames == 0 {
            frame_bytes *= 4.0;
        }

        let capture_time = Instant::now();
        let mut remaining = frame_bytes as u64;
        while remaining > 0 {
            let packet_bytes = remaining.min(config.packet_size_bytes);
            remaining -= packet_bytes;
            let size = DataSize::from_bytes(packet_bytes);
            wire.store(MEDIA_SSRC, seqnum, size);
            let send_now = pacer.enqueue(
                Priority::Normal,
                MEDIA_SSRC,
                seqnum,
                Some(capture_time),
                size,
                Instant::now(),
            );
            if send_now {
                wire.transmit(MEDIA_SSRC, seqnum);
            }
            seqnum = seqnum.wrapping_add(1);
        }

        let now = Instant::now();
        if now.saturating_duration_since(last_report) >= Duration::SECOND {
            last_report = now;
            if let Some(rate) = wire.egress_rate(now) {
                info!(
                    "egress rate {}, queue {:?} / {:?}",
                    rate,
                    pacer.queued_size(),
                    pacer.queue_delay(now)
                );
            }
        }
        thread::sleep(frame_interval.into());
    }

    // Let the queues drain before stopping the driver.
    while pacer.queued_size() > DataSize::ZERO {
        thread::sleep(PACING_INTERVAL.into());
    }
    stop.store(true, Ordering::Relaxed);
    let _ = driver.join();

    info!(
        "sent {} media bytes and {} padding bytes",
        wire.media_bytes.load(Ordering::Relaxed),
        wire.padding_bytes.load(Ordering::Relaxed)
    );
    print_metrics_report();

    Ok(())
}

fn print_metrics_report() {
    let report = paced_sender::metrics!().report();
    for event in &report.events {
        info!("{}: {}", event.name(), event.event_count());
    }
    for histogram in &report.histograms {
        if histogram.histogram.is_empty() {
            continue;
        }
        info!(
            "{}: count {}, min {}, p50 {}, p90 {}, max {}",
            histogram.name(),
            histogram.event_count(),
            histogram.histogram.min().unwrap_or_default(),
            histogram.histogram.percentile(0.5).unwrap_or_default(),
            histogram.histogram.percentile(0.9).unwrap_or_default(),
            histogram.histogram.max().unwrap_or_default(),
        );
    }
}
