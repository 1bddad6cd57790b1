//
// Copyright 2022 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Configuration options for the paced sender demo.

use clap;

/// General configuration options, set by command line arguments or
/// falls back to defaults.
#[derive(Default, clap::Parser, Debug, Clone)]
#[clap(name = "paced_sender")]
pub struct Config {
    /// The target rate to pace media at.
    #[clap(long, default_value = "1500")]
    pub target_send_rate_kbps: u64,

    /// The rate the link should see even when media is idle; padding fills
    /// the gap up to this rate. 0 disables padding.
    #[clap(long, default_value = "0")]
    pub pad_up_to_rate_kbps: u64,

    /// Media is paced at this multiple of the target send rate, so queues
    /// drain faster than they fill. Must be at least 1.0.
    #[clap(long, default_value = "2.5")]
    pub pace_multiplier: f64,

    /// Interval between frames produced by the simulated encoder.
    #[clap(long, default_value = "33")]
    pub frame_interval_ms: u64,

    /// Every n-th frame is a keyframe several times the normal size,
    /// the burst the pacer exists to smooth out.
    #[clap(long, default_value = "90")]
    pub keyframe_interval_frames: u64,

    /// Payload bytes per simulated RTP packet.
    #[clap(long, default_value = "1200")]
    pub packet_size_bytes: u64,

    /// How long to run the simulation.
    #[clap(long, default_value = "10")]
    pub duration_secs: u64,
}
