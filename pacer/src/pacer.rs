//
// Copyright 2022 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

use std::sync::Arc;

use log::*;
use pacing_common::{DataRate, DataSize, Duration, Instant};
use parking_lot::{Mutex, MutexGuard};

use crate::rtp::{Ssrc, TruncatedSequenceNumber};

mod budget;
mod queue;

use budget::IntervalBudget;
use queue::{Packet, PacketQueue};

/// How often the external driver is expected to call [`Pacer::process`].
pub const PACING_INTERVAL: Duration = Duration::from_millis(5);

/// Upper cap on the refill interval, in case process has not been called in
/// a long time. Bounds the burst that follows a stall.
const MAX_REFILL_INTERVAL: Duration = Duration::from_millis(30);

/// Max time that the first packet in a queue can sit there if no packets are
/// sent at all, regardless of budget. In practice only in effect at low
/// bitrates.
const MAX_TIME_WITHOUT_SENDING: Duration = Duration::from_millis(30);

/// Hard cap on generated padding, no matter what rate was asked for.
const MAX_PADDING_RATE: DataRate = DataRate::from_kbps(800);

/// Media is paced at this multiple of the target send rate unless configured
/// otherwise, so queues drain faster than they fill.
pub const DEFAULT_PACE_MULTIPLIER: f64 = 2.5;

/// The transport half that the pacer drives.
///
/// `send_packet` looks up the payload the caller kept when it enqueued
/// (keyed by ssrc and sequence number) and writes it to the wire.
/// `send_padding` writes up to the requested amount of padding and returns
/// how much actually went out, which may be less or zero.
///
/// Both are invoked with the pacer's lock released, so implementations may
/// block or call back into the pacer. They must not call
/// [`Pacer::process`] re-entrantly.
pub trait PacketSender: Send + Sync {
    fn send_packet(
        &self,
        ssrc: Ssrc,
        seqnum: TruncatedSequenceNumber,
        capture_time: Instant,
    );

    fn send_padding(&self, requested: DataSize) -> DataSize;
}

/// Relative urgency of a packet. Within one priority, delivery is FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Retransmissions and audio.
    High,
    /// Video.
    Normal,
    /// Anything that can wait out a congested interval entirely.
    Low,
}

#[derive(Clone, Debug)]
pub struct Config {
    /// The rate to send media at, before the pace multiplier is applied.
    pub target_send_rate: DataRate,
    /// Media is metered at `pace_multiplier * target_send_rate`. Must be at
    /// least 1.0.
    pub pace_multiplier: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_send_rate: DataRate::ZERO,
            pace_multiplier: DEFAULT_PACE_MULTIPLIER,
        }
    }
}

/// A Pacer smooths out the sending of packets such that we send packets at a
/// regular interval instead of in bursts. It does so by queuing packets in
/// three priority bands and leaking them out on a periodic tick, metered by
/// interval budgets. If there is nothing to leak out, it asks the transport
/// for padding, up to a configured rate, so that bandwidth estimation keeps
/// getting samples while media is idle.
///
/// The pacer holds packet descriptors only; payloads stay with the caller.
/// It never blocks: the single internal lock is held for short sections and
/// always released around the [`PacketSender`] callbacks. Someone must call
/// [`Pacer::process`] regularly, at the cadence suggested by
/// [`Pacer::time_until_next_process`].
pub struct Pacer {
    callback: Arc<dyn PacketSender>,
    pace_multiplier: f64,
    state: Mutex<State>,
}

struct State {
    enabled: bool,
    paused: bool,
    media_budget: IntervalBudget,
    padding_budget: IntervalBudget,
    pad_up_to_budget: IntervalBudget,
    time_last_update: Instant,
    time_last_send: Instant,
    capture_time_last_queued: Option<Instant>,
    capture_time_last_sent: Option<Instant>,
    high_priority: PacketQueue,
    normal_priority: PacketQueue,
    low_priority: PacketQueue,
}

impl Pacer {
    pub fn new(callback: Arc<dyn PacketSender>, config: Config, now: Instant) -> Self {
        assert!(
            config.pace_multiplier >= 1.0,
            "pace multiplier must be at least 1.0"
        );
        let mut state = State {
            enabled: false,
            paused: false,
            media_budget: IntervalBudget::new(
                config.target_send_rate * config.pace_multiplier,
            ),
            padding_budget: IntervalBudget::new(MAX_PADDING_RATE),
            // No padding until update_send_rates() is called.
            pad_up_to_budget: IntervalBudget::new(DataRate::ZERO),
            time_last_update: now,
            time_last_send: now,
            capture_time_last_queued: None,
            capture_time_last_sent: None,
            high_priority: PacketQueue::default(),
            normal_priority: PacketQueue::default(),
            low_priority: PacketQueue::default(),
        };
        state.increase_budgets(PACING_INTERVAL);
        Self {
            callback,
            pace_multiplier: config.pace_multiplier,
            state: Mutex::new(state),
        }
    }

    /// While disabled, [`Pacer::enqueue`] lets everything through untouched.
    pub fn set_enabled(&self, enabled: bool) {
        self.state.lock().enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Queues everything and stops all sending until [`Pacer::resume`].
    pub fn pause(&self) {
        trace!("pacer paused");
        self.state.lock().paused = true;
    }

    pub fn resume(&self) {
        trace!("pacer resumed");
        self.state.lock().paused = false;
    }

    /// Retargets the media and pad-up-to budgets. Unspent budget and debt
    /// carry over; the padding cap is unaffected.
    pub fn update_send_rates(&self, target_send_rate: DataRate, pad_up_to_rate: DataRate) {
        trace!(
            "pacer rates: media {}, pad up to {}",
            target_send_rate,
            pad_up_to_rate
        );
        let mut state = self.state.lock();
        state
            .media_budget
            .set_target_rate(target_send_rate * self.pace_multiplier);
        state.pad_up_to_budget.set_target_rate(pad_up_to_rate);
    }

    /// Hands a packet to the pacer. Returns true if the caller should send
    /// it right away itself; returns false if the pacer took it and will
    /// deliver it later through [`PacketSender::send_packet`].
    ///
    /// A missing capture time is stamped with `now`.
    pub fn enqueue(
        &self,
        priority: Priority,
        ssrc: Ssrc,
        seqnum: TruncatedSequenceNumber,
        capture_time: Option<Instant>,
        size: DataSize,
        now: Instant,
    ) -> bool {
        let mut state = self.state.lock();

        if !state.enabled {
            state.update_media_bytes_sent(size, now);
            return true; // We can send now.
        }
        let capture_time = capture_time.unwrap_or(now);
        if state.paused {
            // Queue all packets when we are paused.
            match priority {
                Priority::High => {
                    state.high_priority.push_back(Packet {
                        ssrc,
                        seqnum,
                        capture_time,
                        size,
                    });
                }
                Priority::Normal | Priority::Low => {
                    if priority == Priority::Normal
                        && state
                            .capture_time_last_queued
                            .map_or(true, |last| capture_time > last)
                    {
                        state.capture_time_last_queued = Some(capture_time);
                        event!("pacer.frame_queued");
                    }
                    // Queue the low priority packets in the normal priority
                    // queue when we are paused to avoid starvation.
                    state.normal_priority.push_back(Packet {
                        ssrc,
                        seqnum,
                        capture_time,
                        size,
                    });
                }
            }
            return false;
        }
        // The fast path only looks at its own band; process() restores
        // priority order across bands on the next tick.
        if state.queue(priority).is_empty() && state.media_budget.bytes_remaining() > 0 {
            state.update_media_bytes_sent(size, now);
            return true; // We can send now.
        }
        state.queue_mut(priority).push_back(Packet {
            ssrc,
            seqnum,
            capture_time,
            size,
        });
        false
    }

    /// How long the oldest queued packet has been waiting, by its capture
    /// time. Zero when nothing is queued.
    pub fn queue_delay(&self, now: Instant) -> Duration {
        let state = self.state.lock();
        let mut oldest: Option<Instant> = None;
        for queue in [
            &state.high_priority,
            &state.normal_priority,
            &state.low_priority,
        ] {
            if let Some(front) = queue.front() {
                oldest = Some(match oldest {
                    Some(time) => time.min(front.capture_time),
                    None => front.capture_time,
                });
            }
        }
        oldest.map_or(Duration::ZERO, |oldest| {
            now.saturating_duration_since(oldest)
        })
    }

    /// Total descriptor bytes currently queued across all bands.
    pub fn queued_size(&self) -> DataSize {
        let state = self.state.lock();
        state.high_priority.queued_size()
            + state.normal_priority.queued_size()
            + state.low_priority.queued_size()
    }

    /// How long the driver should wait before the next [`Pacer::process`].
    /// Advisory; calling earlier is harmless.
    pub fn time_until_next_process(&self, now: Instant) -> Duration {
        let state = self.state.lock();
        let elapsed = now.saturating_duration_since(state.time_last_update);
        if elapsed.is_zero() {
            // The clock did not move (or moved backwards); try again in a
            // full interval.
            return PACING_INTERVAL;
        }
        PACING_INTERVAL.saturating_sub(elapsed)
    }

    /// One tick: refill the budgets for the elapsed time, drain what they
    /// allow in priority order, then pad if everything is idle.
    pub fn process(&self, now: Instant) {
        let mut state = self.state.lock();
        let elapsed = now.saturating_duration_since(state.time_last_update);
        state.time_last_update = now;
        if state.paused || elapsed.is_zero() {
            return;
        }

        state.increase_budgets(elapsed.clamped_to(MAX_REFILL_INTERVAL));

        while let Some(packet) = state.take_next_packet(now) {
            // The callback may block or re-enter the pacer; never hold the
            // lock across it.
            MutexGuard::unlocked(&mut state, || {
                self.callback
                    .send_packet(packet.ssrc, packet.seqnum, packet.capture_time);
            });
        }

        if state.all_queues_empty()
            && state.padding_budget.bytes_remaining() > 0
            && state.pad_up_to_budget.bytes_remaining() > 0
        {
            let padding_needed = DataSize::from_bytes(
                state
                    .padding_budget
                    .bytes_remaining()
                    .min(state.pad_up_to_budget.bytes_remaining()) as u64,
            );
            let sent =
                MutexGuard::unlocked(&mut state, || self.callback.send_padding(padding_needed));
            if sent > DataSize::ZERO {
                state.time_last_send = now;
                event!("pacer.sent_padding_bytes", sent.as_bytes() as usize);
            }
            state.media_budget.use_budget(sent);
            state.padding_budget.use_budget(sent);
            state.pad_up_to_budget.use_budget(sent);
        }
    }
}

impl State {
    fn queue(&self, priority: Priority) -> &PacketQueue {
        match priority {
            Priority::High => &self.high_priority,
            Priority::Normal => &self.normal_priority,
            Priority::Low => &self.low_priority,
        }
    }

    fn queue_mut(&mut self, priority: Priority) -> &mut PacketQueue {
        match priority {
            Priority::High => &mut self.high_priority,
            Priority::Normal => &mut self.normal_priority,
            Priority::Low => &mut self.low_priority,
        }
    }

    fn all_queues_empty(&self) -> bool {
        self.high_priority.is_empty()
            && self.normal_priority.is_empty()
            && self.low_priority.is_empty()
    }

    fn increase_budgets(&mut self, delta: Duration) {
        self.media_budget.increase(delta);
        self.padding_budget.increase(delta);
        self.pad_up_to_budget.increase(delta);
    }

    fn update_media_bytes_sent(&mut self, size: DataSize, now: Instant) {
        self.time_last_send = now;
        self.media_budget.use_budget(size);
        self.pad_up_to_budget.use_budget(size);
    }

    /// Picks which queued packet goes out next, if any, and pops it with the
    /// budgets debited.
    fn take_next_packet(&mut self, now: Instant) -> Option<Packet> {
        let priority = self.next_priority(now)?;
        let queue = self.queue_mut(priority);
        let packet = queue.pop_front()?;
        let last_of_capture_time = queue
            .front()
            .map_or(true, |next| next.capture_time > packet.capture_time);
        self.update_media_bytes_sent(packet.size, now);
        if priority == Priority::Normal {
            let advanced = self
                .capture_time_last_sent
                .map_or(true, |last| packet.capture_time > last);
            if advanced {
                self.capture_time_last_sent = Some(packet.capture_time);
            } else if Some(packet.capture_time) == self.capture_time_last_sent
                && last_of_capture_time
            {
                event!("pacer.frame_sent");
            }
            sampling_histogram!("pacer.queue_delay_ms", || {
                now.saturating_duration_since(packet.capture_time).as_millis() as usize
            });
        }
        event!("pacer.sent_media_bytes", packet.size.as_bytes() as usize);
        Some(packet)
    }

    fn next_priority(&self, now: Instant) -> Option<Priority> {
        if self.media_budget.bytes_remaining() <= 0 {
            // All bytes for this interval are used up. Still send the head
            // of a queue if nothing at all has gone out for too long, but
            // low priority waits for real budget.
            if now.saturating_duration_since(self.time_last_send) > MAX_TIME_WITHOUT_SENDING {
                if !self.high_priority.is_empty() {
                    return Some(Priority::High);
                }
                if !self.normal_priority.is_empty() {
                    return Some(Priority::Normal);
                }
            }
            return None;
        }
        if !self.high_priority.is_empty() {
            Some(Priority::High)
        } else if !self.normal_priority.is_empty() {
            Some(Priority::Normal)
        } else if !self.low_priority.is_empty() {
            Some(Priority::Low)
        } else {
            None
        }
    }
}
