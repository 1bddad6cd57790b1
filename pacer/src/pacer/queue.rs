//
// Copyright 2022 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

use std::collections::{HashSet, VecDeque};

use pacing_common::{DataSize, Instant};

use crate::rtp::{Ssrc, TruncatedSequenceNumber};

/// What the pacer holds for a queued packet. The payload stays with the
/// caller; this is just enough to hand the packet back through the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    pub ssrc: Ssrc,
    pub seqnum: TruncatedSequenceNumber,
    pub capture_time: Instant,
    pub size: DataSize,
}

/// One priority band: FIFO of packet descriptors, deduplicated on sequence
/// number.
///
/// The retransmit path upstream can re-enqueue a sequence number while a
/// copy is still waiting here; the second copy is silently dropped.
#[derive(Default)]
pub struct PacketQueue {
    packets: VecDeque<Packet>,
    // Exactly the sequence numbers of the packets currently queued.
    seqnums: HashSet<TruncatedSequenceNumber>,
    queued_size: DataSize,
}

impl PacketQueue {
    pub fn push_back(&mut self, packet: Packet) {
        if !self.seqnums.insert(packet.seqnum) {
            // Don't insert duplicates.
            return;
        }
        self.queued_size += packet.size;
        self.packets.push_back(packet);
    }

    pub fn pop_front(&mut self) -> Option<Packet> {
        let packet = self.packets.pop_front()?;
        self.seqnums.remove(&packet.seqnum);
        self.queued_size = self.queued_size.saturating_sub(packet.size);
        Some(packet)
    }

    pub fn front(&self) -> Option<&Packet> {
        self.packets.front()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn queued_size(&self) -> DataSize {
        self.queued_size
    }
}
