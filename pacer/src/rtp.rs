//
// Copyright 2022 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! The subset of RTP the pacer knows about: the identity a packet keeps
//! while its payload stays behind in the caller's send queue.

pub type Ssrc = u32;
// What actually goes in the packet, not the full ROC-extended counter.
pub type TruncatedSequenceNumber = u16;
