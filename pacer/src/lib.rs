//
// Copyright 2022 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

#[macro_use]
pub mod metrics;

pub mod config;
pub mod pacer;
pub mod rtp;
