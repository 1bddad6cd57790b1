//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

mod data_rate;
mod time;

pub use data_rate::*;
pub use time::*;
