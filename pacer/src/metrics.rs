//
// Copyright 2022 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

pub use histogram::*;
pub use macros::*;
pub use reporter::*;

#[macro_use]
mod macros;
mod histogram;
mod reporter;
