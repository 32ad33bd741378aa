//
// Copyright (c) The Parley Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod attribute;
pub mod consts;
pub mod error;
pub mod flowspec;
pub mod message;
pub mod nlri;
