// Copyright The Tailscope Authors
// SPDX-License-Identifier: Apache-2.0

//! Input sources: independent producer tasks feeding the unified line
//! channel.

pub(crate) mod file;
pub(crate) mod otlp;
pub(crate) mod stdin;

/// Capacity of the unified line channel shared by all producers.
pub const LINE_CHANNEL_CAPACITY: usize = 100;
