// Copyright The Tailscope Authors
// SPDX-License-Identifier: Apache-2.0

//! Analytic state advanced by the pipeline consumer.
//!
//! Everything in this crate is single-writer by contract: the pipeline
//! consumer owns the instances and is the only mutator; readers only ever
//! observe published [`snapshot::Snapshot`] values.

pub mod buffer;
pub mod counters;
pub mod drain;
pub mod frequency;
pub mod snapshot;
pub mod text;
