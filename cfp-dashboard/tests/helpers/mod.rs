//! Test Helper Utilities
//!
//! Shared utilities for testing cfp-dashboard

#![allow(dead_code)]

pub mod fakes;

pub use fakes::{rows, ChannelSubscriber, FakeInference, FlakySubscriber};
