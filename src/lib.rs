//! Ummah client core
//!
//! The behavior behind the community app's screens, independent of any UI:
//! - Live khotba listener (status polling + Janus video room subscriber)
//! - Personal schedule with month/week/day calendar views
//! - Sebha counter
//! - Optimistic social feed updates with compensation
//! - Typed local persistence for preferences and cached data

pub mod bus;
pub mod commands;
pub mod config;
pub mod preferences;
pub mod schedule;
pub mod sebha;
pub mod storage;
pub mod stream;
