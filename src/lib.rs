//! `goaltrack` - goal-completion tracking engine
//!
//! Contracts are trees of conditions over units that split, merge, lose and
//! regain members while the conditions are being tracked. This crate keeps
//! per-unit evidence for every condition, picks the unit each group of
//! conditions follows, and reports state changes as host events arrive.
//!
//! The host supplies unit data through [`host::UnitWorld`] and pushes
//! [`host::HostEvent`]s into a [`tracker::ContractTracker`]. The
//! [`scenario`] module provides an in-memory host for scripted replays.

pub mod bus;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod group;
pub mod host;
pub mod ledger;
pub mod observability;
pub mod persistence;
pub mod scenario;
pub mod state;
pub mod tracker;
pub mod tree;
pub mod unit;
