//! Multiview - composes live IPTV streams into a single MPEG-TS broadcast.
//!
//! This library crate exposes the core components for integration testing.

pub mod broadcast;
pub mod catalog;
pub mod config;
pub mod encoder;
pub mod error;
pub mod filtergraph;
pub mod layout;
pub mod server;
pub mod supervisor;
pub mod watchdog;
