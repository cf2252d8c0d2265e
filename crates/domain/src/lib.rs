//! `pr-domain` — shared types for PrintRelay.
//!
//! Holds the configuration tree, the canonical printer status model and
//! the pure projection from raw device status payloads onto that model.

pub mod config;
pub mod projector;
pub mod status;
