//! `pr-gateway` — the PrintRelay server.
//!
//! One device connection fans out to many LAN observers: a status push
//! channel over WebSocket and an MJPEG camera stream over HTTP.

pub mod api;
pub mod bootstrap;
pub mod broadcast;
pub mod cli;
pub mod media;
pub mod state;
pub mod status;
pub mod supervisor;
