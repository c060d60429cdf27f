//! Fleetgate - a control plane for game-server containers behind a reverse proxy
//!
//! This library keeps a reverse proxy's routing table consistent with a
//! fleet of managed game-server containers:
//! - Owns the authoritative lifecycle state of every managed server
//! - Drives container create/start/stop/remove against a Docker endpoint
//! - Reconciles observed container state against declared intent
//! - Regenerates and hot-reloads the proxy configuration on fleet changes
//! - Exposes a small HTTP control API plus a best-effort event stream

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod registry;
pub mod reload;
pub mod runtime;
pub mod store;
pub mod synth;
