//! Proxy route synthesis
//!
//! Pure transform from a registry snapshot to the proxy's routing
//! document. Identical snapshots always render byte-identical output;
//! the reload coordinator relies on that for change detection.

use crate::registry::{ManagedServer, ObservedState};
use serde::Serialize;
use std::fmt::Write;

/// One entry in the proxy's routing table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyRoute {
    pub backend_id: String,
    /// Virtual host the proxy matches on (the server name)
    pub host: String,
    /// Backend address the proxy forwards to
    pub address: String,
}

/// Routes for every running server, ordered by name for stable output
pub fn routes(snapshot: &[ManagedServer]) -> Vec<ProxyRoute> {
    let mut running: Vec<&ManagedServer> = snapshot
        .iter()
        .filter(|s| s.observed_state == ObservedState::Running)
        .collect();
    running.sort_by(|a, b| a.name.cmp(&b.name));

    running
        .into_iter()
        .map(|s| ProxyRoute {
            backend_id: s.id.clone(),
            host: s.name.clone(),
            address: format!("127.0.0.1:{}", s.host_port),
        })
        .collect()
}

/// Render routes as the proxy's TOML routing document
pub fn render(routes: &[ProxyRoute]) -> Vec<u8> {
    let mut out = String::new();
    out.push_str("# Generated by fleetgate; do not edit by hand.\n");
    for route in routes {
        // Manual formatting keeps the output byte-stable across versions
        let _ = write!(
            out,
            "\n[routes.{}]\nbackend_id = \"{}\"\nhost = \"{}\"\naddress = \"{}\"\n",
            route.host, route.backend_id, route.host, route.address
        );
    }
    out.into_bytes()
}

/// Convenience: snapshot straight to rendered bytes
pub fn synthesize(snapshot: &[ManagedServer]) -> Vec<u8> {
    render(&routes(snapshot))
}
