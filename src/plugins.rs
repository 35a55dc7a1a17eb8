//! `cdx plugins`: what is registered and whether it can run.

use serde::Serialize;
use std::io::Write;

use crate::dispatch::Dispatcher;
use crate::registry::{Capabilities, PluginKind};
use crate::transport::TransportKind;

#[derive(Debug, Clone, Serialize)]
pub struct PluginStatus {
    pub plugin_id: String,
    pub version: String,
    pub kind: PluginKind,
    pub transport: TransportKind,
    pub entrypoint: String,
    /// Whether the dispatcher will route requests to this plugin.
    pub available: bool,
    pub capabilities: Capabilities,
}

/// Every registered plugin in ID order.
pub fn plugin_statuses(dispatcher: &Dispatcher) -> Vec<PluginStatus> {
    dispatcher
        .registry()
        .plugins()
        .into_iter()
        .map(|plugin| {
            let transport = plugin.transport.kind();
            PluginStatus {
                available: transport == TransportKind::Embedded || dispatcher.external_enabled(),
                plugin_id: plugin.manifest.plugin_id,
                version: plugin.manifest.version,
                kind: plugin.manifest.kind,
                transport,
                entrypoint: plugin.manifest.entrypoint,
                capabilities: plugin.manifest.capabilities,
            }
        })
        .collect()
}

/// Print `statuses` as an aligned table.
pub fn write_table<W: Write>(mut out: W, statuses: &[PluginStatus]) -> std::io::Result<()> {
    writeln!(
        out,
        "{:<12} {:<8} {:<7} {:<10} {:<10} ENTRYPOINT",
        "PLUGIN", "VERSION", "KIND", "TRANSPORT", "STATUS"
    )?;
    for s in statuses {
        let status = if s.available { "OK" } else { "DISABLED" };
        writeln!(
            out,
            "{:<12} {:<8} {:<7} {:<10} {:<10} {}",
            s.plugin_id, s.version, s.kind, s.transport, status, s.entrypoint
        )?;
    }
    Ok(())
}
