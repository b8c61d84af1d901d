// src/core/pipeline/address_expander.rs

use ipnetwork::Ipv4Network;
use tracing::debug;

use crate::core::models::{EventType, RunState};

/// Turns a target into the concrete addresses to query.
///
/// IP and hostname targets pass through unchanged (the caller has already
/// registered them with the deduplicator). A netblock-owner target is
/// parsed as a CIDR block and expanded into every address it contains, in
/// ascending numeric order; each expanded address is registered as it is
/// produced, so the same address reached via two different owner blocks is
/// not queried twice.
///
/// # Arguments
/// * `event_type` - The type of the input event the target came from.
/// * `value` - The target string (address, hostname, or CIDR block).
/// * `state` - The run's deduplication state.
///
/// # Returns
/// The addresses left to query, or an error string when a netblock target
/// cannot be parsed. That error is non-fatal to the run: the caller logs
/// it and skips the target.
pub fn expand_target(
    event_type: EventType,
    value: &str,
    state: &mut RunState,
) -> Result<Vec<String>, String> {
    if event_type != EventType::NetblockOwner {
        return Ok(vec![value.to_string()]);
    }

    let network = value
        .parse::<Ipv4Network>()
        .map_err(|e| format!("invalid netblock '{value}': {e}"))?;

    debug!(netblock = %network, size = network.size(), "Expanding netblock into addresses.");

    let mut addresses = Vec::new();
    for addr in network.iter() {
        let addr = addr.to_string();
        if state.should_process(&addr) {
            addresses.push(addr);
        } else {
            debug!(address = %addr, "Skipping expanded address, already checked.");
        }
    }

    Ok(addresses)
}
