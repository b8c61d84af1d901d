// src/core/pipeline/response_classifier.rs

use serde_json::Value;
use tracing::{debug, error};

use crate::core::host::EventSink;
use crate::core::models::{
    AutonomousSystemInfo, EventType, ExtractResult, LocationInfo, RecordMetadata, RunState,
    ScanEvent,
};

/// Maps one attribution record, already past the age filter, into findings.
///
/// The full record is always emitted first as RAW_RIR_DATA. After that,
/// each optional substructure is extracted independently: a malformed
/// substructure is logged and skipped without aborting the record, so the
/// remaining findings are still produced.
///
/// # Arguments
/// * `record` - The parsed API record.
/// * `address` - The address that was queried to obtain this record.
/// * `parent` - The event id the findings are causally derived from.
pub fn classify(
    record: &Value,
    address: &str,
    parent: u64,
    state: &mut RunState,
    sink: &mut dyn EventSink,
) {
    match serde_json::to_string(record) {
        Ok(raw) => emit(sink, state, EventType::RawRirData, raw, parent),
        Err(e) => error!(address, error = %e, "Failed to serialize raw record."),
    }

    match extract_geo(record) {
        Ok(Some(location)) => emit(sink, state, EventType::GeoInfo, location, parent),
        Ok(None) => {}
        Err(e) => error!(address, error = %e, "Malformed location substructure."),
    }

    match extract_headers(record) {
        Ok(Some(headers)) => {
            // Headers are attributed to the exact host queried, which for a
            // netblock expansion differs from what the parent describes.
            let mut event = ScanEvent::new(
                state.next_id(),
                EventType::WebserverHttpHeaders,
                headers,
                Some(parent),
            );
            event.source_addr = Some(address.to_string());
            sink.emit(event);
        }
        Ok(None) => {}
        Err(e) => error!(address, error = %e, "Malformed headers substructure."),
    }

    match extract_autonomous_system(record) {
        Ok(Some((asn, routed_prefix))) => {
            emit(sink, state, EventType::BgpAsMember, asn, parent);
            emit(sink, state, EventType::NetblockMember, routed_prefix, parent);
        }
        Ok(None) => {}
        Err(e) => error!(address, error = %e, "Malformed autonomous_system substructure."),
    }

    match extract_open_ports(record) {
        Ok(Some(ports)) => {
            for port in ports {
                emit(sink, state, EventType::TcpPortOpen, port, parent);
            }
        }
        Ok(None) => {}
        Err(e) => error!(address, error = %e, "Malformed protocols substructure."),
    }

    match extract_operating_system(record) {
        Ok(Some(os)) => emit(sink, state, EventType::OperatingSystem, os, parent),
        Ok(None) => {}
        Err(e) => error!(address, error = %e, "Malformed metadata substructure."),
    }
}

fn emit(
    sink: &mut dyn EventSink,
    state: &mut RunState,
    event_type: EventType,
    data: String,
    parent: u64,
) {
    debug!(event = %event_type, data = %data, "Emitting finding.");
    sink.emit(ScanEvent::new(state.next_id(), event_type, data, Some(parent)));
}

/// Joins the location components present in the record with ", ", dropping
/// empty ones. An empty join means no GEOINFO finding at all.
fn extract_geo(record: &Value) -> ExtractResult<String> {
    let Some(value) = record.get("location") else {
        return Ok(None);
    };
    let location: LocationInfo =
        serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;

    let joined = [
        location.city,
        location.province,
        location.postal_code,
        location.country,
    ]
    .into_iter()
    .flatten()
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join(", ");

    if joined.is_empty() {
        Ok(None)
    } else {
        Ok(Some(joined))
    }
}

/// The headers substructure is carried through as serialized JSON text.
fn extract_headers(record: &Value) -> ExtractResult<String> {
    let Some(headers) = record.get("headers") else {
        return Ok(None);
    };
    let serialized = serde_json::to_string(headers).map_err(|e| e.to_string())?;
    Ok(Some(serialized))
}

/// Both the AS number and its routed prefix come out of the same
/// substructure, producing the BGP_AS_MEMBER / NETBLOCK_MEMBER pair.
fn extract_autonomous_system(record: &Value) -> ExtractResult<(String, String)> {
    let Some(value) = record.get("autonomous_system") else {
        return Ok(None);
    };
    let info: AutonomousSystemInfo =
        serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
    Ok(Some((info.asn.to_string(), info.routed_prefix)))
}

/// Protocol entries have the form `"<port>/<proto>"`; each becomes an
/// `"<ip>:<port>"` finding using the record's own `ip` field. Without an
/// `ip` field there is nothing to attribute the ports to, so all of them
/// are skipped.
fn extract_open_ports(record: &Value) -> ExtractResult<Vec<String>> {
    let Some(value) = record.get("protocols") else {
        return Ok(None);
    };
    let protocols: Vec<String> =
        serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;

    let Some(ip) = record.get("ip").and_then(|v| v.as_str()) else {
        return Ok(None);
    };

    let ports = protocols
        .iter()
        .map(|entry| {
            let port = entry.split('/').next().unwrap_or_default();
            format!("{ip}:{port}")
        })
        .collect();
    Ok(Some(ports))
}

fn extract_operating_system(record: &Value) -> ExtractResult<String> {
    let Some(value) = record.get("metadata") else {
        return Ok(None);
    };
    let metadata: RecordMetadata =
        serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
    Ok(metadata.os_description)
}
