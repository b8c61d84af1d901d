// src/core/models.rs

use serde::Deserialize;
use std::collections::HashSet;
use strum::Display;

// --- Reusable Result Types ---
// A custom type alias for a fallible lookup of an optional value inside an
// API record. `Ok(None)` means the field is absent, `Err` means it was
// present but malformed.
pub type ExtractResult<T> = Result<Option<T>, String>;

// --- Event Model ---

/// The full set of event types this pipeline consumes and produces.
///
/// `Display` renders the wire name used by the host event bus, so events
/// can be logged and reported without a separate mapping table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum EventType {
    // Consumed event types.
    #[strum(serialize = "IP_ADDRESS")]
    IpAddress,
    #[strum(serialize = "INTERNET_NAME")]
    InternetName,
    #[strum(serialize = "NETBLOCK_OWNER")]
    NetblockOwner,
    // Produced event types.
    #[strum(serialize = "BGP_AS_MEMBER")]
    BgpAsMember,
    #[strum(serialize = "TCP_PORT_OPEN")]
    TcpPortOpen,
    #[strum(serialize = "OPERATING_SYSTEM")]
    OperatingSystem,
    #[strum(serialize = "WEBSERVER_HTTPHEADERS")]
    WebserverHttpHeaders,
    #[strum(serialize = "NETBLOCK_MEMBER")]
    NetblockMember,
    #[strum(serialize = "GEOINFO")]
    GeoInfo,
    #[strum(serialize = "RAW_RIR_DATA")]
    RawRirData,
}

/// Which API lookup endpoint an event type maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Ip,
    Host,
}

impl EventType {
    /// Maps a consumed event type to its lookup endpoint. The kind is
    /// derived from the original event type, not from the address content:
    /// addresses expanded out of a netblock are still IP lookups.
    pub fn query_kind(self) -> Option<QueryKind> {
        match self {
            EventType::IpAddress | EventType::NetblockOwner => Some(QueryKind::Ip),
            EventType::InternetName => Some(QueryKind::Host),
            _ => None,
        }
    }
}

/// A single event flowing through the pipeline: an input target or an
/// output finding. `parent` links the event to the event it was derived
/// from, so consumers can walk the causal chain.
#[derive(Debug, Clone)]
pub struct ScanEvent {
    pub id: u64,
    pub event_type: EventType,
    pub data: String,
    pub parent: Option<u64>,
    /// The exact host a finding was observed on, when that differs from
    /// what the causal parent describes (used by WEBSERVER_HTTPHEADERS).
    pub source_addr: Option<String>,
}

impl ScanEvent {
    pub fn new(id: u64, event_type: EventType, data: String, parent: Option<u64>) -> Self {
        Self {
            id,
            event_type,
            data,
            parent,
            source_addr: None,
        }
    }
}

// --- API Record Substructures ---
// Typed shapes for the optional substructures of an attribution record.
// Each is deserialized on its own from the raw JSON value, so one malformed
// substructure cannot poison the others.

/// Geographic attribution for a host. All components are optional; the
/// classifier joins whatever is present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocationInfo {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub province: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

/// BGP attribution for a host. Both fields are required when the
/// substructure is present at all.
#[derive(Debug, Clone, Deserialize)]
pub struct AutonomousSystemInfo {
    pub asn: i64,
    pub routed_prefix: String,
}

/// Scanner-derived metadata about a host.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordMetadata {
    #[serde(default)]
    pub os_description: Option<String>,
}

// --- Run State ---

/// Mutable state owned by a single enrichment run: the set of already
/// processed target/address strings, the latched error flag, and the
/// event id counter. Constructed fresh for every run; nothing survives
/// across runs.
#[derive(Debug, Default)]
pub struct RunState {
    seen: HashSet<String>,
    error_latched: bool,
    next_event_id: u64,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true exactly once per key and marks it as seen, so a given
    /// target or address string is queried at most once per run.
    pub fn should_process(&mut self, key: &str) -> bool {
        self.seen.insert(key.to_string())
    }

    /// Latches the run into its terminal error state. One-way: once set,
    /// no further queries are issued and no further findings are emitted
    /// for the remainder of the run.
    pub fn latch_error(&mut self) {
        self.error_latched = true;
    }

    pub fn error_latched(&self) -> bool {
        self.error_latched
    }

    /// Hands out the next event id for this run.
    pub fn next_id(&mut self) -> u64 {
        self.next_event_id += 1;
        self.next_event_id
    }
}
