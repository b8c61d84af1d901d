// src/core/pipeline/mod.rs

// The enrichment pipeline. Each concern lives in its own sub-module; this
// file wires them together in the order the data flows:
// dedup -> expansion -> query -> age filter -> classification.
pub mod address_expander;
pub mod age_filter;
pub mod query_client;
pub mod response_classifier;

use tracing::{debug, error};

use crate::config::EnricherConfig;
use crate::core::host::{EventSink, RunContext};
use crate::core::models::{EventType, RunState, ScanEvent};
use self::address_expander::expand_target;
use self::age_filter::is_stale;
use self::query_client::{HttpTransport, QueryClient};
use self::response_classifier::classify;

/// Event types the pipeline reacts to.
pub const WATCHED_EVENTS: &[EventType] = &[
    EventType::IpAddress,
    EventType::InternetName,
    EventType::NetblockOwner,
];

/// Event types the pipeline can produce.
pub const PRODUCED_EVENTS: &[EventType] = &[
    EventType::BgpAsMember,
    EventType::TcpPortOpen,
    EventType::OperatingSystem,
    EventType::WebserverHttpHeaders,
    EventType::NetblockMember,
    EventType::GeoInfo,
    EventType::RawRirData,
];

/// One enrichment run's engine: holds the query client and the configured
/// age limit. All per-run mutable state lives in the `RunState` passed
/// into `handle_event`, never in the engine itself.
pub struct Enricher<T: HttpTransport> {
    client: QueryClient<T>,
    age_limit_days: i64,
    has_credentials: bool,
}

impl<T: HttpTransport> Enricher<T> {
    pub fn new(config: &EnricherConfig, transport: T) -> Self {
        Self {
            client: QueryClient::new(
                transport,
                config.api_key_id.clone(),
                config.api_key_secret.clone(),
                config.request_delay_seconds,
            ),
            age_limit_days: config.age_limit_days,
            has_credentials: config.has_credentials(),
        }
    }

    /// Processes one incoming target event to completion: expansion, the
    /// sequential per-address queries, and the emission of findings with
    /// their causal parents.
    pub async fn handle_event(
        &self,
        event: &ScanEvent,
        state: &mut RunState,
        ctx: &dyn RunContext,
        sink: &mut dyn EventSink,
    ) {
        debug!(event = %event.event_type, data = %event.data, "Received event.");

        if state.error_latched() {
            return;
        }

        if !WATCHED_EVENTS.contains(&event.event_type) {
            debug!(event = %event.event_type, "Ignoring unwatched event type.");
            return;
        }

        if !self.has_credentials {
            error!("Enrichment is enabled but no API key id/secret is configured.");
            state.latch_error();
            return;
        }

        if !state.should_process(&event.data) {
            debug!(target = %event.data, "Skipping target, already checked.");
            return;
        }

        let addresses = match expand_target(event.event_type, &event.data, state) {
            Ok(addresses) => addresses,
            Err(e) => {
                error!(target = %event.data, error = %e, "Unable to expand netblock target.");
                return;
            }
        };

        let Some(kind) = event.event_type.query_kind() else {
            return;
        };

        for address in addresses {
            if ctx.should_stop() || state.error_latched() {
                return;
            }

            let Some(record) = self.client.query(&address, kind, state).await else {
                continue;
            };

            if let Some(error_type) = record.get("error_type").and_then(|v| v.as_str()) {
                if error_type == "unknown" {
                    debug!(address = %address, "API returned no data for this address.");
                } else {
                    error!(address = %address, error_type, "API returned an unexpected error.");
                }
                continue;
            }

            debug!(address = %address, "Found attribution results.");

            let updated_at = record.get("updated_at").and_then(|v| v.as_str());
            if is_stale(updated_at, self.age_limit_days, ctx.now()) {
                debug!(address = %address, "Record found but too old, skipping.");
                continue;
            }

            // Findings from a netblock expansion hang off a synthesized
            // per-address IP_ADDRESS event, so the downstream causal chain
            // names the concrete address instead of the owner block.
            let parent = if event.event_type == EventType::NetblockOwner {
                let id = state.next_id();
                sink.emit(ScanEvent::new(
                    id,
                    EventType::IpAddress,
                    address.clone(),
                    Some(event.id),
                ));
                id
            } else {
                event.id
            };

            classify(&record, &address, parent, state, sink);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::query_client::testing::ScriptedTransport;
    use super::*;
    use crate::core::host::CollectingSink;
    use chrono::{DateTime, Utc};

    /// A context with a pinned clock and a settable stop signal.
    struct TestContext {
        now: DateTime<Utc>,
        stop: bool,
    }

    impl TestContext {
        fn new() -> Self {
            Self {
                now: Utc::now(),
                stop: false,
            }
        }
    }

    impl RunContext for TestContext {
        fn should_stop(&self) -> bool {
            self.stop
        }

        fn now(&self) -> DateTime<Utc> {
            self.now
        }
    }

    fn test_config() -> EnricherConfig {
        EnricherConfig {
            api_key_id: "id".to_string(),
            api_key_secret: "secret".to_string(),
            request_delay_seconds: 0,
            age_limit_days: 0,
        }
    }

    fn ip_event(id: u64, data: &str) -> ScanEvent {
        ScanEvent::new(id, EventType::IpAddress, data.to_string(), None)
    }

    #[tokio::test]
    async fn a_target_is_queried_only_once_per_run() {
        let transport = ScriptedTransport::new();
        transport.push_ok(200, r#"{"ip": "1.2.3.4", "protocols": ["80/http"]}"#);
        transport.push_ok(200, r#"{"ip": "1.2.3.4", "protocols": ["80/http"]}"#);

        let enricher = Enricher::new(&test_config(), transport);
        let mut state = RunState::new();
        let mut sink = CollectingSink::new();
        let ctx = TestContext::new();

        enricher
            .handle_event(&ip_event(1, "1.2.3.4"), &mut state, &ctx, &mut sink)
            .await;
        let first_run_events = sink.events.len();
        assert!(first_run_events > 0);

        enricher
            .handle_event(&ip_event(2, "1.2.3.4"), &mut state, &ctx, &mut sink)
            .await;
        assert_eq!(sink.events.len(), first_run_events);
        assert_eq!(enricher.client_request_count(), 1);
    }

    #[tokio::test]
    async fn netblock_expansion_queries_every_address_with_intermediate_parents() {
        let transport = ScriptedTransport::new();
        for _ in 0..4 {
            transport.push_ok(
                200,
                r#"{"autonomous_system": {"asn": 1234, "routed_prefix": "10.0.0.0/8"}}"#,
            );
        }

        let enricher = Enricher::new(&test_config(), transport);
        let mut state = RunState::new();
        let mut sink = CollectingSink::new();
        let ctx = TestContext::new();

        let block = ScanEvent::new(7, EventType::NetblockOwner, "10.0.0.0/30".to_string(), None);
        enricher.handle_event(&block, &mut state, &ctx, &mut sink).await;

        assert_eq!(enricher.client_request_count(), 4);

        // Four synthesized IP_ADDRESS events, each parented to the block
        // event and each preceding its own address's findings.
        let intermediates: Vec<&ScanEvent> = sink
            .events
            .iter()
            .filter(|e| e.event_type == EventType::IpAddress)
            .collect();
        assert_eq!(intermediates.len(), 4);
        for intermediate in &intermediates {
            assert_eq!(intermediate.parent, Some(7));
        }

        for (i, event) in sink.events.iter().enumerate() {
            if event.event_type == EventType::BgpAsMember {
                let parent = event.parent.unwrap();
                let parent_pos = sink.events.iter().position(|e| e.id == parent).unwrap();
                assert!(parent_pos < i);
                assert_eq!(sink.events[parent_pos].event_type, EventType::IpAddress);
            }
        }
    }

    #[tokio::test]
    async fn fatal_status_halts_all_further_queries() {
        let transport = ScriptedTransport::new();
        transport.push_ok(429, "slow down");
        transport.push_ok(200, r#"{"ip": "9.9.9.9"}"#);

        let enricher = Enricher::new(&test_config(), transport);
        let mut state = RunState::new();
        let mut sink = CollectingSink::new();
        let ctx = TestContext::new();

        enricher
            .handle_event(&ip_event(1, "1.2.3.4"), &mut state, &ctx, &mut sink)
            .await;
        enricher
            .handle_event(&ip_event(2, "9.9.9.9"), &mut state, &ctx, &mut sink)
            .await;

        assert!(state.error_latched());
        assert_eq!(enricher.client_request_count(), 1);
        assert!(sink.events.is_empty());
    }

    #[tokio::test]
    async fn latch_stops_mid_netblock_expansion() {
        let transport = ScriptedTransport::new();
        transport.push_ok(200, r#"{"ip": "10.0.0.0"}"#);
        transport.push_ok(500, "server error");
        // No response scripted for the remaining two addresses: they must
        // never be requested.

        let enricher = Enricher::new(&test_config(), transport);
        let mut state = RunState::new();
        let mut sink = CollectingSink::new();
        let ctx = TestContext::new();

        let block = ScanEvent::new(1, EventType::NetblockOwner, "10.0.0.0/30".to_string(), None);
        enricher.handle_event(&block, &mut state, &ctx, &mut sink).await;

        assert!(state.error_latched());
        assert_eq!(enricher.client_request_count(), 2);
    }

    #[tokio::test]
    async fn missing_credentials_latch_without_any_query() {
        let transport = ScriptedTransport::new();
        let mut config = test_config();
        config.api_key_secret = String::new();

        let enricher = Enricher::new(&config, transport);
        let mut state = RunState::new();
        let mut sink = CollectingSink::new();
        let ctx = TestContext::new();

        enricher
            .handle_event(&ip_event(1, "1.2.3.4"), &mut state, &ctx, &mut sink)
            .await;

        assert!(state.error_latched());
        assert_eq!(enricher.client_request_count(), 0);
        assert!(sink.events.is_empty());
    }

    #[tokio::test]
    async fn unknown_error_type_yields_no_findings_and_no_latch() {
        let transport = ScriptedTransport::new();
        transport.push_ok(200, r#"{"error": "no data", "error_type": "unknown"}"#);

        let enricher = Enricher::new(&test_config(), transport);
        let mut state = RunState::new();
        let mut sink = CollectingSink::new();
        let ctx = TestContext::new();

        enricher
            .handle_event(&ip_event(1, "1.2.3.4"), &mut state, &ctx, &mut sink)
            .await;

        assert!(sink.events.is_empty());
        assert!(!state.error_latched());
    }

    #[tokio::test]
    async fn unexpected_error_type_also_yields_no_findings() {
        let transport = ScriptedTransport::new();
        transport.push_ok(200, r#"{"error": "nope", "error_type": "quota"}"#);

        let enricher = Enricher::new(&test_config(), transport);
        let mut state = RunState::new();
        let mut sink = CollectingSink::new();
        let ctx = TestContext::new();

        enricher
            .handle_event(&ip_event(1, "1.2.3.4"), &mut state, &ctx, &mut sink)
            .await;

        assert!(sink.events.is_empty());
        assert!(!state.error_latched());
    }

    #[tokio::test]
    async fn stale_record_produces_nothing_but_run_continues() {
        let transport = ScriptedTransport::new();
        transport.push_ok(
            200,
            r#"{"updated_at": "2001-01-01T00:00:00+00:00", "ip": "1.2.3.4"}"#,
        );
        let fresh = Utc::now().format("%Y-%m-%dT%H:%M:%S+00:00");
        transport.push_ok(
            200,
            &format!(r#"{{"updated_at": "{fresh}", "ip": "9.9.9.9", "protocols": ["80/http"]}}"#),
        );

        let mut config = test_config();
        config.age_limit_days = 90;
        let enricher = Enricher::new(&config, transport);
        let mut state = RunState::new();
        let mut sink = CollectingSink::new();
        let ctx = TestContext::new();

        enricher
            .handle_event(&ip_event(1, "1.2.3.4"), &mut state, &ctx, &mut sink)
            .await;
        assert!(sink.events.is_empty());

        enricher
            .handle_event(&ip_event(2, "9.9.9.9"), &mut state, &ctx, &mut sink)
            .await;
        assert!(!sink.events.is_empty());
    }

    #[tokio::test]
    async fn invalid_netblock_is_skipped_and_the_run_continues() {
        let transport = ScriptedTransport::new();
        transport.push_ok(200, r#"{"ip": "1.2.3.4"}"#);

        let enricher = Enricher::new(&test_config(), transport);
        let mut state = RunState::new();
        let mut sink = CollectingSink::new();
        let ctx = TestContext::new();

        let bad = ScanEvent::new(1, EventType::NetblockOwner, "bogus/99".to_string(), None);
        enricher.handle_event(&bad, &mut state, &ctx, &mut sink).await;
        assert_eq!(enricher.client_request_count(), 0);
        assert!(!state.error_latched());

        enricher
            .handle_event(&ip_event(2, "1.2.3.4"), &mut state, &ctx, &mut sink)
            .await;
        assert_eq!(enricher.client_request_count(), 1);
    }

    #[tokio::test]
    async fn findings_from_plain_targets_are_parented_to_the_input_event() {
        let transport = ScriptedTransport::new();
        transport.push_ok(200, r#"{"ip": "1.2.3.4", "protocols": ["443/https"]}"#);

        let enricher = Enricher::new(&test_config(), transport);
        let mut state = RunState::new();
        let mut sink = CollectingSink::new();
        let ctx = TestContext::new();

        enricher
            .handle_event(&ip_event(42, "1.2.3.4"), &mut state, &ctx, &mut sink)
            .await;

        assert!(!sink.events.is_empty());
        for event in &sink.events {
            assert_eq!(event.parent, Some(42));
        }
    }

    #[tokio::test]
    async fn cancellation_stops_before_any_further_query() {
        let transport = ScriptedTransport::new();
        let enricher = Enricher::new(&test_config(), transport);
        let mut state = RunState::new();
        let mut sink = CollectingSink::new();
        let mut ctx = TestContext::new();
        ctx.stop = true;

        let block = ScanEvent::new(1, EventType::NetblockOwner, "10.0.0.0/24".to_string(), None);
        enricher.handle_event(&block, &mut state, &ctx, &mut sink).await;

        assert_eq!(enricher.client_request_count(), 0);
        assert!(sink.events.is_empty());
    }

    #[tokio::test]
    async fn everything_emitted_is_a_declared_output_or_intermediate() {
        let transport = ScriptedTransport::new();
        transport.push_ok(
            200,
            r#"{"ip": "10.0.0.1", "protocols": ["80/http"], "metadata": {"os_description": "Linux"}}"#,
        );

        let enricher = Enricher::new(&test_config(), transport);
        let mut state = RunState::new();
        let mut sink = CollectingSink::new();
        let ctx = TestContext::new();

        let block = ScanEvent::new(1, EventType::NetblockOwner, "10.0.0.1/32".to_string(), None);
        enricher.handle_event(&block, &mut state, &ctx, &mut sink).await;

        assert!(!sink.events.is_empty());
        for event in &sink.events {
            assert!(
                PRODUCED_EVENTS.contains(&event.event_type)
                    || event.event_type == EventType::IpAddress,
                "unexpected event type {}",
                event.event_type
            );
        }
    }

    #[tokio::test]
    async fn hostname_targets_use_the_website_lookup_path() {
        let transport = ScriptedTransport::new();
        transport.push_ok(200, r#"{"headers": {"server": "nginx"}}"#);

        let enricher = Enricher::new(&test_config(), transport);
        let mut state = RunState::new();
        let mut sink = CollectingSink::new();
        let ctx = TestContext::new();

        let event = ScanEvent::new(1, EventType::InternetName, "example.com".to_string(), None);
        enricher.handle_event(&event, &mut state, &ctx, &mut sink).await;

        let urls = enricher.client_requests();
        assert_eq!(urls.len(), 1);
        assert!(urls[0].ends_with("/websites/example.com"));
    }
}

#[cfg(test)]
impl Enricher<query_client::testing::ScriptedTransport> {
    fn client_request_count(&self) -> usize {
        self.client.transport_ref().request_count()
    }

    fn client_requests(&self) -> Vec<String> {
        self.client.transport_ref().requests.lock().unwrap().clone()
    }
}
