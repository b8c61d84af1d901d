// src/main.rs

use clap::Parser;
use color_eyre::eyre::Result;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use url::Url;

mod config;
mod core;
mod logging;

use crate::config::EnricherConfig;
use crate::core::host::{CollectingSink, LiveContext};
use crate::core::models::{EventType, RunState, ScanEvent};
use crate::core::pipeline::Enricher;
use crate::core::pipeline::query_client::ReqwestTransport;

/// Enrich reconnaissance targets with host and network attribution data
/// from the Censys API.
#[derive(Debug, Parser)]
#[command(name = "vantage", version, about)]
struct Cli {
    /// Targets to enrich: IP addresses, hostnames, or CIDR netblocks.
    #[arg(required = true)]
    targets: Vec<String>,

    /// Path to a JSON configuration file holding the API key id/secret.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Delay between API requests, in seconds.
    #[arg(long)]
    delay: Option<u64>,

    /// Ignore records older than this many days (0 disables the limit).
    #[arg(long)]
    age_limit: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    logging::initialize_logging()?;

    let cli = Cli::parse();

    let mut config = EnricherConfig::load(cli.config.as_deref());
    if let Some(delay) = cli.delay {
        config.request_delay_seconds = delay;
    }
    if let Some(age_limit) = cli.age_limit {
        config.age_limit_days = age_limit;
    }

    let transport = ReqwestTransport::new()?;
    let enricher = Enricher::new(&config, transport);

    let mut state = RunState::new();
    let ctx = LiveContext::new();

    let stop = ctx.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping after the current query.");
            stop.store(true, Ordering::Relaxed);
        }
    });

    let events: Vec<ScanEvent> = cli
        .targets
        .iter()
        .map(|raw| {
            let (event_type, data) = classify_target(raw);
            ScanEvent::new(state.next_id(), event_type, data, None)
        })
        .collect();

    let mut sink = CollectingSink::new();
    for event in &events {
        enricher.handle_event(event, &mut state, &ctx, &mut sink).await;
    }

    print_report(&events, &sink);
    Ok(())
}

/// Decides which input event type a raw CLI target maps to. Anything that
/// is neither an address nor a CIDR block is treated as a hostname; inputs
/// given as URLs are reduced to their host first.
fn classify_target(raw: &str) -> (EventType, String) {
    if raw.contains("://") {
        let host = Url::parse(raw)
            .ok()
            .and_then(|url| url.host_str().map(String::from))
            .unwrap_or_else(|| raw.to_string());
        return (EventType::InternetName, host);
    }
    if raw.parse::<IpAddr>().is_ok() {
        return (EventType::IpAddress, raw.to_string());
    }
    if raw.contains('/') {
        // Netblock-shaped; the pipeline reports it if it fails to parse.
        return (EventType::NetblockOwner, raw.to_string());
    }
    (EventType::InternetName, raw.to_string())
}

fn print_report(inputs: &[ScanEvent], sink: &CollectingSink) {
    println!(
        "Processed {} target(s), emitted {} event(s).",
        inputs.len(),
        sink.events.len()
    );
    for event in &sink.events {
        let data: String = event.data.chars().take(96).collect();
        let ellipsis = if event.data.chars().count() > 96 { "…" } else { "" };
        let parent = event
            .parent
            .map(|id| format!("  (from #{id})"))
            .unwrap_or_default();
        println!(
            "#{:<4} {:<22} {}{}{}",
            event.id,
            event.event_type.to_string(),
            data,
            ellipsis,
            parent
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_classify_by_shape() {
        assert_eq!(
            classify_target("1.2.3.4"),
            (EventType::IpAddress, "1.2.3.4".to_string())
        );
        assert_eq!(
            classify_target("10.0.0.0/24"),
            (EventType::NetblockOwner, "10.0.0.0/24".to_string())
        );
        assert_eq!(
            classify_target("example.com"),
            (EventType::InternetName, "example.com".to_string())
        );
    }

    #[test]
    fn url_targets_reduce_to_their_host() {
        assert_eq!(
            classify_target("https://example.com/path"),
            (EventType::InternetName, "example.com".to_string())
        );
    }
}
