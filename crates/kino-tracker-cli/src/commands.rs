//! CLI command implementations

use crate::output::{self, OutputFormat};
use kino_tracker::ads::schedule::session_endpoint;
use kino_tracker::replay::ScriptedPlayer;
use kino_tracker::{
    MemorySink, PlayerCapabilities, ProviderKind, ProviderSelector, ReplayScript, TrackerConfig,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

fn load_config(path: Option<&Path>) -> anyhow::Result<TrackerConfig> {
    match path {
        Some(path) => Ok(TrackerConfig::from_path(path)?),
        None => Ok(TrackerConfig::default()),
    }
}

/// Replay a scripted session
pub async fn replay(script_path: &Path, config: Option<&Path>, format: &str) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let script = ReplayScript::from_path(script_path)?;
    info!(script = %script_path.display(), steps = script.steps.len(), "Loaded replay script");

    let sink = MemorySink::new();
    let report = script.run(config, Arc::new(sink.clone())).await?;
    let records = sink.records();

    match OutputFormat::from(format) {
        OutputFormat::Json => {
            for record in &records {
                println!("{}", serde_json::to_string(record)?);
            }
        }
        OutputFormat::Text => {
            println!("Replaying: {}", script_path.display());
            println!();
            for record in &records {
                println!("  {}", output::record_line(record));
            }
            println!();
            println!("Summary:");
            println!("  Steps: {}", report.steps);
            println!("  Events: {}", records.len());
            println!("  Final state: {}", report.final_state);
            match report.ad_tracker {
                Some(kind) => println!("  Ad tracker: {} ({})", kind, kind.tracker_name()),
                None => println!("  Ad tracker: none"),
            }
        }
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct ProbeReport {
    source: String,
    stitched: bool,
    session_endpoint: Option<String>,
    on_ads_ready: ProviderKind,
    tracker_name: &'static str,
}

/// Show which provider the selector would pick
pub fn probe(
    url: &str,
    capabilities: PlayerCapabilities,
    config: Option<&Path>,
    format: &str,
) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let player = ScriptedPlayer::new(url);
    player.set_capabilities(capabilities);

    let stitched = ProviderSelector::is_stitched_source(Some(url), &config);
    let session_endpoint = if stitched {
        let (endpoint, _) = session_endpoint(url, &config.schedule)?;
        Some(endpoint.to_string())
    } else {
        None
    };
    let on_ads_ready = ProviderSelector::select_on_ads_ready(&player, &config);

    let report = ProbeReport {
        source: url.to_string(),
        stitched,
        session_endpoint,
        on_ads_ready,
        tracker_name: on_ads_ready.tracker_name(),
    };

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            println!("Probing: {}", report.source);
            println!();
            if let Some(endpoint) = &report.session_endpoint {
                println!("  Stitched source: yes");
                println!("  Session endpoint: {}", endpoint);
                println!("  Attached on first load: {}", ProviderKind::Schedule);
            } else {
                println!("  Stitched source: no");
            }
            println!(
                "  On ads ready: {} ({})",
                report.on_ads_ready, report.tracker_name
            );
        }
    }

    Ok(())
}
