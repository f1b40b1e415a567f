//! Output formatting for CLI

use kino_tracker::{Attributes, CanonicalEvent, EventRecord};

/// Output format options
pub enum OutputFormat {
    Text,
    Json,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }
}

/// One line per record: sequence, action, detail and playhead
pub fn record_line(record: &EventRecord) -> String {
    let detail = match &record.event {
        CanonicalEvent::Download { state } => format!(" state={state}"),
        CanonicalEvent::End { skipped: true } => " skipped".to_string(),
        CanonicalEvent::Error { code, message } => format!(
            " code={} message={}",
            code.as_deref().unwrap_or("-"),
            message.as_deref().unwrap_or("-")
        ),
        CanonicalEvent::AdClick { url } => format!(" url={}", url.as_deref().unwrap_or("-")),
        CanonicalEvent::AdQuartile { quartile } => format!(" q{quartile}"),
        _ => String::new(),
    };

    let playhead = match &record.attributes {
        Attributes::Content(content) => content.playhead_ms,
        Attributes::Ad(ad) => ad.playhead_ms,
    };
    let position = match &record.attributes {
        Attributes::Ad(ad) => ad
            .position
            .map(|p| format!(" [{p}]"))
            .unwrap_or_default(),
        Attributes::Content(_) => String::new(),
    };

    format!(
        "{:>4}  {:<22}{}{}  @{:.0}ms  ({})",
        record.sequence,
        record.action,
        detail,
        position,
        playhead.unwrap_or(0.0),
        record.tracker
    )
}
