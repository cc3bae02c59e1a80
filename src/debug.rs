use crate::protocol::SyncData;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, trace, warn};

static DEBUG_MODE: AtomicBool = AtomicBool::new(false);
static TRACE_MODE: AtomicBool = AtomicBool::new(false);

/// Initialize debug mode from environment variables
///
/// - `LINK_DEBUG=1`: log every sent and received [`SyncData`] as JSON
/// - `LINK_TRACE=1`: log a one-line summary of every sync pass
pub fn init_debug_mode() {
    let debug = env::var("LINK_DEBUG").is_ok();
    let trace = env::var("LINK_TRACE").is_ok();

    DEBUG_MODE.store(debug, Ordering::Relaxed);
    TRACE_MODE.store(trace, Ordering::Relaxed);

    if debug {
        info!("debug mode enabled, sync data will be logged as JSON");
    }
    if trace {
        info!("trace mode enabled, sync passes will be summarized");
    }
}

pub fn is_debug_enabled() -> bool {
    DEBUG_MODE.load(Ordering::Relaxed)
}

pub fn is_trace_enabled() -> bool {
    TRACE_MODE.load(Ordering::Relaxed)
}

/// Log `data` as pretty JSON if debug mode is enabled.
pub fn log_sync_data(direction: &str, data: &SyncData) {
    if !is_debug_enabled() {
        return;
    }

    match serde_json::to_string_pretty(data) {
        Ok(json) => debug!("{} sync data ({} components):\n{}", direction, data.components.len(), json),
        Err(e) => warn!("failed to serialize sync data to JSON: {}", e),
    }
}

/// Summarize a sync pass if trace mode is enabled.
pub fn trace_sync_summary(direction: &str, data: &SyncData, bytes: usize) {
    if !is_trace_enabled() {
        return;
    }

    trace!("{}", sync_summary(direction, data, bytes));
}

pub fn sync_summary(direction: &str, data: &SyncData, bytes: usize) -> String {
    let removed = data.tombstone_count();
    let updated = data.components.len() - removed;
    let triggers: usize = data
        .components
        .iter()
        .flat_map(|c| c.triggers.values())
        .map(Vec::len)
        .sum();
    format!(
        "{} {} {} of {}: ~{} updated, -{} removed, {} trigger values, {}",
        direction,
        if data.whole { "whole" } else { "delta" },
        data.id,
        data.group,
        updated,
        removed,
        triggers,
        format_bytes(bytes)
    )
}

/// Format bytes in human-readable format (KB, MB, etc.)
pub fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;
    const GB: usize = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Props, SyncComponent, Triggers};
    use serde_json::json;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 bytes");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
    }

    #[test]
    fn test_sync_summary() {
        let mut triggers = Triggers::new();
        triggers.insert("hit".to_string(), vec![json!(1), json!(2)]);
        let data = SyncData::new(
            "room",
            false,
            vec![
                SyncComponent::update("Player", "p1", "", Props::new(), triggers),
                SyncComponent::tombstone("Player", "p2", ""),
            ],
        );
        let summary = sync_summary("send", &data, 2048);
        assert!(summary.starts_with("send delta"));
        assert!(summary.ends_with("~1 updated, -1 removed, 2 trigger values, 2.00 KB"));
    }

    #[test]
    fn test_debug_mode_initialization() {
        init_debug_mode();
        log_sync_data("send", &SyncData::new("room", true, Vec::new()));
    }
}
