//! Lifecycle markers scraped from peer logs.
//!
//! The call client prints its final debug log at exit, usually as one JSON
//! line. The key spelling is not fixed, so markers are accepted as
//! `first_send=12.5`, `"firstSend": 12.5` or `first send: 12.5`; the first
//! occurrence of each wins. Logs without markers leave the row's timestamp
//! columns empty.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use callbench_common::models::LifecycleTimestamps;

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)"?\b(first|last)[_ ]?(send|recv|receive)"?\s*[:=]\s*"?(-?\d+(?:\.\d+)?(?:[eE][+-]?\d+)?)"#,
    )
    .expect("static regex")
});

pub fn parse_timestamps(log: &str) -> LifecycleTimestamps {
    let mut ts = LifecycleTimestamps::default();
    for caps in MARKER_RE.captures_iter(log) {
        let Ok(value) = caps[3].parse::<f64>() else {
            continue;
        };
        let first = caps[1].eq_ignore_ascii_case("first");
        let send = caps[2].eq_ignore_ascii_case("send");
        let slot = match (first, send) {
            (true, true) => &mut ts.first_send,
            (true, false) => &mut ts.first_recv,
            (false, true) => &mut ts.last_send,
            (false, false) => &mut ts.last_recv,
        };
        slot.get_or_insert(value);
    }
    ts
}

/// Reads and parses a peer log. A missing or unreadable log yields empty
/// timestamps.
pub fn read_timestamps(path: &Path) -> LifecycleTimestamps {
    match std::fs::read(path) {
        Ok(bytes) => parse_timestamps(&String::from_utf8_lossy(&bytes)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "peer log unreadable");
            LifecycleTimestamps::default()
        }
    }
}
