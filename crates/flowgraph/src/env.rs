//! Process environment knobs, read once.

use std::env;
use std::sync::OnceLock;

static ARRAY_CACHE: OnceLock<bool> = OnceLock::new();
static CACHE_MAX_BYTES: OnceLock<Option<usize>> = OnceLock::new();
static SMALL_ARRAY_THRESHOLD: OnceLock<Option<usize>> = OnceLock::new();
static PLAN_CACHE: OnceLock<Option<usize>> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn read_usize(key: &str) -> Option<usize> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => match value.trim().parse() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                log::warn!("ignoring {key}={value:?}: not an unsigned integer");
                None
            }
        },
        _ => None,
    }
}

/// `FLOWGRAPH_ARRAY_CACHE`: recycle released working buffers (default on).
pub(crate) fn array_cache_enabled() -> bool {
    *ARRAY_CACHE.get_or_init(|| match env::var("FLOWGRAPH_ARRAY_CACHE") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => true,
    })
}

/// `FLOWGRAPH_CACHE_MAX_BYTES`: byte budget of the buffer cache.
pub(crate) fn cache_max_bytes() -> Option<usize> {
    *CACHE_MAX_BYTES.get_or_init(|| read_usize("FLOWGRAPH_CACHE_MAX_BYTES"))
}

/// `FLOWGRAPH_SMALL_ARRAY_THRESHOLD`: buffers at or below this size are always cached.
pub(crate) fn small_array_threshold() -> Option<usize> {
    *SMALL_ARRAY_THRESHOLD.get_or_init(|| read_usize("FLOWGRAPH_SMALL_ARRAY_THRESHOLD"))
}

/// `FLOWGRAPH_PLAN_CACHE`: number of execution plans kept per session.
pub(crate) fn plan_cache_capacity() -> Option<usize> {
    *PLAN_CACHE.get_or_init(|| read_usize("FLOWGRAPH_PLAN_CACHE"))
}
