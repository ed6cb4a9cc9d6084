//! Marker name encoding.
//!
//! The marker's name is the protocol's only persisted artifact, so the
//! encoding is a compatibility contract across processes built from
//! different versions: `lock_<epoch-millis>`, e.g. `lock_1705312800123`.
//! The numeric suffix is the wall-clock time of the latest renewal;
//! comparing suffixes numerically orders renewals across processes
//! (within the protocol's bounded clock-skew assumption).

/// Prefix shared by every marker name.
pub(crate) const MARKER_PREFIX: &str = "lock_";

/// Encode a renewal timestamp (epoch milliseconds) as a marker name.
pub fn marker_name(renewed_at_ms: i64) -> String {
    format!("{}{}", MARKER_PREFIX, renewed_at_ms)
}

/// Decode a marker name back to its renewal timestamp.
///
/// Returns `None` for names that are not markers at all (the WAL
/// directory holds other entries, e.g. the log itself). A name that
/// carries the marker prefix but no parsable timestamp also returns
/// `None`; callers treat that as protocol corruption rather than
/// ignoring it.
pub fn parse_marker_name(name: &str) -> Option<i64> {
    name.strip_prefix(MARKER_PREFIX)?.parse().ok()
}

/// Whether a directory entry name claims to be a marker, parsable or not.
pub(crate) fn is_marker_name(name: &str) -> bool {
    name.starts_with(MARKER_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_epoch_millis() {
        assert_eq!(marker_name(1705312800123), "lock_1705312800123");
        assert_eq!(marker_name(0), "lock_0");
    }

    #[test]
    fn round_trips() {
        let name = marker_name(1705312800123);
        assert_eq!(parse_marker_name(&name), Some(1705312800123));
    }

    #[test]
    fn rejects_non_marker_names() {
        assert_eq!(parse_marker_name("log"), None);
        assert_eq!(parse_marker_name("lock"), None);
        assert_eq!(parse_marker_name("lock_abc"), None);
        assert_eq!(parse_marker_name("lock_12x"), None);
    }

    #[test]
    fn is_marker_name_matches_prefix_only() {
        assert!(is_marker_name("lock_123"));
        assert!(is_marker_name("lock_garbage"));
        assert!(!is_marker_name("log"));
        assert!(!is_marker_name("wal-00001"));
    }
}
