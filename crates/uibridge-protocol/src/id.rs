//! Message ID generation.

use std::sync::atomic::{AtomicU64, Ordering};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a fresh message ID.
///
/// The ID is `<millis>-<sequence>-<random>`: the timestamp and random suffix keep
/// IDs distinct across processes, the per-process sequence makes them unique
/// within one process even when many are minted in the same millisecond.
pub fn generate_id() -> String {
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let suffix: String = (0..6).map(|_| fastrand::alphanumeric()).collect();
    format!("{}-{:x}-{}", now_millis(), seq, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique() {
        let ids: HashSet<String> = (0..10_000).map(|_| generate_id()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_id_shape() {
        let id = generate_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 6);
    }
}
