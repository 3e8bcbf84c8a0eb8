//! Monotonically sortable unique string generator.
//!
//! Produces `"{unixMillis}-{9-char-base36-random}"`, the format §6 specifies
//! for `sessionId`; reused for `Operation::id`, `OperationBatch::id`, and
//! `CursorBroadcast::id` so the engine has one collaborator for every "unique
//! string" need in the data model.

use std::time::{SystemTime, UNIX_EPOCH};

/// Produces unique, time-sortable identifier strings.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Default generator: `unixMillis` prefix (sortable) + 9 random base36 chars
/// (collision avoidance within the same millisecond).
#[derive(Default)]
pub struct DefaultIdGenerator;

impl IdGenerator for DefaultIdGenerator {
    fn next_id(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX_EPOCH")
            .as_millis();
        format!("{millis}-{}", random_base36(9))
    }
}

fn random_base36(len: usize) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    (0..len)
        .map(|_| ALPHABET[rand::random_range(0..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_well_formed() {
        let gen = DefaultIdGenerator;
        let a = gen.next_id();
        let b = gen.next_id();
        assert_ne!(a, b);
        assert!(a.contains('-'));
        let suffix = a.split('-').nth(1).unwrap();
        assert_eq!(suffix.len(), 9);
    }
}
