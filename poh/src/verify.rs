//! Static verification of Proof of History sequences.

use crate::config::PohConfig;
use crate::entry::PohEntry;
use sealane_sdk::hash::Hash;
use std::time::Duration;

pub struct PohVerifier;

impl PohVerifier {
    /// True iff the sequence is well-formed: contiguous sequence numbers,
    /// strictly increasing timestamps, and an unbroken hash chain.
    pub fn verify_sequence(entries: &[PohEntry]) -> bool {
        entries
            .windows(2)
            .all(|pair| Self::verify_transition(&pair[0], &pair[1]))
    }

    pub fn verify_transition(prev: &PohEntry, curr: &PohEntry) -> bool {
        curr.verify_from_previous(prev)
    }

    /// Check that every inter-entry duration falls inside the tolerance
    /// band `[target/2, 2*target]`. Tighter or looser bands are caller
    /// policy layered on top of `verify_sequence`.
    pub fn verify_timing(entries: &[PohEntry], config: &PohConfig) -> bool {
        let min = config.target_tick_duration / 2;
        let max = config.target_tick_duration * 2;
        entries.windows(2).all(|pair| {
            let delta_ns = pair[1].timestamp_ns.saturating_sub(pair[0].timestamp_ns);
            if delta_ns < 0 {
                return false;
            }
            let delta = Duration::from_nanos(delta_ns as u64);
            delta >= min && delta <= max
        })
    }

    /// Flatten the mixed data of `entries` in chain order.
    pub fn extract_mixed_data(entries: &[PohEntry]) -> Vec<Hash> {
        entries
            .iter()
            .flat_map(|entry| entry.mixed.iter().copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealane_sdk::hash::hash;

    fn build_chain(initial: Hash, mixes: &[Vec<Hash>], tick_ns: i64) -> Vec<PohEntry> {
        let mut entries = Vec::new();
        let mut prev_hash = initial;
        let mut ts = 1_000_000;
        for (i, mixed) in mixes.iter().enumerate() {
            let entry = PohEntry {
                hash: PohEntry::expected_hash(&prev_hash, mixed),
                sequence: i as u64 + 1,
                timestamp_ns: ts,
                mixed: mixed.clone(),
            };
            prev_hash = entry.hash;
            ts += tick_ns;
            entries.push(entry);
        }
        entries
    }

    #[test]
    fn test_verify_sequence_accepts_chain() {
        let chain = build_chain(
            hash(b"init"),
            &[vec![], vec![hash(b"a")], vec![], vec![hash(b"b"), hash(b"c")]],
            1_000_000,
        );
        assert!(PohVerifier::verify_sequence(&chain));
    }

    #[test]
    fn test_verify_sequence_trivial_cases() {
        assert!(PohVerifier::verify_sequence(&[]));
        assert!(PohVerifier::verify_sequence(&[PohEntry::default()]));
    }

    #[test]
    fn test_verify_sequence_rejects_broken_link() {
        let mut chain = build_chain(hash(b"init"), &[vec![], vec![], vec![]], 1_000_000);
        chain[1].hash = hash(b"forged");
        assert!(!PohVerifier::verify_sequence(&chain));
    }

    #[test]
    fn test_verify_timing_band() {
        let config = PohConfig {
            target_tick_duration: Duration::from_millis(1),
            ..PohConfig::default()
        };
        let on_pace = build_chain(hash(b"init"), &[vec![], vec![], vec![]], 1_000_000);
        assert!(PohVerifier::verify_timing(&on_pace, &config));

        // a 3x-target gap is outside the band
        let too_slow = build_chain(hash(b"init"), &[vec![], vec![], vec![]], 3_000_000);
        assert!(!PohVerifier::verify_timing(&too_slow, &config));

        // quarter-target pacing is too fast
        let too_fast = build_chain(hash(b"init"), &[vec![], vec![], vec![]], 250_000);
        assert!(!PohVerifier::verify_timing(&too_fast, &config));
    }

    #[test]
    fn test_extract_mixed_data_preserves_order() {
        let a = hash(b"a");
        let b = hash(b"b");
        let c = hash(b"c");
        let chain = build_chain(hash(b"init"), &[vec![a], vec![], vec![b, c]], 1_000_000);
        assert_eq!(PohVerifier::extract_mixed_data(&chain), vec![a, b, c]);
    }
}
